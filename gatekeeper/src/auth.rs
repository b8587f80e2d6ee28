use std::{collections::HashSet, marker::PhantomData};

use http::{header, Request, Response, StatusCode};
use http_body::Body;
use tower_http::validate_request::ValidateRequest;

use crate::config::Auth;

/// Accepts a request whose `Authorization` header matches any configured
/// bearer token. With no tokens configured every request passes.
#[derive(Debug)]
pub struct BearerValidate<ResBody> {
    header_values: HashSet<String>,
    _ty: PhantomData<fn() -> ResBody>,
}

impl<ResBody> BearerValidate<ResBody> {
    pub fn new(auth: &Auth) -> Self
    where
        ResBody: Body + Default,
    {
        Self {
            header_values: auth.to_authorizations().into_iter().collect(),
            _ty: PhantomData,
        }
    }
}

impl<ResBody> Clone for BearerValidate<ResBody> {
    fn clone(&self) -> Self {
        Self {
            header_values: self.header_values.clone(),
            _ty: PhantomData,
        }
    }
}

impl<B, ResBody> ValidateRequest<B> for BearerValidate<ResBody>
where
    ResBody: Body + Default,
{
    type ResponseBody = ResBody;

    fn validate(&mut self, request: &mut Request<B>) -> Result<(), Response<Self::ResponseBody>> {
        if self.header_values.is_empty() {
            return Ok(());
        }
        match request
            .headers()
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
        {
            Some(actual) if self.header_values.contains(actual) => Ok(()),
            _ => {
                let mut res = Response::new(ResBody::default());
                *res.status_mut() = StatusCode::UNAUTHORIZED;
                Err(res)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body as AxumBody;

    fn request(authorization: Option<&str>) -> Request<()> {
        let mut builder = Request::builder().uri("/api/sessions/active");
        if let Some(value) = authorization {
            builder = builder.header(header::AUTHORIZATION, value);
        }
        builder.body(()).unwrap()
    }

    #[test]
    fn test_open_without_tokens() {
        let mut validate = BearerValidate::<AxumBody>::new(&Auth::default());
        assert!(validate.validate(&mut request(None)).is_ok());
    }

    #[test]
    fn test_bearer_token_required() {
        let mut validate = BearerValidate::<AxumBody>::new(&Auth {
            tokens: vec!["operator".to_string()],
        });

        assert!(validate.validate(&mut request(Some("Bearer operator"))).is_ok());
        let denied = validate.validate(&mut request(Some("Bearer guess"))).unwrap_err();
        assert_eq!(StatusCode::UNAUTHORIZED, denied.status());
        assert!(validate.validate(&mut request(None)).is_err());
    }
}
