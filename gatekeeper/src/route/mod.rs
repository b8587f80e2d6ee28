use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Form, Json,
};
use http::header;

use crate::error::AppError;

pub mod account;
pub mod admin;
pub mod event;
pub mod hook;
pub mod session;

/// Accepts either a JSON or an urlencoded form body, whichever the
/// `Content-Type` announces. Ingest edges differ in what they post.
pub struct JsonOrForm<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for JsonOrForm<T>
where
    S: Send + Sync,
    T: serde::de::DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let is_json = req
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|v| v.starts_with("application/json"))
            .unwrap_or(false);

        if is_json {
            let Json(value) = Json::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;
            Ok(JsonOrForm(value))
        } else {
            let Form(value) = Form::<T>::from_request(req, state)
                .await
                .map_err(|e| AppError::bad_request(e.body_text()))?;
            Ok(JsonOrForm(value))
        }
    }
}
