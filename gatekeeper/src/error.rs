use std::time::Duration;

use axum::response::{IntoResponse, Response};
use http::StatusCode;
use sea_orm::DbErr;

/// The session registry or credential store could not answer in time
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("store unavailable: {0}")]
    Unavailable(#[from] DbErr),
}

#[derive(Debug, thiserror::Error)]
pub enum AccountError {
    #[error("email already registered")]
    EmailTaken,
    #[error("could not issue a unique stream key after {0} attempts")]
    KeyExhausted(u8),
    #[error("password hash error: {0}")]
    PasswordHash(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<DbErr> for AccountError {
    fn from(err: DbErr) -> Self {
        AccountError::Store(StoreError::Unavailable(err))
    }
}

#[derive(Debug)]
pub enum AppError {
    AccountNotFound(String),
    AccountAlreadyExists(String),
    BadRequest(String),
    StoreUnavailable(StoreError),
    InternalServerError(anyhow::Error),
}

impl AppError {
    pub fn account_not_found<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::AccountNotFound(t.to_string())
    }

    pub fn bad_request<T>(t: T) -> Self
    where
        T: ToString,
    {
        AppError::BadRequest(t.to_string())
    }

    pub fn store(err: StoreError) -> Self {
        AppError::StoreUnavailable(err)
    }

    pub fn account(err: AccountError) -> Self {
        match err {
            AccountError::EmailTaken => AppError::AccountAlreadyExists(err.to_string()),
            AccountError::Store(err) => AppError::StoreUnavailable(err),
            err => AppError::InternalServerError(err.into()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self {
            AppError::AccountNotFound(err) => (StatusCode::NOT_FOUND, err).into_response(),
            AppError::AccountAlreadyExists(err) => (StatusCode::CONFLICT, err).into_response(),
            AppError::BadRequest(err) => (StatusCode::BAD_REQUEST, err).into_response(),
            AppError::StoreUnavailable(err) => {
                (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response()
            }
            AppError::InternalServerError(err) => {
                (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()).into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        AppError::InternalServerError(err.into())
    }
}
