use api::{
    request::RegisterAccount,
    response::{Account, SessionState},
};
use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use http::StatusCode;
use uuid::Uuid;

use crate::error::AppError;
use crate::result::Result;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::ACCOUNTS, post(register))
        .route("/api/accounts/:id/stream", get(stream_state))
        .route("/api/accounts/:id/stream-key", post(rotate_stream_key))
}

async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterAccount>,
) -> Result<(StatusCode, Json<Account>)> {
    let email = req.email.trim().to_lowercase();
    if email.is_empty() || !email.contains('@') {
        return Err(AppError::bad_request("invalid email"));
    }
    if req.password.is_empty() {
        return Err(AppError::bad_request("password required"));
    }

    let account = state
        .credentials
        .create_account(&email, &req.password)
        .await
        .map_err(AppError::account)?;
    Ok((StatusCode::CREATED, Json(account.into())))
}

async fn stream_state(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionState>> {
    state
        .query
        .get_session_state(id)
        .await
        .map_err(AppError::store)?
        .map(Json)
        .ok_or_else(|| AppError::account_not_found(id))
}

async fn rotate_stream_key(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Account>> {
    state
        .gateway
        .rotate_stream_key(id)
        .await
        .map_err(AppError::account)?
        .map(|account| Json(account.into()))
        .ok_or_else(|| AppError::account_not_found(id))
}
