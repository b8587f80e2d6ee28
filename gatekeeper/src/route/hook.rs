use api::request::PublishHook;
use axum::{extract::State, response::IntoResponse, routing::post, Router};
use http::StatusCode;
use tracing::debug;

use crate::gateway::{Decision, Rejection};
use crate::route::JsonOrForm;
use crate::AppState;

/// Ingest edge callbacks. Never token protected: the edge authenticates the
/// publisher with the stream key itself.
pub fn route() -> Router<AppState> {
    Router::new()
        .route(api::path::PUBLISH_START, post(publish_start))
        .route(api::path::PUBLISH_END, post(publish_end))
}

async fn publish_start(
    State(state): State<AppState>,
    JsonOrForm(hook): JsonOrForm<PublishHook>,
) -> impl IntoResponse {
    debug!(app = ?hook.app, addr = ?hook.addr, "publish start");
    match state.gateway.authorize_publish(&hook.name).await {
        Decision::Accept(_) => (StatusCode::OK, "OK"),
        Decision::Reject(Rejection::UnknownKey) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
        Decision::Reject(Rejection::StoreUnavailable) => {
            (StatusCode::SERVICE_UNAVAILABLE, "Service Unavailable")
        }
    }
}

async fn publish_end(
    State(state): State<AppState>,
    JsonOrForm(hook): JsonOrForm<PublishHook>,
) -> impl IntoResponse {
    debug!(app = ?hook.app, addr = ?hook.addr, "publish end");
    state.gateway.report_publish_end(&hook.name).await;
    (StatusCode::OK, "OK")
}
