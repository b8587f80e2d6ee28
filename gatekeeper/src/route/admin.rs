use api::response::Reconcile;
use axum::{extract::State, routing::post, Json, Router};
use chrono::Utc;

use crate::result::Result;
use crate::tick::reconcile;
use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::RECONCILE, post(reconcile_now))
}

/// Run one reconciliation pass without waiting for the next tick
async fn reconcile_now(State(state): State<AppState>) -> Result<Json<Reconcile>> {
    let reaped = reconcile(
        &state.registry,
        &state.telemetry,
        state.config.reconcile.stale_after.0,
        Utc::now().timestamp_millis(),
    )
    .await?;
    Ok(Json(Reconcile { reaped }))
}
