use api::event::PipelineEvent;
use axum::{extract::State, routing::post, Json, Router};
use http::StatusCode;

use crate::AppState;

pub fn route() -> Router<AppState> {
    Router::new().route(api::path::EVENTS, post(pipeline_event))
}

/// Relay pipeline reports. Accepted even when telemetry is disabled.
async fn pipeline_event(
    State(state): State<AppState>,
    Json(event): Json<PipelineEvent>,
) -> StatusCode {
    let telemetry = &state.telemetry;
    match event {
        PipelineEvent::Relay {
            stream_key,
            destination,
            event,
            properties,
        } => telemetry.relay_event(&stream_key, &destination, &event, properties),
        PipelineEvent::Error {
            stream_key,
            error_type,
            error_message,
            properties,
        } => telemetry.error_event(&stream_key, &error_type, &error_message, properties),
        PipelineEvent::Performance {
            stream_key,
            metric_name,
            metric_value,
            properties,
        } => telemetry.performance_metric(&stream_key, &metric_name, metric_value, properties),
        PipelineEvent::Connection {
            connection_id,
            event,
            properties,
        } => telemetry.connection_event(&connection_id, &event, properties),
    }
    StatusCode::ACCEPTED
}
