use std::{future::Future, time::Duration};

use axum::{extract::Request, middleware, Router};
use tokio::net::TcpListener;
use tower_http::{
    cors::CorsLayer, trace::TraceLayer, validate_request::ValidateRequestHeaderLayer,
};
use tracing::{error, info, info_span};

use crate::auth::BearerValidate;
use crate::config::Config;
use crate::gateway::Gateway;
use crate::query::SessionQuery;
use crate::service::{
    credentials::CredentialStore, database::DatabaseService, registry::SessionRegistry,
};
use crate::telemetry::Telemetry;

mod access_log;
mod auth;
pub mod config;
mod entity;
pub mod error;
pub mod gateway;
mod migration;
pub mod query;
mod result;
mod route;
pub mod service;
pub mod telemetry;
pub mod tick;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub credentials: CredentialStore,
    pub registry: SessionRegistry,
    pub gateway: Gateway,
    pub query: SessionQuery,
    pub telemetry: Telemetry,
}

pub async fn serve<F>(cfg: Config, listener: TcpListener, signal: F) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Server listening on {}", listener.local_addr()?);

    let db = DatabaseService::new(&cfg.database).await?;
    let credentials = CredentialStore::new(db.connection.clone());
    let registry = SessionRegistry::new(db.connection.clone());
    let telemetry = Telemetry::new(&cfg.telemetry);
    let gateway = Gateway::new(
        credentials.clone(),
        registry.clone(),
        telemetry.clone(),
        cfg.gateway.clone(),
    );
    let query = SessionQuery::new(
        credentials.clone(),
        registry.clone(),
        cfg.gateway.store_timeout(),
    );

    let app_state = AppState {
        config: cfg.clone(),
        credentials,
        registry,
        gateway,
        query,
        telemetry: telemetry.clone(),
    };

    let auth_layer = ValidateRequestHeaderLayer::custom(BearerValidate::new(&cfg.auth));
    let app = Router::new()
        .merge(
            route::account::route()
                .merge(route::session::route())
                .merge(route::admin::route())
                .merge(route::event::route())
                .layer(auth_layer),
        )
        .merge(route::hook::route())
        .layer(if cfg.http.cors {
            CorsLayer::permissive()
        } else {
            CorsLayer::new()
        })
        .with_state(app_state.clone())
        .layer(middleware::from_fn(access_log::log_request))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let span = info_span!(
                    "http_request",
                    uri = ?request.uri().path(),
                    method = ?request.method(),
                    span_id = tracing::field::Empty,
                );
                span.record(
                    "span_id",
                    span.id().unwrap_or(tracing::Id::from_u64(42)).into_u64(),
                );
                span
            }),
        );

    let sweep = tokio::spawn(tick::reconcile_check(app_state));
    axum::serve(listener, app)
        .with_graceful_shutdown(signal)
        .await
        .unwrap_or_else(|e| error!("Application error: {e}"));

    sweep.abort();
    telemetry
        .flush(Duration::from_millis(cfg.telemetry.flush_deadline))
        .await;
    db.connection.close().await?;
    Ok(())
}
