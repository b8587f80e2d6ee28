use std::future::Future;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::{self, DuplicateStart};
use crate::entity::{accounts, sessions};
use crate::error::{AccountError, StoreError};
use crate::service::credentials::{redact, CredentialStore};
use crate::service::registry::{EndReason, Opened, SessionRegistry};
use crate::telemetry::Telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No account holds the key, or it was rotated away
    UnknownKey,
    /// The store did not answer within the edge budget
    StoreUnavailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept(Uuid),
    Reject(Rejection),
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept(_))
    }
}

/// Answers the ingest edge's publish start and publish end callbacks.
///
/// Both operations are safe to replay: a repeated start never creates a
/// second open session and a repeated end closes nothing new.
#[derive(Clone, Debug)]
pub struct Gateway {
    credentials: CredentialStore,
    registry: SessionRegistry,
    telemetry: Telemetry,
    config: config::Gateway,
}

impl Gateway {
    pub fn new(
        credentials: CredentialStore,
        registry: SessionRegistry,
        telemetry: Telemetry,
        config: config::Gateway,
    ) -> Self {
        Self {
            credentials,
            registry,
            telemetry,
            config,
        }
    }

    /// Fails closed: anything short of a confirmed open session is a reject.
    pub async fn authorize_publish(&self, stream_key: &str) -> Decision {
        if stream_key.is_empty() {
            warn!("publish rejected: empty stream key");
            return Decision::Reject(Rejection::UnknownKey);
        }

        match self.bounded(self.open_session(stream_key)).await {
            Ok(Some((account, opened))) => {
                let session = opened.session();
                let reused = matches!(opened, Opened::Existing(_));
                info!(
                    stream_key = redact(stream_key),
                    account = %account.id,
                    session = %session.id,
                    reused,
                    "publish authorized"
                );
                self.telemetry.stream_lifecycle_event(
                    stream_key,
                    "stream_authorized",
                    props(json!({
                        "account_id": account.id.to_string(),
                        "session_id": session.id.to_string(),
                        "reused_session": reused,
                    })),
                );
                Decision::Accept(session.id)
            }
            Ok(None) => {
                warn!(stream_key = redact(stream_key), "publish rejected: unknown stream key");
                self.telemetry.stream_lifecycle_event(
                    stream_key,
                    "stream_rejected",
                    props(json!({ "reason": "unknown_key" })),
                );
                Decision::Reject(Rejection::UnknownKey)
            }
            Err(e) => {
                error!(stream_key = redact(stream_key), "publish rejected: {}", e);
                self.telemetry.stream_lifecycle_event(
                    stream_key,
                    "stream_rejected",
                    props(json!({ "reason": "store_unavailable" })),
                );
                self.telemetry.error_event(
                    stream_key,
                    "store_unavailable",
                    &e.to_string(),
                    props(json!({ "operation": "authorize_publish" })),
                );
                Decision::Reject(Rejection::StoreUnavailable)
            }
        }
    }

    async fn open_session(
        &self,
        stream_key: &str,
    ) -> Result<Option<(accounts::Model, Opened)>, StoreError> {
        let Some(account) = self.credentials.find_by_stream_key(stream_key).await? else {
            return Ok(None);
        };

        let now = Utc::now().timestamp_millis();
        let opened = match self.config.duplicate_start {
            DuplicateStart::Reuse => {
                self.registry
                    .open_if_none(account.id, stream_key, now)
                    .await?
            }
            DuplicateStart::Restart => {
                let (closed, opened) = self.registry.restart(account.id, stream_key, now).await?;
                if let Some(closed) = closed {
                    info!(
                        stream_key = redact(stream_key),
                        session = %closed.id,
                        "open session replaced by a new publish"
                    );
                    self.telemetry.stream_lifecycle_event(
                        stream_key,
                        "stream_ended",
                        props(json!({
                            "session_id": closed.id.to_string(),
                            "reason": EndReason::Restarted.as_str(),
                            "duration_ms": now - closed.started_at,
                        })),
                    );
                }
                opened
            }
        };

        Ok(Some((account, opened)))
    }

    /// Fails open: always acknowledges the edge. Store failures are retried
    /// until `end_deadline` runs out and then left to the reconciliation sweep.
    pub async fn report_publish_end(&self, stream_key: &str) {
        if stream_key.is_empty() {
            return;
        }

        let deadline = self.config.end_deadline();
        let result = match tokio::time::timeout(deadline, self.close_with_retry(stream_key)).await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(deadline)),
        };

        match result {
            Ok(Some((closed, now))) => {
                info!(
                    stream_key = redact(stream_key),
                    session = %closed.id,
                    "publish ended"
                );
                self.telemetry.stream_lifecycle_event(
                    stream_key,
                    "stream_ended",
                    props(json!({
                        "session_id": closed.id.to_string(),
                        "account_id": closed.account_id.to_string(),
                        "reason": EndReason::PublishEnd.as_str(),
                        "duration_ms": now - closed.started_at,
                    })),
                );
            }
            Ok(None) => {
                debug!(
                    stream_key = redact(stream_key),
                    "publish end without open session ignored"
                );
            }
            Err(e) => {
                error!(
                    stream_key = redact(stream_key),
                    "publish end dropped, left to reconciliation: {}", e
                );
                self.telemetry.error_event(
                    stream_key,
                    "store_unavailable",
                    &e.to_string(),
                    props(json!({ "operation": "report_publish_end" })),
                );
            }
        }
    }

    /// Returns the closed row with its end time, or the last store error
    async fn close_with_retry(
        &self,
        stream_key: &str,
    ) -> Result<Option<(sessions::Model, i64)>, StoreError> {
        let attempts = self.config.end_retry_attempts.0.max(1);
        let mut attempt = 1;
        loop {
            let now = Utc::now().timestamp_millis();
            let result = self
                .bounded(async {
                    self.registry
                        .close_open(stream_key, now, EndReason::PublishEnd)
                        .await
                        .map_err(StoreError::from)
                })
                .await;

            match result {
                Ok(closed) => return Ok(closed.map(|closed| (closed, now))),
                Err(e) if attempt < attempts => {
                    warn!(
                        stream_key = redact(stream_key),
                        attempt, "publish end not recorded: {}", e
                    );
                    attempt += 1;
                    tokio::time::sleep(self.config.end_retry_backoff()).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Issue a new stream key for the account and close any session that is
    /// open under the old one.
    pub async fn rotate_stream_key(
        &self,
        account_id: Uuid,
    ) -> Result<Option<accounts::Model>, AccountError> {
        let Some((old_key, account)) = self.credentials.rotate_stream_key(account_id).await? else {
            return Ok(None);
        };

        let now = Utc::now().timestamp_millis();
        let closed = self
            .registry
            .close_open(&old_key, now, EndReason::Rotated)
            .await?;

        info!(
            account = %account.id,
            old_key = redact(&old_key),
            closed_session = ?closed.as_ref().map(|s| s.id),
            "stream key rotated"
        );
        self.telemetry.stream_lifecycle_event(
            &old_key,
            "stream_key_rotated",
            props(json!({
                "account_id": account.id.to_string(),
                "closed_session": closed.map(|s| s.id.to_string()),
            })),
        );

        Ok(Some(account))
    }

    async fn bounded<T, F>(&self, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.config.store_timeout();
        match tokio::time::timeout(timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::Timeout(timeout)),
        }
    }
}

pub(crate) fn props(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use sea_orm::{ConnectionTrait, TransactionTrait};

    use super::*;
    use crate::service::database::{tests::database, DatabaseService};
    use crate::telemetry::tests::{test_config, MemorySink};

    struct Fixture {
        _dir: tempfile::TempDir,
        db: DatabaseService,
        gateway: Gateway,
        credentials: CredentialStore,
        registry: SessionRegistry,
    }

    async fn fixture_with(config: config::Gateway, telemetry: Telemetry) -> Fixture {
        let (dir, db) = database().await;
        let credentials = CredentialStore::new(db.connection.clone());
        let registry = SessionRegistry::new(db.connection.clone());
        let gateway = Gateway::new(credentials.clone(), registry.clone(), telemetry, config);
        Fixture {
            _dir: dir,
            db,
            gateway,
            credentials,
            registry,
        }
    }

    async fn fixture() -> Fixture {
        fixture_with(config::Gateway::default(), Telemetry::Disabled).await
    }

    async fn account(f: &Fixture, key: &'static str) -> accounts::Model {
        f.credentials
            .create_account_with(&format!("{}@example.com", key), "secret", || key.to_string())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_key_is_rejected_without_rows() {
        let f = fixture().await;

        let decision = f.gateway.authorize_publish("unknown-key").await;

        assert_eq!(Decision::Reject(Rejection::UnknownKey), decision);
        assert_eq!(0, f.registry.count("unknown-key").await.unwrap());
        assert_eq!(
            Decision::Reject(Rejection::UnknownKey),
            f.gateway.authorize_publish("").await
        );
    }

    #[tokio::test]
    async fn test_duplicate_start_reuses_session() {
        let f = fixture().await;
        account(&f, "abc123").await;

        let first = f.gateway.authorize_publish("abc123").await;
        let second = f.gateway.authorize_publish("abc123").await;

        assert!(first.is_accept());
        assert_eq!(first, second);
        assert_eq!(1, f.registry.count("abc123").await.unwrap());
        assert_eq!(1, f.registry.count_open("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_start_restart_policy() {
        let config = config::Gateway {
            duplicate_start: DuplicateStart::Restart,
            ..Default::default()
        };
        let f = fixture_with(config, Telemetry::Disabled).await;
        account(&f, "abc123").await;

        let first = f.gateway.authorize_publish("abc123").await;
        let second = f.gateway.authorize_publish("abc123").await;

        assert!(first.is_accept() && second.is_accept());
        assert_ne!(first, second);
        assert_eq!(2, f.registry.count("abc123").await.unwrap());
        assert_eq!(1, f.registry.count_open("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_end_without_open_session_is_noop() {
        let f = fixture().await;
        account(&f, "abc123").await;

        f.gateway.report_publish_end("abc123").await;
        f.gateway.report_publish_end("unknown-key").await;

        assert_eq!(0, f.registry.count("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_start_end_replay() {
        let f = fixture().await;
        account(&f, "abc123").await;

        let Decision::Accept(id) = f.gateway.authorize_publish("abc123").await else {
            panic!("expected accept");
        };
        f.gateway.report_publish_end("abc123").await;
        let closed = f.registry.find_latest("abc123").await.unwrap().unwrap();
        f.gateway.report_publish_end("abc123").await;
        let replayed = f.registry.find_latest("abc123").await.unwrap().unwrap();

        assert_eq!(id, closed.id);
        assert!(closed.ended_at.is_some());
        assert_eq!(closed, replayed);
        assert_eq!(Some("publish_end".to_string()), closed.end_reason);
    }

    #[tokio::test]
    async fn test_concurrent_starts_open_one_session() {
        let f = fixture().await;
        account(&f, "abc123").await;

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let gateway = f.gateway.clone();
                tokio::spawn(async move { gateway.authorize_publish("abc123").await })
            })
            .collect();

        let mut accepted = Vec::new();
        for handle in handles {
            if let Decision::Accept(id) = handle.await.unwrap() {
                accepted.push(id);
            }
        }

        assert!(!accepted.is_empty());
        assert!(accepted.iter().all(|id| *id == accepted[0]));
        assert_eq!(1, f.registry.count_open("abc123").await.unwrap());
        assert_eq!(1, f.registry.count("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_restarts_keep_one_open_session() {
        let config = config::Gateway {
            duplicate_start: DuplicateStart::Restart,
            ..Default::default()
        };
        let f = fixture_with(config, Telemetry::Disabled).await;
        account(&f, "abc123").await;

        let handles: Vec<_> = (0..12)
            .map(|i| {
                let gateway = f.gateway.clone();
                tokio::spawn(async move {
                    if i % 3 == 0 {
                        gateway.report_publish_end("abc123").await;
                    } else {
                        gateway.authorize_publish("abc123").await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(f.registry.count_open("abc123").await.unwrap() <= 1);
    }

    #[tokio::test]
    async fn test_store_unavailable_fails_closed_and_end_fails_open() {
        let config = config::Gateway {
            end_retry_attempts: config::EndRetryAttempts(2),
            end_retry_backoff: config::EndRetryBackoff(1),
            ..Default::default()
        };
        let f = fixture_with(config, Telemetry::Disabled).await;
        account(&f, "abc123").await;
        f.db.connection.clone().close().await.unwrap();

        assert_eq!(
            Decision::Reject(Rejection::StoreUnavailable),
            f.gateway.authorize_publish("abc123").await
        );
        f.gateway.report_publish_end("abc123").await;
    }

    #[tokio::test]
    async fn test_end_acknowledged_within_edge_timeout_while_store_is_locked() {
        let f = fixture().await;
        account(&f, "abc123").await;
        assert!(f.gateway.authorize_publish("abc123").await.is_accept());

        // Hold the write lock so every close attempt stalls
        let txn = f.db.connection.begin().await.unwrap();
        txn.execute_unprepared("UPDATE accounts SET email = email")
            .await
            .unwrap();

        let config = config::Gateway::default();
        let started = std::time::Instant::now();
        f.gateway.report_publish_end("abc123").await;
        let elapsed = started.elapsed();

        assert!(elapsed < Duration::from_millis(config.edge_timeout.0));
        assert!(elapsed >= config.end_deadline());

        txn.rollback().await.unwrap();
        assert_eq!(1, f.registry.count_open("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_rotation_closes_open_session_and_revokes_key() {
        let f = fixture().await;
        let owner = account(&f, "abc123").await;
        assert!(f.gateway.authorize_publish("abc123").await.is_accept());

        let rotated = f.gateway.rotate_stream_key(owner.id).await.unwrap().unwrap();

        assert_ne!("abc123", rotated.stream_key);
        assert_eq!(0, f.registry.count_open("abc123").await.unwrap());
        let closed = f.registry.find_latest("abc123").await.unwrap().unwrap();
        assert_eq!(Some("rotated".to_string()), closed.end_reason);
        assert_eq!(
            Decision::Reject(Rejection::UnknownKey),
            f.gateway.authorize_publish("abc123").await
        );
        assert!(f.gateway.authorize_publish(&rotated.stream_key).await.is_accept());
        assert!(f.gateway.rotate_stream_key(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lifecycle_events_are_reported() {
        let sink = Arc::new(MemorySink::default());
        let telemetry = Telemetry::with_sink(sink.clone(), &test_config());
        let f = fixture_with(config::Gateway::default(), telemetry.clone()).await;
        account(&f, "abc123").await;

        f.gateway.authorize_publish("abc123").await;
        f.gateway.authorize_publish("unknown-key").await;
        f.gateway.report_publish_end("abc123").await;
        telemetry.flush(Duration::from_secs(1)).await;

        assert_eq!(
            vec!["stream_authorized", "stream_rejected", "stream_ended"],
            sink.names()
        );
    }
}
