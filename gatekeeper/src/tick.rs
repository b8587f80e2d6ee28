use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use tracing::{debug, error, warn};

use crate::gateway::props;
use crate::service::{
    credentials::redact,
    registry::{EndReason, SessionRegistry},
};
use crate::telemetry::Telemetry;
use crate::AppState;

pub async fn reconcile_check(state: AppState) {
    loop {
        let timeout = tokio::time::sleep(Duration::from_millis(
            state.config.reconcile.tick_time.0,
        ));
        tokio::pin!(timeout);
        let _ = timeout.as_mut().await;
        if let Err(e) = reconcile(
            &state.registry,
            &state.telemetry,
            state.config.reconcile.stale_after.0,
            Utc::now().timestamp_millis(),
        )
        .await
        {
            error!("reconcile sweep error: {:?}", e);
        }
    }
}

/// Close open sessions that started more than `stale_after` milliseconds
/// before `now`. They are closed at the threshold boundary, the latest time
/// the stream can be assumed to have been live. Returns the number closed.
pub async fn reconcile(
    registry: &SessionRegistry,
    telemetry: &Telemetry,
    stale_after: u64,
    now: i64,
) -> anyhow::Result<u64> {
    let cutoff = now.saturating_sub(i64::try_from(stale_after).unwrap_or(i64::MAX));
    let stale = registry.find_stale(cutoff).await?;

    let mut reaped = 0;
    for session in stale {
        // An end notification or a restart may have closed it meanwhile
        if !registry
            .close_session(session.id, cutoff, EndReason::Reaped)
            .await?
        {
            continue;
        }

        reaped += 1;
        warn!(
            stream_key = redact(&session.stream_key),
            session = %session.id,
            started_at = session.started_at,
            "stale session reaped, publish end never reported"
        );
        telemetry.stream_lifecycle_event(
            &session.stream_key,
            "stream_reaped",
            props(json!({
                "session_id": session.id.to_string(),
                "account_id": session.account_id.to_string(),
                "started_at": session.started_at,
                "ended_at": cutoff,
            })),
        );
    }

    debug!(reaped, "reconcile sweep finished");
    Ok(reaped)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use uuid::Uuid;

    use super::*;
    use crate::service::database::tests::database;
    use crate::telemetry::tests::{test_config, MemorySink};

    const HOUR: u64 = 60 * 60 * 1000;

    #[tokio::test]
    async fn test_reconcile_closes_only_stale_sessions() {
        let (_dir, db) = database().await;
        let registry = SessionRegistry::new(db.connection.clone());
        let sink = Arc::new(MemorySink::default());
        let telemetry = Telemetry::with_sink(sink.clone(), &test_config());
        let now = 100 * HOUR as i64;

        registry
            .open_if_none(Uuid::new_v4(), "stale", now - 13 * HOUR as i64)
            .await
            .unwrap();
        registry
            .open_if_none(Uuid::new_v4(), "fresh", now - HOUR as i64)
            .await
            .unwrap();

        let reaped = reconcile(&registry, &telemetry, 12 * HOUR, now).await.unwrap();
        telemetry.flush(Duration::from_secs(1)).await;

        assert_eq!(1, reaped);
        let closed = registry.find_latest("stale").await.unwrap().unwrap();
        assert_eq!(Some(now - 12 * HOUR as i64), closed.ended_at);
        assert_eq!(Some("reaped".to_string()), closed.end_reason);
        assert_eq!(1, registry.count_open("fresh").await.unwrap());
        assert_eq!(vec!["stream_reaped"], sink.names());
    }

    #[tokio::test]
    async fn test_reconcile_is_repeatable() {
        let (_dir, db) = database().await;
        let registry = SessionRegistry::new(db.connection.clone());
        let now = 100 * HOUR as i64;
        registry
            .open_if_none(Uuid::new_v4(), "stale", now - 13 * HOUR as i64)
            .await
            .unwrap();

        assert_eq!(1, reconcile(&registry, &Telemetry::Disabled, 12 * HOUR, now).await.unwrap());
        assert_eq!(0, reconcile(&registry, &Telemetry::Disabled, 12 * HOUR, now).await.unwrap());
    }

    #[tokio::test]
    async fn test_huge_stale_after_reaps_nothing() {
        let (_dir, db) = database().await;
        let registry = SessionRegistry::new(db.connection.clone());
        registry.open_if_none(Uuid::new_v4(), "abc123", 1_000).await.unwrap();

        let reaped = reconcile(&registry, &Telemetry::Disabled, u64::MAX, 100 * HOUR as i64)
            .await
            .unwrap();

        assert_eq!(0, reaped);
        assert_eq!(1, registry.count_open("abc123").await.unwrap());
    }

    #[tokio::test]
    async fn test_key_reopens_after_reap() {
        let (_dir, db) = database().await;
        let registry = SessionRegistry::new(db.connection.clone());
        let account = Uuid::new_v4();
        let now = 100 * HOUR as i64;
        registry
            .open_if_none(account, "abc123", now - 13 * HOUR as i64)
            .await
            .unwrap();

        reconcile(&registry, &Telemetry::Disabled, 12 * HOUR, now).await.unwrap();
        let reopened = registry.open_if_none(account, "abc123", now).await.unwrap();

        assert_eq!(now, reopened.session().started_at);
        assert_eq!(1, registry.count_open("abc123").await.unwrap());
    }
}
