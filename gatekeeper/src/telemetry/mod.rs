//! Best-effort analytics for stream lifecycle, relay, error and performance events.
//!
//! Submissions never block and never fail the caller. Events go into a bounded
//! queue drained by a worker task that batches them to an [`EventSink`]; a full
//! queue or an unreachable sink only costs events, never a publish decision.

pub mod posthog;

use std::{fmt::Debug, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::config;

pub const ERROR_EVENT: &str = "media_server_error";
pub const PERFORMANCE_EVENT: &str = "performance_metric";

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Event {
    pub event: String,
    pub distinct_id: String,
    pub properties: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait EventSink: Debug + Send + Sync {
    async fn deliver(&self, batch: &[Event]) -> anyhow::Result<()>;
}

/// Tags attached to every event
#[derive(Clone, Debug)]
struct Enrichment {
    environment: String,
    server_role: String,
}

enum Command {
    Capture(Event),
    Flush(oneshot::Sender<()>),
}

#[derive(Clone, Debug)]
pub struct Reporter {
    sender: mpsc::Sender<Command>,
    enrichment: Arc<Enrichment>,
}

impl Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Capture(event) => write!(f, "Capture({})", event.event),
            Command::Flush(_) => f.write_str("Flush"),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub enum Telemetry {
    /// No sink configured, every call is a no-op
    #[default]
    Disabled,
    Enabled(Reporter),
}

impl Telemetry {
    /// Build from configuration. Must run inside a tokio runtime when enabled.
    pub fn new(cfg: &config::Telemetry) -> Self {
        match (&cfg.api_key, &cfg.host) {
            (Some(api_key), Some(host)) if cfg.is_enabled() => {
                match posthog::PostHogSink::new(
                    api_key.clone(),
                    host.clone(),
                    Duration::from_millis(cfg.delivery_timeout),
                ) {
                    Ok(sink) => {
                        info!(%host, "telemetry enabled");
                        Self::with_sink(Arc::new(sink), cfg)
                    }
                    Err(e) => {
                        error!("telemetry sink setup failed, reporting disabled: {:?}", e);
                        Telemetry::Disabled
                    }
                }
            }
            _ => {
                info!("telemetry disabled: missing api key or host");
                Telemetry::Disabled
            }
        }
    }

    pub fn with_sink(sink: Arc<dyn EventSink>, cfg: &config::Telemetry) -> Self {
        let (sender, receiver) = mpsc::channel(cfg.queue_capacity);
        tokio::spawn(worker(
            receiver,
            sink,
            cfg.batch_size,
            Duration::from_millis(cfg.flush_interval),
            cfg.delivery_attempts.max(1),
        ));
        Telemetry::Enabled(Reporter {
            sender,
            enrichment: Arc::new(Enrichment {
                environment: cfg.environment.clone(),
                server_role: cfg.server_role.clone(),
            }),
        })
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, Telemetry::Enabled(_))
    }

    pub fn stream_lifecycle_event(&self, stream_key: &str, event: &str, properties: Map<String, Value>) {
        self.capture(stream_key, event, "stream_key", properties);
    }

    pub fn connection_event(&self, connection_id: &str, event: &str, properties: Map<String, Value>) {
        self.capture(connection_id, event, "connection_id", properties);
    }

    pub fn relay_event(
        &self,
        stream_key: &str,
        destination: &str,
        event: &str,
        mut properties: Map<String, Value>,
    ) {
        properties.insert("destination_url".to_string(), destination.into());
        self.stream_lifecycle_event(stream_key, event, properties);
    }

    pub fn error_event(
        &self,
        stream_key: &str,
        error_type: &str,
        error_message: &str,
        mut properties: Map<String, Value>,
    ) {
        properties.insert("error_type".to_string(), error_type.into());
        properties.insert("error_message".to_string(), error_message.into());
        self.stream_lifecycle_event(stream_key, ERROR_EVENT, properties);
    }

    pub fn performance_metric(
        &self,
        stream_key: &str,
        metric_name: &str,
        value: f64,
        mut properties: Map<String, Value>,
    ) {
        properties.insert("metric_name".to_string(), metric_name.into());
        properties.insert("metric_value".to_string(), value.into());
        self.stream_lifecycle_event(stream_key, PERFORMANCE_EVENT, properties);
    }

    fn capture(&self, distinct_id: &str, event: &str, id_field: &str, mut properties: Map<String, Value>) {
        let Telemetry::Enabled(reporter) = self else {
            return;
        };

        let now = Utc::now();
        properties.insert(id_field.to_string(), distinct_id.into());
        properties.insert("timestamp".to_string(), now.to_rfc3339().into());
        properties.insert(
            "environment".to_string(),
            reporter.enrichment.environment.clone().into(),
        );
        properties.insert(
            "server_type".to_string(),
            reporter.enrichment.server_role.clone().into(),
        );

        let event = Event {
            event: event.to_string(),
            distinct_id: distinct_id.to_string(),
            properties,
            timestamp: now,
        };

        match reporter.sender.try_send(Command::Capture(event)) {
            Ok(_) => {}
            Err(mpsc::error::TrySendError::Full(cmd)) => {
                warn!("telemetry queue full, dropping {:?}", cmd)
            }
            Err(mpsc::error::TrySendError::Closed(cmd)) => {
                debug!("telemetry worker gone, dropping {:?}", cmd)
            }
        }
    }

    /// Deliver everything queued so far, waiting at most `deadline`.
    /// Only meant for shutdown; partial delivery is acceptable.
    pub async fn flush(&self, deadline: Duration) {
        let Telemetry::Enabled(reporter) = self else {
            return;
        };

        let (tx, rx) = oneshot::channel();
        let drained = tokio::time::timeout(deadline, async {
            reporter.sender.send(Command::Flush(tx)).await.ok()?;
            rx.await.ok()
        })
        .await;

        match drained {
            Ok(Some(())) => debug!("telemetry flushed"),
            Ok(None) => debug!("telemetry worker already stopped"),
            Err(_) => warn!("telemetry flush deadline {:?} exceeded", deadline),
        }
    }
}

async fn worker(
    mut receiver: mpsc::Receiver<Command>,
    sink: Arc<dyn EventSink>,
    batch_size: usize,
    flush_interval: Duration,
    attempts: u8,
) {
    let mut buffer: Vec<Event> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            cmd = receiver.recv() => match cmd {
                Some(Command::Capture(event)) => {
                    buffer.push(event);
                    if buffer.len() >= batch_size {
                        deliver(sink.as_ref(), &mut buffer, attempts).await;
                    }
                }
                Some(Command::Flush(ack)) => {
                    deliver(sink.as_ref(), &mut buffer, attempts).await;
                    let _ = ack.send(());
                }
                None => {
                    deliver(sink.as_ref(), &mut buffer, attempts).await;
                    debug!("telemetry worker stopped");
                    return;
                }
            },
            _ = ticker.tick() => {
                deliver(sink.as_ref(), &mut buffer, attempts).await;
            }
        }
    }
}

async fn deliver(sink: &dyn EventSink, buffer: &mut Vec<Event>, attempts: u8) {
    if buffer.is_empty() {
        return;
    }

    let batch = std::mem::take(buffer);
    for attempt in 1..=attempts {
        match sink.deliver(&batch).await {
            Ok(_) => {
                debug!(events = batch.len(), "telemetry delivered");
                return;
            }
            Err(e) => warn!(attempt, "telemetry delivery failed: {:?}", e),
        }
    }
    error!(events = batch.len(), "telemetry batch dropped after {} attempts", attempts);
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    /// Keeps every delivered event
    #[derive(Debug, Default)]
    pub(crate) struct MemorySink {
        pub events: Mutex<Vec<Event>>,
    }

    impl MemorySink {
        pub fn names(&self) -> Vec<String> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event.clone())
                .collect()
        }
    }

    #[async_trait]
    impl EventSink for MemorySink {
        async fn deliver(&self, batch: &[Event]) -> anyhow::Result<()> {
            self.events.lock().unwrap().extend_from_slice(batch);
            Ok(())
        }
    }

    #[derive(Debug, Default)]
    struct FailingSink {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EventSink for FailingSink {
        async fn deliver(&self, _batch: &[Event]) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(anyhow::anyhow!("sink unreachable"))
        }
    }

    /// Never finishes a delivery
    #[derive(Debug)]
    struct StuckSink;

    #[async_trait]
    impl EventSink for StuckSink {
        async fn deliver(&self, _batch: &[Event]) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    pub(crate) fn test_config() -> config::Telemetry {
        config::Telemetry {
            environment: "test".to_string(),
            flush_interval: 60 * 1000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let telemetry = Telemetry::new(&config::Telemetry::default());
        assert!(!telemetry.is_enabled());
        telemetry.stream_lifecycle_event("abc123", "stream_authorized", Map::new());
        telemetry.flush(Duration::from_millis(10)).await;
    }

    #[tokio::test]
    async fn test_events_are_enriched() {
        let sink = Arc::new(MemorySink::default());
        let telemetry = Telemetry::with_sink(sink.clone(), &test_config());

        telemetry.relay_event("abc123", "rtmp://live.twitch.tv/app", "relay_push_started", Map::new());
        telemetry.error_event("abc123", "relay_error", "connection refused", Map::new());
        telemetry.performance_metric("abc123", "bitrate_kbps", 4500.0, Map::new());
        telemetry.connection_event("conn-1", "client_connected", Map::new());
        telemetry.flush(Duration::from_secs(1)).await;

        let events = sink.events.lock().unwrap().clone();
        assert_eq!(4, events.len());

        let relay = &events[0];
        assert_eq!("relay_push_started", relay.event);
        assert_eq!("abc123", relay.distinct_id);
        assert_eq!(Some(&Value::from("abc123")), relay.properties.get("stream_key"));
        assert_eq!(
            Some(&Value::from("rtmp://live.twitch.tv/app")),
            relay.properties.get("destination_url")
        );
        assert_eq!(Some(&Value::from("test")), relay.properties.get("environment"));
        assert_eq!(Some(&Value::from("media_server")), relay.properties.get("server_type"));
        assert!(relay.properties.contains_key("timestamp"));

        assert_eq!(ERROR_EVENT, events[1].event);
        assert_eq!(Some(&Value::from("relay_error")), events[1].properties.get("error_type"));
        assert_eq!(PERFORMANCE_EVENT, events[2].event);
        assert_eq!(Some(&Value::from(4500.0)), events[2].properties.get("metric_value"));
        assert_eq!(Some(&Value::from("conn-1")), events[3].properties.get("connection_id"));
    }

    #[tokio::test]
    async fn test_batch_size_triggers_delivery() {
        let sink = Arc::new(MemorySink::default());
        let cfg = config::Telemetry {
            batch_size: 2,
            ..test_config()
        };
        let telemetry = Telemetry::with_sink(sink.clone(), &cfg);

        telemetry.stream_lifecycle_event("a", "stream_authorized", Map::new());
        telemetry.stream_lifecycle_event("b", "stream_authorized", Map::new());

        for _ in 0..100 {
            if sink.events.lock().unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(2, sink.events.lock().unwrap().len());
    }

    #[tokio::test]
    async fn test_failed_delivery_is_bounded_and_swallowed() {
        let sink = Arc::new(FailingSink::default());
        let cfg = config::Telemetry {
            delivery_attempts: 3,
            ..test_config()
        };
        let telemetry = Telemetry::with_sink(sink.clone(), &cfg);

        telemetry.stream_lifecycle_event("abc123", "stream_ended", Map::new());
        telemetry.flush(Duration::from_secs(1)).await;
        telemetry.flush(Duration::from_secs(1)).await;

        assert_eq!(3, sink.calls.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let cfg = config::Telemetry {
            queue_capacity: 1,
            batch_size: 1,
            ..test_config()
        };
        let telemetry = Telemetry::with_sink(Arc::new(StuckSink), &cfg);

        for _ in 0..100 {
            telemetry.stream_lifecycle_event("abc123", "stream_authorized", Map::new());
        }

        let started = std::time::Instant::now();
        telemetry.flush(Duration::from_millis(50)).await;
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
