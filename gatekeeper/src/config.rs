use serde::{Deserialize, Serialize};
use std::{env, fs, net::SocketAddr, str::FromStr, time::Duration};

#[derive(Debug, Default, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub http: Http,
    #[serde(default)]
    pub auth: Auth,
    #[serde(default)]
    pub log: Log,
    #[serde(default)]
    pub database: Database,
    #[serde(default)]
    pub gateway: Gateway,
    #[serde(default)]
    pub reconcile: Reconcile,
    #[serde(default)]
    pub telemetry: Telemetry,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Http {
    #[serde(default = "default_http_listen")]
    pub listen: SocketAddr,
    #[serde(default)]
    pub cors: bool,
}

/// Bearer tokens accepted by the dashboard and operator API.
/// Empty means the API is open; the edge callbacks are never token protected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub tokens: Vec<String>,
}

impl Auth {
    pub fn to_authorizations(&self) -> Vec<String> {
        self.tokens
            .iter()
            .map(|token| format!("Bearer {}", token))
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Log {
    #[serde(default = "default_log_level")]
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Database {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,
}

/// What to do when a publish start arrives for a key that already has an open session
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DuplicateStart {
    /// Keep the open session and accept
    #[default]
    Reuse,
    /// Close the open session and open a fresh one
    Restart,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Gateway {
    #[serde(default)]
    pub store_timeout: StoreTimeout,
    #[serde(default)]
    pub edge_timeout: EdgeTimeout,
    #[serde(default)]
    pub end_retry_attempts: EndRetryAttempts,
    #[serde(default)]
    pub end_retry_backoff: EndRetryBackoff,
    #[serde(default)]
    pub end_deadline: EndDeadline,
    #[serde(default)]
    pub duplicate_start: DuplicateStart,
}

/// Milliseconds, bound on every store call made while the edge waits
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StoreTimeout(pub u64);

impl Default for StoreTimeout {
    fn default() -> Self {
        StoreTimeout(2000)
    }
}

/// Milliseconds, the ingest edge's own handshake timeout
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EdgeTimeout(pub u64);

impl Default for EdgeTimeout {
    fn default() -> Self {
        EdgeTimeout(5000)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndRetryAttempts(pub u8);

impl Default for EndRetryAttempts {
    fn default() -> Self {
        EndRetryAttempts(3)
    }
}

/// Milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndRetryBackoff(pub u64);

impl Default for EndRetryBackoff {
    fn default() -> Self {
        EndRetryBackoff(200)
    }
}

/// Milliseconds for the whole publish end path, retries included
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EndDeadline(pub u64);

impl Default for EndDeadline {
    fn default() -> Self {
        EndDeadline(4000)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Reconcile {
    #[serde(default)]
    pub tick_time: ReconcileTickTime,
    #[serde(default)]
    pub stale_after: StaleAfter,
}

/// Milliseconds
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ReconcileTickTime(pub u64);

impl Default for ReconcileTickTime {
    fn default() -> Self {
        ReconcileTickTime(60 * 1000)
    }
}

/// One year, far beyond any broadcast
pub const MAX_STALE_AFTER: u64 = 365 * 24 * 60 * 60 * 1000;

/// Milliseconds an open session may live without an end notification
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StaleAfter(pub u64);

impl Default for StaleAfter {
    fn default() -> Self {
        StaleAfter(12 * 60 * 60 * 1000)
    }
}

/// PostHog compatible analytics sink. Reporting is disabled unless both
/// `api_key` and `host` are set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Telemetry {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default = "default_server_role")]
    pub server_role: String,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Milliseconds
    #[serde(default = "default_flush_interval")]
    pub flush_interval: u64,
    /// Milliseconds, per delivery request
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout: u64,
    #[serde(default = "default_delivery_attempts")]
    pub delivery_attempts: u8,
    /// Milliseconds granted to drain the queue at shutdown
    #[serde(default = "default_flush_deadline")]
    pub flush_deadline: u64,
}

impl Default for Telemetry {
    fn default() -> Self {
        Self {
            api_key: None,
            host: None,
            environment: default_environment(),
            server_role: default_server_role(),
            queue_capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            flush_interval: default_flush_interval(),
            delivery_timeout: default_delivery_timeout(),
            delivery_attempts: default_delivery_attempts(),
            flush_deadline: default_flush_deadline(),
        }
    }
}

impl Telemetry {
    pub fn is_enabled(&self) -> bool {
        matches!((&self.api_key, &self.host), (Some(key), Some(host)) if !key.is_empty() && !host.is_empty())
    }
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from_str(&format!(
        "0.0.0.0:{}",
        env::var("PORT").unwrap_or(String::from("8080"))
    ))
    .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], 8080)))
}

impl Default for Http {
    fn default() -> Self {
        Self {
            listen: default_http_listen(),
            cors: Default::default(),
        }
    }
}

impl Default for Log {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    env::var("LOG_LEVEL").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug".to_string()
        } else {
            "info".to_string()
        }
    })
}

impl Default for Database {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            max_connections: default_max_connections(),
            connect_timeout: default_connect_timeout(),
        }
    }
}

fn default_database_url() -> String {
    env::var("DATABASE_URL").unwrap_or(String::from("sqlite://streamgate.db?mode=rwc"))
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_environment() -> String {
    env::var("ENVIRONMENT").unwrap_or(String::from("development"))
}

fn default_server_role() -> String {
    String::from("media_server")
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_interval() -> u64 {
    1000
}

fn default_delivery_timeout() -> u64 {
    3000
}

fn default_delivery_attempts() -> u8 {
    2
}

fn default_flush_deadline() -> u64 {
    5000
}

impl Gateway {
    pub fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout.0)
    }

    pub fn end_retry_backoff(&self) -> Duration {
        Duration::from_millis(self.end_retry_backoff.0)
    }

    pub fn end_deadline(&self) -> Duration {
        Duration::from_millis(self.end_deadline.0)
    }
}

impl Config {
    pub fn parse(path: Option<String>) -> anyhow::Result<Self> {
        let result = fs::read_to_string(path.unwrap_or(String::from("streamgate.toml")))
            .or(fs::read_to_string("/etc/streamgate/streamgate.toml"))
            .unwrap_or("".to_string());
        let cfg: Self = toml::from_str(result.as_str())
            .map_err(|e| anyhow::anyhow!("config parse error: {}", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.gateway.store_timeout.0 == 0 {
            return Err(anyhow::anyhow!("gateway.store_timeout must be positive"));
        }

        if self.gateway.store_timeout.0 >= self.gateway.edge_timeout.0 {
            return Err(anyhow::anyhow!(
                "gateway.store_timeout ({}ms) must be shorter than gateway.edge_timeout ({}ms)",
                self.gateway.store_timeout.0,
                self.gateway.edge_timeout.0
            ));
        }

        if self.gateway.end_deadline.0 == 0
            || self.gateway.end_deadline.0 >= self.gateway.edge_timeout.0
        {
            return Err(anyhow::anyhow!(
                "gateway.end_deadline ({}ms) must be positive and shorter than gateway.edge_timeout ({}ms)",
                self.gateway.end_deadline.0,
                self.gateway.edge_timeout.0
            ));
        }

        if self.reconcile.stale_after.0 > MAX_STALE_AFTER {
            return Err(anyhow::anyhow!(
                "reconcile.stale_after must not exceed {}ms",
                MAX_STALE_AFTER
            ));
        }

        if self.reconcile.tick_time.0 == 0 || self.reconcile.stale_after.0 == 0 {
            return Err(anyhow::anyhow!(
                "reconcile.tick_time and reconcile.stale_after must be positive"
            ));
        }

        if self.telemetry.queue_capacity == 0
            || self.telemetry.batch_size == 0
            || self.telemetry.flush_interval == 0
        {
            return Err(anyhow::anyhow!(
                "telemetry.queue_capacity, batch_size and flush_interval must be positive"
            ));
        }

        Ok(())
    }
}
