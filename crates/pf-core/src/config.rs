//! Configuration parsing for the price-feed system.
//!
//! All components read their settings from a single JSON config file with
//! three sections: the `stream` connection, the `store` write path and
//! `logging`. Only the credentials are mandatory in practice; everything else
//! has a default.
//!
//! # Example config
//!
//! ```json
//! {
//!   "stream": {
//!     "endpoint": "integration",
//!     "app_key": "aBcDeF123",
//!     "session_token": "Xyz...",
//!     "conflate_ms": 500
//!   },
//!   "store": { "database_url": "sqlite://prices.db", "throttle_window_ms": 5000 },
//!   "logging": { "level": "info", "log_dir": "/var/log/pricefeed" }
//! }
//! ```

use std::time::Duration;

use serde::Deserialize;

use crate::types::Endpoint;

/// Top-level application config, deserialized from a JSON file.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Feed connection settings.
    pub stream: StreamConfig,

    /// Persistence settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Settings for one streaming connection.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// Which feed host to use when `host` is not set.
    #[serde(default)]
    pub endpoint: Endpoint,

    /// Explicit host override (e.g. a local relay).
    #[serde(default)]
    pub host: Option<String>,

    /// TLS port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application key sent in the authentication message.
    #[serde(default)]
    pub app_key: String,

    /// Session token sent in the authentication message.
    #[serde(default)]
    pub session_token: String,

    /// Deadline for any correlated request (authentication, subscriptions).
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Bound on TCP connect + TLS handshake.
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Conflation interval requested on subscriptions.
    #[serde(default)]
    pub conflate_ms: Option<u64>,

    /// Server heartbeat interval requested on subscriptions.
    #[serde(default)]
    pub heartbeat_ms: Option<u64>,

    /// Capacity of the bounded event channel towards observers.
    #[serde(default = "default_event_capacity")]
    pub event_channel_capacity: usize,

    /// Label used as the log prefix for this connection.
    #[serde(default = "default_label")]
    pub label: String,
}

impl StreamConfig {
    /// Returns the host to connect to: the override if present, else the endpoint's host.
    pub fn host(&self) -> &str {
        self.host.as_deref().unwrap_or_else(|| self.endpoint.host())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: Endpoint::default(),
            host: None,
            port: default_port(),
            app_key: String::new(),
            session_token: String::new(),
            request_timeout_ms: default_request_timeout_ms(),
            connect_timeout_ms: default_connect_timeout_ms(),
            conflate_ms: None,
            heartbeat_ms: None,
            event_channel_capacity: default_event_capacity(),
            label: default_label(),
        }
    }
}

/// Settings for the throttled persistence writer.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// sqlx connection URL (e.g. `sqlite://prices.db`, `sqlite::memory:`).
    #[serde(default = "default_database_url")]
    pub database_url: String,

    /// Pool size.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum interval between persisted delta writes for one market.
    #[serde(default = "default_throttle_window_ms")]
    pub throttle_window_ms: u64,

    /// Capacity of the writer's queue; submissions beyond it are dropped.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Attempts per write op on transient errors (including the first).
    #[serde(default = "default_retry_attempts")]
    pub retry_max_attempts: u32,

    /// First backoff delay; doubles per attempt.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_delay_ms: u64,

    /// Backoff ceiling.
    #[serde(default = "default_retry_max_ms")]
    pub retry_max_delay_ms: u64,
}

impl StoreConfig {
    pub fn throttle_window(&self) -> Duration {
        Duration::from_millis(self.throttle_window_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_max_connections(),
            throttle_window_ms: default_throttle_window_ms(),
            queue_capacity: default_queue_capacity(),
            retry_max_attempts: default_retry_attempts(),
            retry_base_delay_ms: default_retry_base_ms(),
            retry_max_delay_ms: default_retry_max_ms(),
        }
    }
}

/// Logging block.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub log_dir: Option<String>,
    #[serde(default = "default_module_name")]
    pub module_name: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            log_dir: None,
            module_name: default_module_name(),
        }
    }
}

/// Load and parse a JSON config file.
pub fn load_config(path: &std::path::Path) -> anyhow::Result<AppConfig> {
    let content = std::fs::read_to_string(path)?;
    let config: AppConfig = serde_json::from_str(&content)?;
    tracing::info!(
        "[config] loaded {} (endpoint {}, store {})",
        path.display(),
        config.stream.host(),
        config.store.database_url
    );
    Ok(config)
}

// ---------------------------------------------------------------------------
// Defaults (used by serde)
// ---------------------------------------------------------------------------

fn default_port() -> u16 {
    443
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_connect_timeout_ms() -> u64 {
    15_000
}

fn default_event_capacity() -> usize {
    4096
}

fn default_label() -> String {
    "stream".into()
}

fn default_database_url() -> String {
    "sqlite://prices.db".into()
}

fn default_max_connections() -> u32 {
    4
}

fn default_throttle_window_ms() -> u64 {
    5_000
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_base_ms() -> u64 {
    50
}

fn default_retry_max_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".into()
}

fn default_module_name() -> String {
    "pricefeed".into()
}
