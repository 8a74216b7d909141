//! Configuration loading for nostr-sync clients.
//!
//! Configuration is loaded from a TOML file (default: `config.toml` in the
//! data directory). Every field has a default, so an empty file is valid.

use nostr_sync_core::Backoff;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration for a nostr-sync client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Relay URLs to connect to.
    #[serde(default = "default_relays")]
    pub relays: Vec<String>,
    /// Relay pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
    /// Per-relay connection configuration.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Reconciler configuration.
    #[serde(default)]
    pub reconciler: ReconcilerConfig,
}

/// Relay pool configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Number of event ids remembered for deduplication (default: 10000).
    #[serde(default = "default_dedup_capacity")]
    pub dedup_capacity: usize,
    /// Capacity of the connection-to-pool report queue (default: 1024).
    #[serde(default = "default_inbound_queue")]
    pub inbound_queue: usize,
    /// Capacity of the pool-to-reconciler event queue (default: 256).
    #[serde(default = "default_event_queue")]
    pub event_queue: usize,
}

/// Per-relay connection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Timeout in seconds for one connect attempt (default: 10).
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// First reconnect delay in milliseconds (default: 1000).
    #[serde(default = "default_backoff_initial_ms")]
    pub backoff_initial_ms: u64,
    /// Cap on the reconnect delay in seconds (default: 60).
    #[serde(default = "default_backoff_max_secs")]
    pub backoff_max_secs: u64,
    /// Upper bound on random jitter added to each delay (default: 1000).
    #[serde(default = "default_backoff_jitter_ms")]
    pub backoff_jitter_ms: u64,
    /// Publishes buffered while the relay is not open (default: 64).
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
    /// Seconds to wait for a relay's OK before the publish fails (default: 10).
    #[serde(default = "default_ok_timeout_secs")]
    pub ok_timeout_secs: u64,
}

/// Reconciler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcilerConfig {
    /// Storage retries per event before deferring it (default: 3).
    #[serde(default = "default_storage_retries")]
    pub storage_retries: u32,
    /// First retry delay in milliseconds, doubled per retry (default: 200).
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    /// Events kept for a later retry when storage stays down (default: 256).
    #[serde(default = "default_deferred_capacity")]
    pub deferred_capacity: usize,
}

// Default value functions
fn default_relays() -> Vec<String> {
    Vec::new()
}

fn default_dedup_capacity() -> usize {
    10_000
}

fn default_inbound_queue() -> usize {
    1024
}

fn default_event_queue() -> usize {
    256
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_backoff_initial_ms() -> u64 {
    1000
}

fn default_backoff_max_secs() -> u64 {
    60
}

fn default_backoff_jitter_ms() -> u64 {
    1000
}

fn default_outbox_capacity() -> usize {
    64
}

fn default_ok_timeout_secs() -> u64 {
    10
}

fn default_storage_retries() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_deferred_capacity() -> usize {
    256
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            relays: default_relays(),
            pool: PoolConfig::default(),
            connection: ConnectionConfig::default(),
            reconciler: ReconcilerConfig::default(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            dedup_capacity: default_dedup_capacity(),
            inbound_queue: default_inbound_queue(),
            event_queue: default_event_queue(),
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout_secs(),
            backoff_initial_ms: default_backoff_initial_ms(),
            backoff_max_secs: default_backoff_max_secs(),
            backoff_jitter_ms: default_backoff_jitter_ms(),
            outbox_capacity: default_outbox_capacity(),
            ok_timeout_secs: default_ok_timeout_secs(),
        }
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            storage_retries: default_storage_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            deferred_capacity: default_deferred_capacity(),
        }
    }
}

impl ClientConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Builder-style relay list override.
    pub fn with_relays<I, S>(mut self, relays: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.relays = relays.into_iter().map(Into::into).collect();
        self
    }
}

impl ConnectionConfig {
    /// Reconnect backoff policy.
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.backoff_initial_ms),
            Duration::from_secs(self.backoff_max_secs),
            Duration::from_millis(self.backoff_jitter_ms),
        )
    }

    /// Timeout for one connect attempt.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Time a publish may wait for a relay's OK.
    pub fn ok_timeout(&self) -> Duration {
        Duration::from_secs(self.ok_timeout_secs)
    }
}

impl ReconcilerConfig {
    /// Delay before retry number `retry` (1-based).
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = 1u64 << retry.saturating_sub(1).min(16);
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor))
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.relays.is_empty());
        assert_eq!(config.pool.dedup_capacity, 10_000);
        assert_eq!(config.connection.connect_timeout_secs, 10);
        assert_eq!(config.reconciler.storage_retries, 3);
    }

    #[test]
    fn config_from_toml_string() {
        let toml = r#"
relays = ["wss://relay.one", "wss://relay.two"]

[pool]
dedup_capacity = 500

[connection]
ok_timeout_secs = 3
backoff_initial_ms = 50

[reconciler]
deferred_capacity = 8
"#;

        let config: ClientConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.relays, vec!["wss://relay.one", "wss://relay.two"]);
        assert_eq!(config.pool.dedup_capacity, 500);
        assert_eq!(config.pool.event_queue, 256);
        assert_eq!(config.connection.ok_timeout(), Duration::from_secs(3));
        assert_eq!(config.connection.backoff().initial, Duration::from_millis(50));
        assert_eq!(config.reconciler.deferred_capacity, 8);
    }

    #[test]
    fn config_missing_sections_use_defaults() {
        let config: ClientConfig = toml::from_str("").unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn config_serializes_back_to_toml() {
        let config = ClientConfig::default().with_relays(["wss://relay.one"]);
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: ClientConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn retry_delay_doubles() {
        let config = ReconcilerConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(2), Duration::from_millis(400));
        assert_eq!(config.retry_delay(3), Duration::from_millis(800));
    }

    #[test]
    fn from_file_reports_path_on_errors() {
        let missing = std::path::Path::new("/nonexistent/config.toml");
        assert!(matches!(
            ClientConfig::from_file(missing),
            Err(ConfigError::ReadError { .. })
        ));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "relays = 5").unwrap();
        assert!(matches!(
            ClientConfig::from_file(file.path()),
            Err(ConfigError::ParseError { .. })
        ));
    }
}
