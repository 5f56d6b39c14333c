//! Configuration for the marketplace ledger

use crate::types::Currency;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Metrics listen address
    pub metrics_listen_addr: String,

    /// Currency assigned to lazily created wallets
    pub default_currency: Currency,

    /// RocksDB configuration
    pub rocksdb: RocksDbConfig,

    /// Store/command configuration
    pub store: StoreConfig,

    /// Notification configuration
    pub notify: NotifyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/escrow"),
            service_name: "escrow-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            metrics_listen_addr: "0.0.0.0:9090".to_string(),
            default_currency: Currency::USD,
            rocksdb: RocksDbConfig::default(),
            store: StoreConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RocksDbConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            target_file_size_mb: 64,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Store/command configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Per-operation timeout (milliseconds); expiry aborts the atomic scope
    pub op_timeout_ms: u64,

    /// Command mailbox depth (backpressure bound)
    pub command_queue_depth: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            op_timeout_ms: 5_000,
            command_queue_depth: 1_000,
        }
    }
}

/// Notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    /// Broadcast channel capacity; slow subscribers lose oldest notices
    pub channel_capacity: usize,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self { channel_capacity: 256 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::InvalidState(format!("failed to read config: {}", e)))?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::InvalidState(format!("failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load defaults with environment overrides
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ESCROW_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(addr) = std::env::var("ESCROW_METRICS_ADDR") {
            config.metrics_listen_addr = addr;
        }

        if let Ok(currency) = std::env::var("ESCROW_DEFAULT_CURRENCY") {
            config.default_currency = Currency::parse(&currency).ok_or_else(|| {
                crate::Error::InvalidState(format!("unknown currency: {}", currency))
            })?;
        }

        if let Ok(timeout) = std::env::var("ESCROW_OP_TIMEOUT_MS") {
            config.store.op_timeout_ms = timeout.parse().map_err(|_| {
                crate::Error::InvalidState(format!("invalid timeout: {}", timeout))
            })?;
        }

        Ok(config)
    }
}
