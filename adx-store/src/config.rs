//! Configuration for the event store

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Storage engine
    pub backend: BackendKind,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Batching configuration
    pub batching: BatchingConfig,

    /// Retention configuration
    pub retention: RetentionConfig,

    /// Earnings ledger configuration
    pub ledger: LedgerConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/adx-store"),
            service_name: "adx-store".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            backend: BackendKind::RocksDb,
            rocksdb: RocksDBConfig::default(),
            batching: BatchingConfig::default(),
            retention: RetentionConfig::default(),
            ledger: LedgerConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Storage engine selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// In-process ordered map (tests, ephemeral nodes)
    Memory,
    /// RocksDB under `data_dir`
    RocksDb,
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Target file size (MB)
    pub target_file_size_mb: u64,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Level 0 file num compaction trigger
    pub level0_file_num_compaction_trigger: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 128,
            max_write_buffer_number: 4,
            target_file_size_mb: 128,
            max_background_jobs: 4,
            level0_file_num_compaction_trigger: 4,
            enable_statistics: false,
        }
    }
}

/// Write buffer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    /// Operations per flushed batch
    pub max_batch_size: usize,

    /// Pending operations accepted before enqueue fails
    pub max_pending_ops: usize,

    /// Background flush interval (milliseconds)
    pub flush_interval_ms: u64,

    /// Enable batching; when off every enqueue flushes immediately
    pub enabled: bool,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_pending_ops: 10_000,
            flush_interval_ms: 100,
            enabled: true,
        }
    }
}

/// Retention configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionConfig {
    /// Records older than this many days are pruned
    pub window_days: i64,

    /// Interval between background passes (seconds)
    pub interval_secs: u64,

    /// Run the background pass
    pub enabled: bool,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            window_days: 60,
            interval_secs: 3600,
            enabled: true,
        }
    }
}

/// Longest accepted retention window (100 years)
pub const MAX_RETENTION_DAYS: i64 = 36_500;

impl RetentionConfig {
    /// Retention window as a duration
    pub fn window(&self) -> chrono::Duration {
        chrono::Duration::days(self.window_days)
    }
}

/// Earnings ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Fraction of an impression's price credited to its miner
    #[serde(with = "rust_decimal::serde::str")]
    pub miner_share: Decimal,

    /// Credit miners when impressions are ingested
    pub settle_on_ingest: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            miner_share: Decimal::new(10, 2), // 10%
            settle_on_ingest: true,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Config {
    /// In-memory configuration for tests and ephemeral nodes
    pub fn in_memory() -> Self {
        Self {
            backend: BackendKind::Memory,
            ..Self::default()
        }
    }

    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("ADX_STORE_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("ADX_STORE_BACKEND") {
            config.backend = match backend.as_str() {
                "memory" => BackendKind::Memory,
                "rocksdb" => BackendKind::RocksDb,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown backend {:?}",
                        other
                    )))
                }
            };
        }

        if let Ok(size) = std::env::var("ADX_STORE_BATCH_SIZE") {
            config.batching.max_batch_size = size
                .parse()
                .map_err(|e| crate::Error::Config(format!("ADX_STORE_BATCH_SIZE: {}", e)))?;
        }

        if let Ok(days) = std::env::var("ADX_STORE_RETENTION_DAYS") {
            config.retention.window_days = days
                .parse()
                .map_err(|e| crate::Error::Config(format!("ADX_STORE_RETENTION_DAYS: {}", e)))?;
        }

        if let Ok(json) = std::env::var("ADX_STORE_LOG_JSON") {
            config.logging.json = json == "1" || json.eq_ignore_ascii_case("true");
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the store cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.batching.max_batch_size == 0 {
            return Err(crate::Error::Config(
                "batching.max_batch_size must be positive".to_string(),
            ));
        }
        if self.batching.max_pending_ops < self.batching.max_batch_size {
            return Err(crate::Error::Config(format!(
                "batching.max_pending_ops ({}) must be at least max_batch_size ({})",
                self.batching.max_pending_ops, self.batching.max_batch_size
            )));
        }
        if self.batching.flush_interval_ms == 0 {
            return Err(crate::Error::Config(
                "batching.flush_interval_ms must be positive".to_string(),
            ));
        }
        if self.retention.window_days <= 0 || self.retention.window_days > MAX_RETENTION_DAYS {
            return Err(crate::Error::Config(format!(
                "retention.window_days ({}) must be within 1..={}",
                self.retention.window_days, MAX_RETENTION_DAYS
            )));
        }
        if self.retention.interval_secs == 0 {
            return Err(crate::Error::Config(
                "retention.interval_secs must be positive".to_string(),
            ));
        }
        if self.ledger.miner_share.is_sign_negative() || self.ledger.miner_share > Decimal::ONE {
            return Err(crate::Error::Config(format!(
                "ledger.miner_share {} must be within [0, 1]",
                self.ledger.miner_share
            )));
        }
        Ok(())
    }
}
