//! Configuration for the wallet ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Storage backend selection
    pub storage: StorageConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Engine behaviour
    pub ledger: LedgerConfig,

    /// Metrics configuration
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "wallet-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            storage: StorageConfig::default(),
            rocksdb: RocksDBConfig::default(),
            ledger: LedgerConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

/// Storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Process-local, lost on exit
    Memory,
    /// Durable RocksDB store under `data_dir`
    Rocksdb,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selection
    pub backend: Backend,

    /// Data directory for RocksDB
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Rocksdb,
            data_dir: PathBuf::from("./data/wallet-ledger"),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// fsync the WAL on every commit
    pub sync_writes: bool,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            sync_writes: true,
            enable_statistics: false,
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Maximum fractional digits accepted in an amount
    pub amount_scale: u32,

    /// How long a mutation may wait for its wallet lock(s)
    pub lock_timeout_ms: u64,

    /// Re-runs of an operation after a commit conflict
    pub max_conflict_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            amount_scale: 2,
            lock_timeout_ms: 5_000,
            max_conflict_retries: 3,
        }
    }
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Collect Prometheus metrics
    pub enabled: bool,

    /// Metric name prefix
    pub namespace: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: "wallet_ledger".to_string(),
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from `WALLET_LEDGER_*` environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("WALLET_LEDGER_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(backend) = std::env::var("WALLET_LEDGER_BACKEND") {
            self.storage.backend = match backend.to_ascii_lowercase().as_str() {
                "memory" => Backend::Memory,
                "rocksdb" => Backend::Rocksdb,
                other => {
                    return Err(crate::Error::Config(format!(
                        "Unknown backend: {}",
                        other
                    )))
                }
            };
        }

        if let Ok(timeout) = std::env::var("WALLET_LEDGER_LOCK_TIMEOUT_MS") {
            self.ledger.lock_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid WALLET_LEDGER_LOCK_TIMEOUT_MS: {}", e))
            })?;
        }

        self.validate()
    }

    /// Reject configurations the engine cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.ledger.amount_scale > 28 {
            return Err(crate::Error::Config(
                "ledger.amount_scale cannot exceed 28".to_string(),
            ));
        }

        if self.ledger.lock_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "ledger.lock_timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
