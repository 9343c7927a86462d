//! Configuration for the operator

use crate::block::BlockPolicy;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Operator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Persist blocks and snapshots (in-memory only when false)
    pub persistence_enabled: bool,

    /// Block production configuration
    pub chain: ChainConfig,

    /// Root-chain event ingestion configuration
    pub monitor: MonitorConfig,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Snapshot configuration
    pub snapshot: SnapshotConfig,

    /// Accumulator proof history configuration
    pub accumulator: AccumulatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/plasma"),
            service_name: "plasma-operator".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            persistence_enabled: true,
            chain: ChainConfig::default(),
            monitor: MonitorConfig::default(),
            rocksdb: RocksDBConfig::default(),
            snapshot: SnapshotConfig::default(),
            accumulator: AccumulatorConfig::default(),
        }
    }
}

/// Block production configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    /// Interval between block assemblies (milliseconds)
    pub block_interval_ms: u64,

    /// Assemble blocks even when no transaction is pending
    pub allow_empty_blocks: bool,

    /// Capacity of the published-block broadcast channel
    pub broadcast_capacity: usize,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            block_interval_ms: 1000, // one block per second
            allow_empty_blocks: true,
            broadcast_capacity: 64,
        }
    }
}

impl ChainConfig {
    /// Block construction policy
    pub fn block_policy(&self) -> BlockPolicy {
        BlockPolicy {
            allow_empty: self.allow_empty_blocks,
        }
    }

    /// Publisher tick interval
    pub fn block_interval(&self) -> Duration {
        Duration::from_millis(self.block_interval_ms)
    }
}

/// Root-chain event ingestion configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Capacity of the event channel fed by the root-chain watcher
    pub channel_capacity: usize,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1000,
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

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 4,
            max_background_jobs: 4,
            enable_statistics: false,
        }
    }
}

/// Snapshot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Snapshot with every Nth stored block (0 disables snapshots).
    ///
    /// Restart replays the blocks stored after the newest snapshot. Blocks
    /// carry the root-chain updates they include, so any N recovers the
    /// same state; larger N means a longer replay.
    pub interval_blocks: u32,

    /// Snapshots retained on disk
    pub retain: usize,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            interval_blocks: 1,
            retain: 3,
        }
    }
}

/// Accumulator proof history configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorConfig {
    /// Blocks of per-block history kept for proofs (0 keeps every block).
    ///
    /// Proofs anchored before the retained window are refused.
    pub retain_blocks: usize,
}

impl Default for AccumulatorConfig {
    fn default() -> Self {
        Self { retain_blocks: 0 }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse from TOML text; missing fields take their defaults
    pub fn from_toml(content: &str) -> crate::Result<Self> {
        toml::from_str(content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("PLASMA_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(interval) = std::env::var("PLASMA_BLOCK_INTERVAL_MS") {
            config.chain.block_interval_ms = interval.parse().map_err(|_| {
                crate::Error::Config(format!("PLASMA_BLOCK_INTERVAL_MS is not a number: {}", interval))
            })?;
        }

        if let Ok(allow) = std::env::var("PLASMA_ALLOW_EMPTY_BLOCKS") {
            config.chain.allow_empty_blocks = allow.parse().map_err(|_| {
                crate::Error::Config(format!("PLASMA_ALLOW_EMPTY_BLOCKS is not a bool: {}", allow))
            })?;
        }

        if let Ok(retain) = std::env::var("PLASMA_ACCUMULATOR_RETAIN_BLOCKS") {
            config.accumulator.retain_blocks = retain.parse().map_err(|_| {
                crate::Error::Config(format!(
                    "PLASMA_ACCUMULATOR_RETAIN_BLOCKS is not a number: {}",
                    retain
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the operator cannot run with
    pub fn validate(&self) -> crate::Result<()> {
        if self.chain.block_interval_ms == 0 {
            return Err(crate::Error::Config(
                "chain.block_interval_ms must be positive".to_string(),
            ));
        }
        if self.chain.broadcast_capacity == 0 || self.monitor.channel_capacity == 0 {
            return Err(crate::Error::Config(
                "channel capacities must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "plasma-operator");
        assert_eq!(config.chain.block_interval(), Duration::from_secs(1));
        assert!(config.chain.block_policy().allow_empty);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml() {
        let config = Config::from_toml(
            r#"
            data_dir = "/tmp/plasma"

            [chain]
            block_interval_ms = 250
            allow_empty_blocks = false
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/tmp/plasma"));
        assert_eq!(config.chain.block_interval_ms, 250);
        assert!(!config.chain.allow_empty_blocks);
        // Untouched sections keep defaults
        assert_eq!(config.monitor.channel_capacity, 1000);
        assert_eq!(config.snapshot.interval_blocks, 1);
        assert_eq!(config.accumulator.retain_blocks, 0);
    }

    #[test]
    fn test_accumulator_retention_toml() {
        let config = Config::from_toml(
            r#"
            [accumulator]
            retain_blocks = 128
            "#,
        )
        .unwrap();
        assert_eq!(config.accumulator.retain_blocks, 128);
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("chain = 5"),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = Config::default();
        config.chain.block_interval_ms = 0;
        assert!(config.validate().is_err());
    }
}
