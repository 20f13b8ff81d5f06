//! Configuration for CaskKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{CaskError, Result};

/// Main configuration for a CaskKV instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Directory holding every data/hint pair and the lock file
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── bitcask.lock     (owner pid + active file name)
    ///     ├── <id>.data        (records)
    ///     └── <id>.hint        (compact index of the matching .data)
    pub data_dir: PathBuf,

    /// Rotate the active file once it has grown past this many bytes
    pub max_file_size: u64,

    /// When to fsync appended records
    pub sync_strategy: SyncStrategy,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Run the background compactor
    pub merge_enabled: bool,

    /// Time between two compaction cycles
    pub merge_interval: Duration,

    /// Frozen data files required before a cycle does any work
    pub merge_min_files: usize,
}

/// Sync strategy for appended records
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStrategy {
    /// fsync data and hint after every write (safest, slowest)
    EveryWrite,

    /// fsync only when a file is frozen, before compaction retires files, and at close
    OnRotate,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./caskkv_data"),
            max_file_size: 1 << 32, // 4 GiB
            sync_strategy: SyncStrategy::OnRotate,
            merge_enabled: true,
            merge_interval: Duration::from_secs(3600),
            merge_min_files: 2,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.merge_enabled && self.merge_interval.is_zero() {
            return Err(CaskError::Config(
                "merge_interval must be non-zero when merging is enabled".to_string(),
            ));
        }
        if self.merge_min_files == 0 {
            return Err(CaskError::Config(
                "merge_min_files must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the rotation threshold (in bytes)
    pub fn max_file_size(mut self, size: u64) -> Self {
        self.config.max_file_size = size;
        self
    }

    /// Set the sync strategy
    pub fn sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.config.sync_strategy = strategy;
        self
    }

    /// Enable or disable the background compactor
    pub fn merge_enabled(mut self, enabled: bool) -> Self {
        self.config.merge_enabled = enabled;
        self
    }

    /// Set the compaction interval
    pub fn merge_interval(mut self, interval: Duration) -> Self {
        self.config.merge_interval = interval;
        self
    }

    /// Set the minimum number of frozen files before compaction runs
    pub fn merge_min_files(mut self, count: usize) -> Self {
        self.config.merge_min_files = count;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
