//! Engine configuration.
//!
//! The recognized keys mirror the persistence layer's tunables: where data
//! lives, how the journal grows, and how aggressively maintenance snapshots
//! and compacts. Everything is optional in the JSON file; absent keys fall
//! back to the defaults below.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Default journal file size on creation (10 MiB).
pub const DEFAULT_JOURNAL_INITIAL_SIZE: u64 = 10 * 1024 * 1024;

/// Default journal growth increment (10 MiB).
pub const DEFAULT_JOURNAL_SIZE_INCREMENT: u64 = 10 * 1024 * 1024;

/// Default journal size cap (1 GiB).
pub const DEFAULT_JOURNAL_MAX_SIZE: u64 = 1024 * 1024 * 1024;

/// Errors raised while loading a configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config file {}: {source}", path.display())]
    Io {
        /// Path that failed to open or read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The file contents are not valid JSON for [`EngineConfig`].
    #[error("invalid config file {}: {message}", path.display())]
    Invalid {
        /// Path of the offending file.
        path: PathBuf,
        /// Parser diagnostic.
        message: String,
    },
}

/// Engine-wide configuration, deserialized from a JSON file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Root directory for `journals/` and `snapshots/`.
    pub data_directory: PathBuf,

    /// Journal file size at creation, in bytes.
    pub journal_initial_size: u64,

    /// Journal growth increment, in bytes.
    pub journal_size_increment: u64,

    /// Hard cap on journal file size, in bytes. Appends that would exceed
    /// it fail until the journal is compacted.
    pub journal_max_size: u64,

    /// How many snapshot files to retain per symbol.
    pub snapshot_retention_count: usize,

    /// Journal entries beyond the latest snapshot checkpoint that trigger
    /// compaction.
    pub compaction_threshold: u64,

    /// Maintenance tick period in milliseconds.
    pub maintenance_period_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_directory: PathBuf::from("data"),
            journal_initial_size: DEFAULT_JOURNAL_INITIAL_SIZE,
            journal_size_increment: DEFAULT_JOURNAL_SIZE_INCREMENT,
            journal_max_size: DEFAULT_JOURNAL_MAX_SIZE,
            snapshot_retention_count: 5,
            compaction_threshold: 100_000,
            maintenance_period_ms: 30_000,
        }
    }
}

impl EngineConfig {
    /// Loads configuration from a JSON file.
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&contents).map_err(|e| ConfigError::Invalid {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }
}
