//! Explicit configuration for repositories and compaction runs.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// How a [`StateRepository`](crate::StateRepository) keeps its values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageStrategy {
    /// Deserialized values in process memory.
    #[default]
    Heap,
    /// zstd-compressed JSON bytes, accounted by their compressed size.
    Compressed,
}

/// Storage settings for a [`StateRepository`](crate::StateRepository).
///
/// # Examples
///
/// ```
/// use channelfold::{StorageConfig, StorageStrategy};
///
/// let config = StorageConfig::compressed().with_max_bytes(64 * 1024 * 1024);
/// assert_eq!(config.strategy, StorageStrategy::Compressed);
/// assert_eq!(config.max_bytes, Some(64 * 1024 * 1024));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub strategy: StorageStrategy,
    /// Upper bound on the accounted size of all stored values.
    pub max_bytes: Option<u64>,
    /// zstd level used by [`StorageStrategy::Compressed`].
    pub compression_level: i32,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            strategy: StorageStrategy::Heap,
            max_bytes: None,
            compression_level: 3,
        }
    }
}

impl StorageConfig {
    pub fn heap() -> Self {
        StorageConfig::default()
    }

    pub fn compressed() -> Self {
        StorageConfig {
            strategy: StorageStrategy::Compressed,
            ..StorageConfig::default()
        }
    }

    pub fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = Some(max_bytes);
        self
    }

    pub fn with_compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }
}

/// Settings for a [`CompactionService`](crate::CompactionService).
///
/// Deserializable so it can be loaded from whatever configuration source the
/// host application uses; unspecified fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompactionConfig {
    /// Bucket holding the channel's snapshots.
    pub bucket: String,
    /// Channel to compact.
    pub channel_name: String,
    /// Directory for downloaded and freshly written snapshot files.
    pub local_dir: PathBuf,
    /// Number of newest snapshots to keep in the bucket. Values below 1 are
    /// treated as 1.
    pub retain_snapshots: usize,
    /// Storage of the repository a run builds when none is supplied.
    pub storage: StorageConfig,
}

impl Default for CompactionConfig {
    fn default() -> Self {
        CompactionConfig {
            bucket: String::new(),
            channel_name: String::new(),
            local_dir: std::env::temp_dir(),
            retain_snapshots: 1,
            storage: StorageConfig::default(),
        }
    }
}

impl CompactionConfig {
    pub fn new(bucket: impl Into<String>, channel_name: impl Into<String>) -> Self {
        CompactionConfig {
            bucket: bucket.into(),
            channel_name: channel_name.into(),
            ..CompactionConfig::default()
        }
    }

    pub fn with_local_dir(mut self, local_dir: impl Into<PathBuf>) -> Self {
        self.local_dir = local_dir.into();
        self
    }

    pub fn with_retain_snapshots(mut self, retain: usize) -> Self {
        self.retain_snapshots = retain;
        self
    }

    pub fn with_storage(mut self, storage: StorageConfig) -> Self {
        self.storage = storage;
        self
    }
}
