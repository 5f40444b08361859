use std::path::PathBuf;

use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;
use tracing::warn;

use super::validate_directory;
use crate::Error;
use crate::Result;

/// Durable medium backing the object store
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Volatile, process-local state. History and objects are lost on restart.
    #[default]
    Memory,
    /// Objects persisted in an embedded sled database under `db_root_dir`
    Sled,
}

/// Storage backend and mutation-log retention settings
///
/// # Configuration Example
///
/// ```toml
/// [storage]
/// backend = "sled"
/// db_root_dir = "/var/lib/d-store"
/// max_retained_records = 100000
/// ```
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct StorageConfig {
    /// Default: memory
    #[serde(default)]
    pub backend: BackendKind,

    /// Database storage root directory (only used by the sled backend)
    ///
    /// Default: `default_db_dir()` (/tmp/d-store)
    #[serde(default = "default_db_dir")]
    pub db_root_dir: PathBuf,

    /// Sled page cache size in bytes
    ///
    /// Default: 10MB
    #[serde(default = "default_sled_cache_capacity")]
    pub sled_cache_capacity: u64,

    /// Maximum number of mutation records kept in the versioned log.
    ///
    /// Older records are trimmed automatically once the limit is exceeded;
    /// watchers resuming from a trimmed resource version receive `Compacted`.
    /// `0` keeps the full history until `compact()` is called.
    ///
    /// Default: 0 (unbounded)
    #[serde(default)]
    pub max_retained_records: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            db_root_dir: default_db_dir(),
            sled_cache_capacity: default_sled_cache_capacity(),
            max_retained_records: 0,
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.backend == BackendKind::Sled {
            validate_directory(&self.db_root_dir, "db_root_dir")?;

            if self.sled_cache_capacity == 0 {
                return Err(Error::Config(ConfigError::Message(
                    "storage.sled_cache_capacity must be greater than 0".into(),
                )));
            }
        }

        if self.max_retained_records > 0 && self.max_retained_records < 16 {
            warn!(
                "storage.max_retained_records ({}) is very small; resuming watchers will often see Compacted",
                self.max_retained_records
            );
        }

        Ok(())
    }
}

fn default_db_dir() -> PathBuf {
    PathBuf::from("/tmp/d-store")
}

const fn default_sled_cache_capacity() -> u64 {
    10 * 1024 * 1024
}
