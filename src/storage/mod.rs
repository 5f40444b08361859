//! Durable state of the store: the versioned mutation log, the object index
//! and the pluggable backends behind them.
mod adaptors;
mod backend;
mod object_store;
mod types;
mod versioned_log;


use std::sync::Arc;

pub use adaptors::*;
pub use backend::*;
pub use object_store::*;
pub use types::*;
pub use versioned_log::*;

use crate::BackendKind;
use crate::Result;
use crate::StorageConfig;

/// Builds the backend selected by `config`.
pub fn init_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>> {
    match config.backend {
        BackendKind::Memory => Ok(Arc::new(MemoryBackend::new())),
        BackendKind::Sled => Ok(Arc::new(SledBackend::open(
            &config.db_root_dir,
            config.sled_cache_capacity,
        )?)),
    }
}
