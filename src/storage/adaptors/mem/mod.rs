//! Volatile backend. Objects live only in the store index.

use tracing::trace;

use crate::MutationRecord;
use crate::RecoveredState;
use crate::Result;
use crate::StorageBackend;

#[derive(Debug, Default)]
pub struct MemoryBackend;

impl MemoryBackend {
    pub fn new() -> Self {
        Self
    }
}

impl StorageBackend for MemoryBackend {
    fn load(&self) -> Result<RecoveredState> {
        Ok(RecoveredState::default())
    }

    fn persist(
        &self,
        record: &MutationRecord,
    ) -> Result<()> {
        trace!(key = %record.key, rv = record.rv, "memory backend persist");
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
