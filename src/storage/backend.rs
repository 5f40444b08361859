#[cfg(test)]
use mockall::automock;

use super::MutationRecord;
use super::RecoveredState;
use crate::Result;

/// Durable medium behind the object store.
///
/// `persist` runs inside the writer critical section, before the record is
/// appended to the log or published to readers. A failed persist leaves the
/// store untouched, so implementations must apply a record atomically.
#[cfg_attr(test, automock)]
pub trait StorageBackend: Send + Sync + 'static {
    /// Rebuilds the live objects and the last committed RV
    fn load(&self) -> Result<RecoveredState>;

    fn persist(
        &self,
        record: &MutationRecord,
    ) -> Result<()>;

    fn flush(&self) -> Result<()>;

    fn name(&self) -> &'static str;
}
