use async_trait::async_trait;

use super::DeleteOptions;
use super::GetOptions;
use super::ListOptions;
use super::ListResult;
use super::UpdateOptions;
use super::WatchOptions;
use crate::Object;
use crate::Result;
use crate::WatchStream;

/// Read-modify-write transform used by [`Storage::guaranteed_update`].
///
/// Receives the current object (or `None` when the key is absent and
/// `ignore_not_found` is set) and returns the desired object. It may run more
/// than once when concurrent writers interfere, so it must not have side
/// effects beyond its return value.
pub type UpdateFunc<T> = Box<dyn FnMut(Option<T>) -> Result<T> + Send>;

/// Object storage contract consumed by the resource API layer.
///
/// Every object returned carries the resource version it was stored at.
#[async_trait]
pub trait Storage<T: Object>: Send + Sync + 'static {
    /// Stores a new object at `key`.
    ///
    /// # Errors
    /// - `AlreadyExists` if the key is live
    /// - `InvalidArgument` if the object already carries a resource version
    async fn create(
        &self,
        key: &str,
        object: T,
    ) -> Result<T>;

    /// Same as [`Storage::create`] with the key derived by the store's `KeyFunc`.
    async fn create_object(
        &self,
        object: T,
    ) -> Result<T>;

    async fn get(
        &self,
        key: &str,
        opts: GetOptions,
    ) -> Result<Option<T>>;

    /// Lists objects under `key` from one consistent snapshot.
    async fn list(
        &self,
        key: &str,
        opts: ListOptions<T>,
    ) -> Result<ListResult<T>>;

    /// Number of live objects under the `key` prefix
    async fn count(
        &self,
        key: &str,
    ) -> Result<u64>;

    /// Replaces an existing object.
    ///
    /// A non-zero resource version on `object` is an optimistic concurrency
    /// check and fails with `Conflict` on mismatch.
    async fn update(
        &self,
        key: &str,
        object: T,
    ) -> Result<T>;

    /// Applies `update` to the current object until the write lands.
    ///
    /// Conflicting writes trigger a fresh read and another attempt. The loop
    /// ends on success, a non-retryable error, cancellation, the deadline or
    /// the configured retry budget. An update that leaves the encoded object
    /// unchanged is not written and returns the current object.
    async fn guaranteed_update(
        &self,
        key: &str,
        opts: UpdateOptions,
        update: UpdateFunc<T>,
    ) -> Result<T>;

    /// Removes the object at `key` after checking `opts.preconditions`.
    ///
    /// Returns the last live state stamped with the resource version of the
    /// deletion.
    async fn delete(
        &self,
        key: &str,
        opts: DeleteOptions,
    ) -> Result<T>;

    /// Opens a watch on `key` (or everything under it when recursive).
    ///
    /// # Errors
    /// - `Compacted` if the start resource version is no longer retained
    /// - `TooLargeResourceVersion` if initial events are requested for a
    ///   resource version the store has not reached
    async fn watch(
        &self,
        key: &str,
        opts: WatchOptions<T>,
    ) -> Result<WatchStream<T>>;

    /// Asks every watch accepting bookmarks to report its progress.
    async fn request_watch_progress(&self) -> Result<()>;

    async fn readiness_check(&self) -> Result<()>;

    fn current_resource_version(&self) -> u64;

    /// Drops change history at or below `rv`. Returns the new log floor.
    async fn compact(
        &self,
        rv: u64,
    ) -> Result<u64>;
}
