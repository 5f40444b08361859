//! [`Storage`] implementation over the object store and the watch engine.
//!
//! ```text
//! create/update/delete ──► ObjectStore (writer section) ──► VersionedLog
//!                                                               │
//! get/list ◄── index snapshot                                   ▼
//!                                      WatchBroadcaster tailer ──► sessions ──► WatchStream
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::instrument;
use tracing::trace;
use tracing::warn;

use super::continue_token::ContinueToken;
use super::DeleteOptions;
use super::GetOptions;
use super::ListOptions;
use super::ListResult;
use super::Preconditions;
use super::ResourceVersionMatch;
use super::Storage;
use super::UpdateFunc;
use super::UpdateOptions;
use super::WatchOptions;
use crate::codec::decode_object;
use crate::codec::encode_object;
use crate::init_backend;
use crate::watch::spawn_session;
use crate::watch::SessionParams;
use crate::watch::StartPosition;
use crate::watch::SubscribeRequest;
use crate::Codec;
use crate::DesiredVersion;
use crate::EventTranslator;
use crate::KeyFilter;
use crate::KeyFunc;
use crate::Object;
use crate::ObjectStore;
use crate::Result;
use crate::StorageBackend;
use crate::StoreConfig;
use crate::StoreError;
use crate::StoredObject;
use crate::WatchBroadcaster;
use crate::WatchFilter;
use crate::WatchStream;

/// Versioned object store with watch support.
///
/// Must be created inside a tokio runtime: the watch tailer is spawned on
/// construction. Dropping the store stops every open watch.
pub struct Store<T: Object> {
    config: StoreConfig,
    objects: Arc<ObjectStore>,
    broadcaster: WatchBroadcaster<T>,
    translator: EventTranslator<T>,
    codec: Arc<dyn Codec<T>>,
    key_func: KeyFunc<T>,
}

impl<T: Object> std::fmt::Debug for Store<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("objects", &self.objects)
            .field("broadcaster", &self.broadcaster)
            .finish()
    }
}

impl<T: Object> Store<T> {
    /// Opens the backend selected by `config.storage` and recovers its state.
    pub fn open(
        config: StoreConfig,
        codec: Arc<dyn Codec<T>>,
        key_func: KeyFunc<T>,
    ) -> Result<Self> {
        let config = config.validate()?;
        let backend = init_backend(&config.storage)?;
        Self::assemble(config, backend, codec, key_func)
    }

    /// Opens the store over an already constructed backend.
    pub fn with_backend(
        config: StoreConfig,
        backend: Arc<dyn StorageBackend>,
        codec: Arc<dyn Codec<T>>,
        key_func: KeyFunc<T>,
    ) -> Result<Self> {
        let config = config.validate()?;
        Self::assemble(config, backend, codec, key_func)
    }

    fn assemble(
        config: StoreConfig,
        backend: Arc<dyn StorageBackend>,
        codec: Arc<dyn Codec<T>>,
        key_func: KeyFunc<T>,
    ) -> Result<Self> {
        let objects = Arc::new(ObjectStore::open(
            backend,
            config.storage.max_retained_records,
        )?);
        let translator = EventTranslator::new(codec.clone());
        let broadcaster =
            WatchBroadcaster::start(objects.clone(), translator.clone(), config.watch.clone());

        info!(
            rv = objects.current_rv(),
            backend = ?config.storage.backend,
            "store opened"
        );

        Ok(Self {
            config,
            objects,
            broadcaster,
            translator,
            codec,
            key_func,
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Number of open watches
    pub fn active_watchers(&self) -> usize {
        self.broadcaster.active_count()
    }

    /// Closes every watch with `Stopped`. Writes keep working; new watches
    /// are refused.
    pub fn stop(&self) {
        self.broadcaster.stop();
    }

    pub fn flush(&self) -> Result<()> {
        self.objects.flush()
    }

    fn decode(
        &self,
        stored: &StoredObject,
    ) -> Result<T> {
        decode_object(self.codec.as_ref(), &stored.value, stored.rv)
    }

    fn resolve_list_snapshot(
        &self,
        filter: &KeyFilter,
        opts: &ListOptions<T>,
    ) -> Result<(Vec<Arc<StoredObject>>, u64, Option<String>)> {
        if let Some(token) = &opts.continue_token {
            if opts.resource_version != 0 {
                return Err(StoreError::InvalidArgument(
                    "resource version must not be set together with a continue token".into(),
                )
                .into());
            }
            let token = ContinueToken::decode(token)?;
            if !filter.matches(&token.start) {
                return Err(StoreError::InvalidContinueToken(format!(
                    "continue key {} is outside of {}",
                    token.start,
                    filter.key()
                ))
                .into());
            }
            let objects = self.objects.snapshot_at(filter, token.rv)?;
            return Ok((objects, token.rv, Some(token.start)));
        }

        match opts.resource_version_match {
            ResourceVersionMatch::Exact => {
                if opts.resource_version == 0 {
                    return Err(StoreError::InvalidArgument(
                        "exact resource version match requires a resource version".into(),
                    )
                    .into());
                }
                let objects = self.objects.snapshot_at(filter, opts.resource_version)?;
                Ok((objects, opts.resource_version, None))
            }
            ResourceVersionMatch::NotOlderThan => {
                let (objects, current) = self.objects.snapshot(filter);
                if opts.resource_version > current {
                    return Err(StoreError::TooLargeResourceVersion {
                        requested: opts.resource_version,
                        current,
                    }
                    .into());
                }
                Ok((objects, current, None))
            }
        }
    }

    fn resolve_watch_start(
        &self,
        opts: &WatchOptions<T>,
    ) -> Result<(StartPosition, bool)> {
        match (opts.send_initial_events, opts.resource_version) {
            (Some(true), rv) => {
                let current = self.objects.current_rv();
                if rv > current {
                    return Err(StoreError::TooLargeResourceVersion {
                        requested: rv,
                        current,
                    }
                    .into());
                }
                Ok((StartPosition::Snapshot, opts.allow_watch_bookmarks))
            }
            (None, 0) => Ok((StartPosition::Snapshot, false)),
            (Some(false), 0) => Ok((StartPosition::Now, false)),
            (_, rv) => Ok((StartPosition::After(rv), false)),
        }
    }
}

/// UID mismatches fail with `PreconditionFailed`, resource version
/// mismatches with `Conflict`.
fn check_preconditions<T: Object>(
    key: &str,
    preconditions: Option<&Preconditions>,
    stored_rv: u64,
    object: &T,
) -> Result<()> {
    let Some(preconditions) = preconditions else {
        return Ok(());
    };
    if let Some(uid) = &preconditions.uid {
        if object.uid() != Some(uid.as_str()) {
            return Err(StoreError::PreconditionFailed {
                key: key.to_string(),
                reason: format!(
                    "UID in precondition: {}, UID in object meta: {}",
                    uid,
                    object.uid().unwrap_or_default()
                ),
            }
            .into());
        }
    }
    if let Some(rv) = preconditions.resource_version {
        if rv != stored_rv {
            return Err(StoreError::Conflict {
                key: key.to_string(),
                expected: rv,
                actual: stored_rv,
            }
            .into());
        }
    }
    Ok(())
}

#[async_trait]
impl<T: Object> Storage<T> for Store<T> {
    #[instrument(skip(self, object))]
    async fn create(
        &self,
        key: &str,
        object: T,
    ) -> Result<T> {
        if object.resource_version() != 0 {
            return Err(StoreError::InvalidArgument(
                "resource version must not be set on objects to be created".into(),
            )
            .into());
        }
        let value = encode_object(self.codec.as_ref(), &object)?;
        let stored = self.objects.put(key, DesiredVersion::Absent, value)?;

        let mut created = object;
        created.set_resource_version(stored.rv);
        Ok(created)
    }

    async fn create_object(
        &self,
        object: T,
    ) -> Result<T> {
        let key = (self.key_func)(&object)?;
        self.create(&key, object).await
    }

    async fn get(
        &self,
        key: &str,
        opts: GetOptions,
    ) -> Result<Option<T>> {
        let (stored, current) = self.objects.get(key);
        if opts.resource_version > current {
            return Err(StoreError::TooLargeResourceVersion {
                requested: opts.resource_version,
                current,
            }
            .into());
        }
        match stored {
            Some(stored) => Ok(Some(self.decode(&stored)?)),
            None if opts.ignore_not_found => Ok(None),
            None => Err(StoreError::NotFound {
                key: key.to_string(),
            }
            .into()),
        }
    }

    #[instrument(skip(self, opts), fields(limit = opts.limit, recursive = opts.recursive))]
    async fn list(
        &self,
        key: &str,
        opts: ListOptions<T>,
    ) -> Result<ListResult<T>> {
        let filter = KeyFilter::new(key, opts.recursive);
        let (objects, rv, start_after) = self.resolve_list_snapshot(&filter, &opts)?;

        let start = match &start_after {
            Some(after) => objects.partition_point(|o| o.key.as_str() <= after.as_str()),
            None => 0,
        };
        let candidates = &objects[start..];

        let mut items = Vec::new();
        let mut scanned = 0;
        for stored in candidates {
            if opts.limit > 0 && items.len() == opts.limit {
                break;
            }
            scanned += 1;
            let object = self.decode(stored)?;
            if opts.predicate.as_ref().map_or(true, |p| p(&object)) {
                items.push(object);
            }
        }

        let remaining = candidates.len() - scanned;
        let continue_token = if remaining > 0 {
            let last = &candidates[scanned - 1];
            Some(
                ContinueToken {
                    rv,
                    start: last.key.clone(),
                }
                .encode()?,
            )
        } else {
            None
        };
        let remaining_item_count = (continue_token.is_some() && opts.predicate.is_none())
            .then_some(remaining as u64);

        trace!(rv, items = items.len(), remaining, "list served");
        Ok(ListResult {
            items,
            resource_version: rv,
            continue_token,
            remaining_item_count,
        })
    }

    async fn count(
        &self,
        key: &str,
    ) -> Result<u64> {
        Ok(self.objects.count(&KeyFilter::prefix(key)) as u64)
    }

    #[instrument(skip(self, object))]
    async fn update(
        &self,
        key: &str,
        object: T,
    ) -> Result<T> {
        let desired = match object.resource_version() {
            0 => DesiredVersion::AnyExisting,
            rv => DesiredVersion::Exact(rv),
        };
        let value = encode_object(self.codec.as_ref(), &object)?;
        let stored = self.objects.put(key, desired, value)?;

        let mut updated = object;
        updated.set_resource_version(stored.rv);
        Ok(updated)
    }

    #[instrument(skip(self, opts, update))]
    async fn guaranteed_update(
        &self,
        key: &str,
        opts: UpdateOptions,
        mut update: UpdateFunc<T>,
    ) -> Result<T> {
        let timeout = opts.timeout.unwrap_or_else(|| self.config.update.default_timeout());
        let deadline = Instant::now() + timeout;
        let cancel = opts.cancel.clone().unwrap_or_default();
        let max_retries = self.config.update.max_retries;
        let mut attempt: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(StoreError::Canceled.into());
            }
            if Instant::now() >= deadline {
                return Err(StoreError::Timeout(timeout).into());
            }

            let (stored, _) = self.objects.get(key);
            let current = match &stored {
                Some(stored) => {
                    let object = self.decode(stored)?;
                    check_preconditions(key, opts.preconditions.as_ref(), stored.rv, &object)?;
                    Some(object)
                }
                None if opts.ignore_not_found => None,
                None => {
                    return Err(StoreError::NotFound {
                        key: key.to_string(),
                    }
                    .into())
                }
            };

            let mut desired = update(current.clone())?;
            let value = encode_object(self.codec.as_ref(), &desired)?;

            let version = match (&stored, current) {
                (Some(stored), Some(current)) => {
                    if stored.value == value {
                        trace!(key, rv = stored.rv, "update left object unchanged");
                        return Ok(current);
                    }
                    DesiredVersion::Exact(stored.rv)
                }
                _ => DesiredVersion::Absent,
            };

            match self.objects.put(key, version, value) {
                Ok(committed) => {
                    desired.set_resource_version(committed.rv);
                    return Ok(desired);
                }
                Err(e) if e.is_conflict() || e.is_already_exists() || e.is_not_found() => {
                    attempt += 1;
                    if max_retries > 0 && attempt > max_retries {
                        warn!(key, attempt, "guaranteed update gave up: {}", e);
                        return Err(e);
                    }
                    debug!(key, attempt, "guaranteed update raced a concurrent write, retrying");
                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(StoreError::Canceled.into()),
                        _ = tokio::time::sleep_until(deadline) => {
                            return Err(StoreError::Timeout(timeout).into())
                        }
                        _ = tokio::task::yield_now() => {}
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    #[instrument(skip(self, opts))]
    async fn delete(
        &self,
        key: &str,
        opts: DeleteOptions,
    ) -> Result<T> {
        let preconditions = opts.preconditions.as_ref();
        let desired = match preconditions.and_then(|p| p.resource_version) {
            Some(rv) => DesiredVersion::Exact(rv),
            None => DesiredVersion::AnyExisting,
        };

        let (last, rv) = self.objects.delete(key, desired, |stored| {
            if preconditions.is_some_and(|p| p.uid.is_some()) {
                let object = self.decode(stored)?;
                check_preconditions(key, preconditions, stored.rv, &object)?;
            }
            Ok(())
        })?;

        decode_object(self.codec.as_ref(), &last.value, rv)
    }

    #[instrument(skip(self, opts), fields(rv = opts.resource_version, send_initial_events = ?opts.send_initial_events))]
    async fn watch(
        &self,
        key: &str,
        opts: WatchOptions<T>,
    ) -> Result<WatchStream<T>> {
        let (start, send_end_bookmark) = self.resolve_watch_start(&opts)?;

        let WatchOptions {
            allow_watch_bookmarks,
            progress_notify,
            recursive,
            predicate,
            timeout,
            cancel,
            ..
        } = opts;

        let filter = Arc::new(WatchFilter::new(KeyFilter::new(key, recursive), predicate));
        let subscription = self.broadcaster.subscribe(SubscribeRequest {
            filter: filter.clone(),
            start,
            progress_notify,
            on_demand_progress: progress_notify || allow_watch_bookmarks,
        })?;

        debug!(
            watcher_id = subscription.id,
            start_rv = subscription.start_rv,
            ?start,
            "watch opened"
        );

        let cancel = cancel
            .map(|parent| parent.child_token())
            .unwrap_or_else(CancellationToken::new);

        Ok(spawn_session(SessionParams {
            subscription,
            filter,
            translator: self.translator.clone(),
            broadcaster: self.broadcaster.clone(),
            send_end_bookmark,
            cancel,
            deadline: timeout.map(|t| Instant::now() + t),
            stream_buffer_size: self.config.watch.stream_buffer_size,
        }))
    }

    async fn request_watch_progress(&self) -> Result<()> {
        self.readiness_check().await?;
        self.broadcaster.request_progress();
        Ok(())
    }

    async fn readiness_check(&self) -> Result<()> {
        if !self.broadcaster.is_running() {
            return Err(StoreError::NotReady.into());
        }
        Ok(())
    }

    fn current_resource_version(&self) -> u64 {
        self.objects.current_rv()
    }

    async fn compact(
        &self,
        rv: u64,
    ) -> Result<u64> {
        let floor = self.objects.compact(rv);
        info!(requested = rv, floor, "log compacted");
        Ok(floor)
    }
}

impl<T: Object> Drop for Store<T> {
    fn drop(&mut self) {
        self.broadcaster.stop();
    }
}
