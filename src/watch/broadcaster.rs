//! Watch Broadcaster
//!
//! One tailer task per store follows the versioned log and fans every new
//! record out to the registered subscriptions.
//!
//! # Architecture
//!
//! ```text
//! Write path:
//!   ObjectStore::commit() -> VersionedLog::append() -> head signal
//!                                                         ↓
//! Tailer task:
//!   read (dispatched, head] -> translate once -> registry lock -> filter + try_send
//!                                                                       ↓
//! Watcher session task (one per watch):
//!   catch-up records + queued events -> cursor de-dup -> consumer stream
//! ```
//!
//! # Gapless subscription
//!
//! `subscribe` runs under the same registry lock the tailer holds while it
//! fans out and advances `dispatched`. A new subscription therefore receives
//! the records `(start, dispatched]` as catch-up and everything above
//! `dispatched` through its queue, with nothing missing in between.
//!
//! # Backpressure
//!
//! The tailer never blocks on a subscriber. A full queue closes that
//! subscription with [`WatchError::Overflow`]; others are unaffected.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::EventTranslator;
use super::WatchFilter;
use crate::metrics::ACTIVE_WATCHERS;
use crate::metrics::WATCH_EVENTS_DISPATCHED;
use crate::metrics::WATCH_OVERFLOWS;
use crate::MutationRecord;
use crate::Object;
use crate::ObjectStore;
use crate::StoredObject;
use crate::WatchConfig;
use crate::WatchError;
use crate::WatchEvent;

/// Item placed on a subscription queue
#[derive(Debug)]
pub(crate) enum Dispatch<T> {
    Event(Arc<WatchEvent<T>>),
    /// Everything up to this RV has been dispatched
    Bookmark(u64),
}

/// Terminal error recorded by the broadcaster before it drops a subscription's sender
pub(crate) type CloseSlot = Arc<Mutex<Option<WatchError>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StartPosition {
    /// Only mutations committed after registration
    Now,
    /// Mutations with RV greater than the given one
    After(u64),
    /// A consistent snapshot of the index, then everything after it
    Snapshot,
}

pub(crate) struct SubscribeRequest<T> {
    pub filter: Arc<WatchFilter<T>>,
    pub start: StartPosition,
    /// Periodic progress bookmarks
    pub progress_notify: bool,
    /// Bookmarks requested through `request_progress`
    pub on_demand_progress: bool,
}

/// Everything a watcher session needs to start delivering
pub(crate) struct Subscription<T> {
    pub id: u64,
    pub receiver: mpsc::Receiver<Dispatch<T>>,
    /// RV the session resumes after. Events at or below it are duplicates.
    pub start_rv: u64,
    /// Index objects matching the key filter, for `StartPosition::Snapshot`
    pub snapshot: Option<Vec<Arc<StoredObject>>>,
    /// Records in `(start_rv, dispatched]` at registration time
    pub catch_up: Vec<Arc<MutationRecord>>,
    pub close_slot: CloseSlot,
}

struct Subscriber<T> {
    id: u64,
    filter: Arc<WatchFilter<T>>,
    sender: mpsc::Sender<Dispatch<T>>,
    progress_notify: bool,
    on_demand_progress: bool,
    close_slot: CloseSlot,
}

impl<T> Subscriber<T> {
    fn close(
        &self,
        reason: WatchError,
    ) {
        let mut slot = self.close_slot.lock();
        if slot.is_none() {
            *slot = Some(reason);
        }
    }
}

impl<T> Drop for Subscriber<T> {
    fn drop(&mut self) {
        ACTIVE_WATCHERS.dec();
        trace!(watcher_id = self.id, "subscriber dropped");
    }
}

struct Registry<T> {
    subscribers: HashMap<u64, Subscriber<T>>,
    /// Highest RV fanned out to subscribers
    dispatched: u64,
    next_id: u64,
    stopped: bool,
}

struct BroadcasterInner<T> {
    store: Arc<ObjectStore>,
    translator: EventTranslator<T>,
    registry: Mutex<Registry<T>>,
    config: WatchConfig,
    shutdown: CancellationToken,
    progress_requested: Notify,
    tailer: Mutex<Option<JoinHandle<()>>>,
}

/// Fans committed mutations out to watch subscriptions.
///
/// Cloning is cheap; all clones share the same tailer and registry.
pub struct WatchBroadcaster<T> {
    inner: Arc<BroadcasterInner<T>>,
}

impl<T> Clone for WatchBroadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T> std::fmt::Debug for WatchBroadcaster<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let registry = self.inner.registry.lock();
        f.debug_struct("WatchBroadcaster")
            .field("subscribers", &registry.subscribers.len())
            .field("dispatched", &registry.dispatched)
            .field("stopped", &registry.stopped)
            .finish()
    }
}

impl<T: Object> WatchBroadcaster<T> {
    /// Creates the broadcaster and spawns its tailer on the current tokio runtime.
    pub fn start(
        store: Arc<ObjectStore>,
        translator: EventTranslator<T>,
        config: WatchConfig,
    ) -> Self {
        let dispatched = store.log().head();
        let inner = Arc::new(BroadcasterInner {
            store,
            translator,
            registry: Mutex::new(Registry {
                subscribers: HashMap::new(),
                dispatched,
                next_id: 1,
                stopped: false,
            }),
            config,
            shutdown: CancellationToken::new(),
            progress_requested: Notify::new(),
            tailer: Mutex::new(None),
        });
        inner.store.log().set_pin(dispatched);

        // Head changes after this point wake the tailer even before its first poll
        let head_rx = inner.store.log().subscribe_head();
        let handle = tokio::spawn(Self::run_tailer(inner.clone(), head_rx));
        *inner.tailer.lock() = Some(handle);

        debug!(dispatched, "watch broadcaster started");
        Self { inner }
    }

    /// Registers a subscription atomically with respect to dispatch.
    pub(crate) fn subscribe(
        &self,
        request: SubscribeRequest<T>,
    ) -> Result<Subscription<T>, WatchError> {
        let mut registry = self.inner.registry.lock();
        if registry.stopped {
            return Err(WatchError::Stopped);
        }
        let dispatched = registry.dispatched;
        let log = self.inner.store.log();

        let (start_rv, snapshot) = match request.start {
            StartPosition::Snapshot => {
                let (objects, rv) = self.inner.store.snapshot(request.filter.keys());
                (rv, Some(objects))
            }
            StartPosition::Now => (log.head().max(dispatched), None),
            StartPosition::After(rv) => (rv, None),
        };

        let catch_up = if start_rv < dispatched {
            log.read_range(start_rv, dispatched).map_err(|_| WatchError::Compacted {
                requested: start_rv,
                compacted: log.floor(),
            })?
        } else if start_rv < log.floor() {
            return Err(WatchError::Compacted {
                requested: start_rv,
                compacted: log.floor(),
            });
        } else {
            Vec::new()
        };

        let id = registry.next_id;
        registry.next_id += 1;

        let capacity = self.inner.config.watcher_buffer_size;
        let (sender, receiver) = mpsc::channel(capacity);
        let close_slot: CloseSlot = Arc::new(Mutex::new(None));

        registry.subscribers.insert(
            id,
            Subscriber {
                id,
                filter: request.filter,
                sender,
                progress_notify: request.progress_notify,
                on_demand_progress: request.on_demand_progress,
                close_slot: close_slot.clone(),
            },
        );
        ACTIVE_WATCHERS.inc();

        trace!(
            watcher_id = id,
            start_rv,
            dispatched,
            catch_up = catch_up.len(),
            buffer_size = capacity,
            "Watcher registered"
        );

        Ok(Subscription {
            id,
            receiver,
            start_rv,
            snapshot,
            catch_up,
            close_slot,
        })
    }

    /// Removes a subscription. Idempotent.
    pub fn unregister(
        &self,
        id: u64,
    ) {
        if self.inner.registry.lock().subscribers.remove(&id).is_some() {
            trace!(watcher_id = id, "Watcher unregistered");
        }
    }

    /// Wakes the tailer to send a progress bookmark to every subscription
    /// accepting bookmarks.
    pub fn request_progress(&self) {
        self.inner.progress_requested.notify_one();
    }

    pub fn active_count(&self) -> usize {
        self.inner.registry.lock().subscribers.len()
    }

    pub fn dispatched_rv(&self) -> u64 {
        self.inner.registry.lock().dispatched
    }

    pub fn is_running(&self) -> bool {
        !self.inner.registry.lock().stopped
    }

    /// Closes every subscription with `Stopped` and ends the tailer.
    ///
    /// Calling `stop()` more than once is a no-op.
    pub fn stop(&self) {
        {
            let mut registry = self.inner.registry.lock();
            if registry.stopped {
                return;
            }
            registry.stopped = true;
            for subscriber in registry.subscribers.values() {
                subscriber.close(WatchError::Stopped);
            }
            registry.subscribers.clear();
        }
        self.inner.shutdown.cancel();
        if let Some(handle) = self.inner.tailer.lock().take() {
            handle.abort();
        }
        debug!("watch broadcaster stopped");
    }

    async fn run_tailer(
        inner: Arc<BroadcasterInner<T>>,
        mut head_rx: watch::Receiver<u64>,
    ) {
        debug!("Watch tailer started");
        Self::drain_log(&inner);

        let mut ticker = tokio::time::interval(inner.config.progress_notify_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = inner.shutdown.cancelled() => {
                    debug!("Watch tailer received shutdown signal");
                    break;
                }
                changed = head_rx.changed() => {
                    if changed.is_err() {
                        warn!("Log head signal closed unexpectedly");
                        break;
                    }
                    Self::drain_log(&inner);
                }
                _ = inner.progress_requested.notified() => {
                    Self::drain_log(&inner);
                    Self::broadcast_progress(&inner, true);
                }
                _ = ticker.tick() => {
                    Self::drain_log(&inner);
                    Self::broadcast_progress(&inner, false);
                }
            }
        }

        debug!("Watch tailer stopped");
    }

    /// Dispatches every record in `(dispatched, head]`.
    fn drain_log(inner: &BroadcasterInner<T>) {
        let log = inner.store.log();
        let dispatched = inner.registry.lock().dispatched;
        let head = log.head();
        if head <= dispatched {
            return;
        }

        let records = match log.read_range(dispatched, head) {
            Ok(records) => records,
            Err(e) => {
                // Records above the pin are never trimmed
                error!(dispatched, head, "watch tailer lost log records: {}", e);
                let mut registry = inner.registry.lock();
                for subscriber in registry.subscribers.values() {
                    subscriber.close(WatchError::Compacted {
                        requested: dispatched,
                        compacted: log.floor(),
                    });
                }
                registry.subscribers.clear();
                registry.dispatched = head;
                drop(registry);
                log.set_pin(head);
                return;
            }
        };

        // Decode outside the registry lock
        let translated: Vec<_> = records
            .iter()
            .map(|record| (record, inner.translator.translate(record).map(Arc::new)))
            .collect();

        let mut registry = inner.registry.lock();
        if registry.stopped {
            return;
        }
        for (record, event) in translated {
            Self::fan_out(&mut registry, &inner.config, record, &event);
            registry.dispatched = record.rv;
        }
        let dispatched = registry.dispatched;
        drop(registry);

        log.set_pin(dispatched);
        trace!(dispatched, "watch tailer caught up");
    }

    fn fan_out(
        registry: &mut Registry<T>,
        config: &WatchConfig,
        record: &MutationRecord,
        event: &Result<Arc<WatchEvent<T>>, WatchError>,
    ) {
        registry.subscribers.retain(|id, subscriber| {
            if !subscriber.filter.matches_key(&record.key) {
                return true;
            }
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(watcher_id = id, key = %record.key, rv = record.rv, "closing watcher on decode failure: {}", e);
                    subscriber.close(e.clone());
                    return false;
                }
            };
            let Some(projected) = subscriber.filter.apply(event) else {
                return true;
            };

            match subscriber.sender.try_send(Dispatch::Event(projected)) {
                Ok(()) => {
                    WATCH_EVENTS_DISPATCHED.inc();
                    true
                }
                Err(TrySendError::Full(_)) => {
                    warn!(
                        watcher_id = id,
                        rv = record.rv,
                        capacity = config.watcher_buffer_size,
                        "Watcher queue full, closing subscription"
                    );
                    WATCH_OVERFLOWS.inc();
                    subscriber.close(WatchError::Overflow {
                        watcher_id: *id,
                        capacity: config.watcher_buffer_size,
                    });
                    false
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(watcher_id = id, "Watcher session gone, removing");
                    false
                }
            }
        });
    }

    /// Sends `Bookmark(dispatched)` to every subscription that asked for it.
    /// Full queues skip the bookmark; a later one supersedes it.
    fn broadcast_progress(
        inner: &BroadcasterInner<T>,
        on_demand: bool,
    ) {
        let mut registry = inner.registry.lock();
        let rv = registry.dispatched;
        registry.subscribers.retain(|id, subscriber| {
            let wanted = if on_demand {
                subscriber.on_demand_progress
            } else {
                subscriber.progress_notify
            };
            if !wanted {
                return true;
            }
            match subscriber.sender.try_send(Dispatch::Bookmark(rv)) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    trace!(watcher_id = id, rv, "Watcher queue full, skipping bookmark");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            }
        });
    }
}
