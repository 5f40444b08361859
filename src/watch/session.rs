//! Per-watch delivery task.
//!
//! ```text
//! Init ──► Replaying ──► Live ──► Closed
//!   │                      ▲
//!   └──────────────────────┘   (no initial events)
//! ```
//!
//! The session owns a cursor: the highest RV delivered so far. Real events at
//! or below the cursor are duplicates of the snapshot or the catch-up and are
//! dropped; bookmarks below it are stale and dropped too.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use futures::Stream;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use super::CloseSlot;
use super::Dispatch;
use super::EventTranslator;
use super::Subscription;
use super::WatchBroadcaster;
use super::WatchFilter;
use crate::MutationRecord;
use crate::Object;
use crate::StoredObject;
use crate::WatchError;
use crate::WatchEvent;

/// Item yielded by a [`WatchStream`]. An `Err` is always the last item.
pub type WatchResult<T> = std::result::Result<WatchEvent<T>, WatchError>;

/// Lifecycle of a session task: `Init -> Replaying -> Live -> Closed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionState {
    Init,
    Replaying,
    Live,
    Closed,
}

/// Why a watch stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The caller's cancellation token fired or the stream was stopped/dropped
    Canceled,
    /// The watch deadline elapsed
    Timeout,
    /// The consumer dropped its end of the stream
    ConsumerDropped,
    /// Terminal failure, also delivered to the consumer as the final item
    Error(WatchError),
}

pub(crate) struct SessionParams<T> {
    pub subscription: Subscription<T>,
    pub filter: Arc<WatchFilter<T>>,
    pub translator: EventTranslator<T>,
    pub broadcaster: WatchBroadcaster<T>,
    /// Emit the initial-events-end bookmark after the snapshot replay
    pub send_end_bookmark: bool,
    pub cancel: CancellationToken,
    pub deadline: Option<Instant>,
    pub stream_buffer_size: usize,
}

struct WatcherSession<T> {
    id: u64,
    state: SessionState,
    cursor: u64,
    filter: Arc<WatchFilter<T>>,
    translator: EventTranslator<T>,
    broadcaster: WatchBroadcaster<T>,
    send_end_bookmark: bool,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    out: mpsc::Sender<WatchResult<T>>,
    close_slot: CloseSlot,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

/// Spawns the session task and returns the consumer end.
pub(crate) fn spawn_session<T: Object>(params: SessionParams<T>) -> WatchStream<T> {
    let SessionParams {
        subscription,
        filter,
        translator,
        broadcaster,
        send_end_bookmark,
        cancel,
        deadline,
        stream_buffer_size,
    } = params;

    let (out, receiver) = mpsc::channel(stream_buffer_size);
    let reason = Arc::new(Mutex::new(None));
    let id = subscription.id;

    let session = WatcherSession {
        id,
        state: SessionState::Init,
        cursor: subscription.start_rv,
        filter,
        translator,
        broadcaster,
        send_end_bookmark,
        cancel: cancel.clone(),
        deadline,
        out,
        close_slot: subscription.close_slot.clone(),
        reason: reason.clone(),
    };

    tokio::spawn(session.run(
        subscription.snapshot,
        subscription.catch_up,
        subscription.receiver,
    ));

    WatchStream {
        id,
        receiver,
        cancel,
        reason,
    }
}

impl<T: Object> WatcherSession<T> {
    async fn run(
        mut self,
        snapshot: Option<Vec<Arc<StoredObject>>>,
        catch_up: Vec<Arc<MutationRecord>>,
        mut queue: mpsc::Receiver<Dispatch<T>>,
    ) {
        let reason = match self.deliver(snapshot, catch_up, &mut queue).await {
            Ok(never) => match never {},
            Err(reason) => reason,
        };
        self.close(reason).await;
    }

    async fn deliver(
        &mut self,
        snapshot: Option<Vec<Arc<StoredObject>>>,
        catch_up: Vec<Arc<MutationRecord>>,
        queue: &mut mpsc::Receiver<Dispatch<T>>,
    ) -> Result<Infallible, CloseReason> {
        if let Some(objects) = snapshot {
            self.state = SessionState::Replaying;
            let snapshot_rv = self.cursor;
            trace!(watcher_id = self.id, snapshot_rv, objects = objects.len(), "replaying initial events");
            for stored in objects {
                let object = self.translator.decode_stored(&stored).map_err(CloseReason::Error)?;
                if !self.filter.matches_object(&object) {
                    continue;
                }
                self.emit(Ok(WatchEvent::added(stored.key.clone(), object, stored.rv))).await?;
            }
            if self.send_end_bookmark {
                self.emit(Ok(WatchEvent::initial_events_end(snapshot_rv))).await?;
            }
        }

        self.state = SessionState::Live;

        for record in catch_up {
            if record.rv <= self.cursor {
                continue;
            }
            let event = self.translator.translate(&record).map_err(CloseReason::Error)?;
            if let Some(event) = self.filter.apply(&Arc::new(event)) {
                self.emit(Ok(event.as_ref().clone())).await?;
            }
            self.cursor = record.rv;
        }

        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(CloseReason::Canceled),
                _ = sleep_until_deadline(self.deadline) => return Err(CloseReason::Timeout),
                _ = self.out.closed() => return Err(CloseReason::ConsumerDropped),
                next = queue.recv() => next,
            };

            match next {
                Some(Dispatch::Event(event)) => {
                    if event.resource_version <= self.cursor {
                        continue;
                    }
                    let rv = event.resource_version;
                    self.emit(Ok(event.as_ref().clone())).await?;
                    self.cursor = rv;
                }
                Some(Dispatch::Bookmark(rv)) => {
                    if rv < self.cursor {
                        continue;
                    }
                    self.emit(Ok(WatchEvent::bookmark(rv))).await?;
                    self.cursor = rv;
                }
                None => {
                    let err = self.close_slot.lock().take().unwrap_or(WatchError::Stopped);
                    return Err(CloseReason::Error(err));
                }
            }
        }
    }

    /// Delivers one item unless the watch is torn down first.
    async fn emit(
        &self,
        item: WatchResult<T>,
    ) -> Result<(), CloseReason> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(CloseReason::Canceled),
            _ = sleep_until_deadline(self.deadline) => Err(CloseReason::Timeout),
            sent = self.out.send(item) => sent.map_err(|_| CloseReason::ConsumerDropped),
        }
    }

    async fn close(
        mut self,
        reason: CloseReason,
    ) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.broadcaster.unregister(self.id);
        *self.reason.lock() = Some(reason.clone());

        if let CloseReason::Error(err) = &reason {
            // Best effort: the consumer may already be gone
            let _ = self.emit(Err(err.clone())).await;
        }
        debug!(watcher_id = self.id, ?reason, "watch closed");
    }
}

async fn sleep_until_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Consumer end of a watch.
///
/// Dropping the stream cancels the watch.
pub struct WatchStream<T> {
    id: u64,
    receiver: mpsc::Receiver<WatchResult<T>>,
    cancel: CancellationToken,
    reason: Arc<Mutex<Option<CloseReason>>>,
}

impl<T> std::fmt::Debug for WatchStream<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchStream")
            .field("id", &self.id)
            .field("close_reason", &*self.reason.lock())
            .finish()
    }
}

impl<T> WatchStream<T> {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event. `None` once the watch is closed and drained.
    pub async fn recv(&mut self) -> Option<WatchResult<T>> {
        self.receiver.recv().await
    }

    /// Cancels the watch. Events already queued remain readable.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Why the watch ended, once the session has closed
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.reason.lock().clone()
    }
}

impl<T> Stream for WatchStream<T> {
    type Item = WatchResult<T>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl<T> Drop for WatchStream<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
