//! Append-only, gapless record of committed mutations.
//!
//! Records cover the half-open range `(floor, head]`. Every record's RV is
//! exactly one above its predecessor, so position in the deque is derived
//! from the RV.

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::debug;
use tracing::trace;
use tracing::warn;

use super::MutationRecord;
use crate::Error;
use crate::Result;
use crate::StoreError;

#[derive(Debug)]
struct LogInner {
    records: VecDeque<Arc<MutationRecord>>,
    /// Highest RV no longer retained
    floor: u64,
    /// Highest committed RV
    head: u64,
    /// Highest RV handed to the watch broadcaster. Records above it are never trimmed.
    pin: u64,
}

#[derive(Debug)]
pub struct VersionedLog {
    inner: RwLock<LogInner>,
    head_tx: watch::Sender<u64>,
    /// `0` disables automatic trimming
    max_retained: usize,
}

impl VersionedLog {
    /// Creates an empty log whose history starts after `start_rv`.
    ///
    /// A log opened on recovered state cannot serve reads at or below the
    /// recovered RV.
    pub fn new(
        start_rv: u64,
        max_retained: usize,
    ) -> Self {
        let (head_tx, _) = watch::channel(start_rv);
        Self {
            inner: RwLock::new(LogInner {
                records: VecDeque::new(),
                floor: start_rv,
                head: start_rv,
                pin: start_rv,
            }),
            head_tx,
            max_retained,
        }
    }

    pub fn head(&self) -> u64 {
        self.inner.read().head
    }

    pub fn floor(&self) -> u64 {
        self.inner.read().floor
    }

    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// RV the next append must carry. Only meaningful inside the writer section.
    pub fn next_rv(&self) -> u64 {
        self.inner.read().head + 1
    }

    /// Appends a record and publishes the new head.
    pub fn append(
        &self,
        record: MutationRecord,
    ) -> Result<u64> {
        let rv = record.rv;
        {
            let mut inner = self.inner.write();
            if rv != inner.head + 1 {
                return Err(Error::Fatal(format!(
                    "versioned log append out of order: head={}, record rv={}",
                    inner.head, rv
                )));
            }
            inner.records.push_back(Arc::new(record));
            inner.head = rv;
            if self.max_retained > 0 {
                Self::trim_to(&mut inner, self.max_retained);
            }
        }
        trace!(rv, "log append");
        self.head_tx.send_replace(rv);
        Ok(rv)
    }

    /// Records with RV in `(after, upto]`, ascending.
    ///
    /// Fails with `Compacted` when `after` is below the floor. `upto` is
    /// clamped to the current head.
    pub fn read_range(
        &self,
        after: u64,
        upto: u64,
    ) -> Result<Vec<Arc<MutationRecord>>> {
        let inner = self.inner.read();
        if after < inner.floor {
            return Err(StoreError::Compacted {
                requested: after,
                compacted: inner.floor,
            }
            .into());
        }
        let upto = upto.min(inner.head);
        if after >= upto {
            return Ok(Vec::new());
        }
        let start = (after - inner.floor) as usize;
        let end = (upto - inner.floor) as usize;
        Ok(inner.records.range(start..end).cloned().collect())
    }

    /// Records with RV `>= rv` up to the current head, ascending.
    pub fn read_from(
        &self,
        rv: u64,
    ) -> Result<Vec<Arc<MutationRecord>>> {
        self.read_range(rv.saturating_sub(1), u64::MAX)
    }

    /// Drops records with RV `<= rv`. Returns the resulting floor.
    ///
    /// Records not yet dispatched to watchers are kept; the floor stops at the
    /// dispatch pin.
    pub fn compact(
        &self,
        rv: u64,
    ) -> u64 {
        let mut inner = self.inner.write();
        let target = rv.min(inner.head);
        let effective = target.min(inner.pin);
        if effective < target {
            warn!(
                requested = rv,
                pin = inner.pin,
                "compaction clamped to the last dispatched resource version"
            );
        }
        while inner.floor < effective {
            inner.records.pop_front();
            inner.floor += 1;
        }
        debug!(floor = inner.floor, "log compacted");
        inner.floor
    }

    /// Marks every record up to `rv` as dispatched.
    pub fn set_pin(
        &self,
        rv: u64,
    ) {
        let mut inner = self.inner.write();
        if rv > inner.pin {
            inner.pin = rv.min(inner.head);
            if self.max_retained > 0 {
                Self::trim_to(&mut inner, self.max_retained);
            }
        }
    }

    /// Receiver notified every time the head advances
    pub fn subscribe_head(&self) -> watch::Receiver<u64> {
        self.head_tx.subscribe()
    }

    fn trim_to(
        inner: &mut LogInner,
        max_retained: usize,
    ) {
        while inner.records.len() > max_retained && inner.floor < inner.pin {
            inner.records.pop_front();
            inner.floor += 1;
        }
    }
}
