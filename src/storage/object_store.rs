//! Key -> (object bytes, RV) index coupled to the versioned log.
//!
//! Every mutation runs in one writer section:
//! precondition check, RV assignment, backend persist, log append, index publish.
//! If the backend rejects the record nothing becomes visible.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tracing::debug;
use tracing::instrument;
use tracing::warn;

use super::DesiredVersion;
use super::KeyFilter;
use super::MutationKind;
use super::MutationRecord;
use super::StorageBackend;
use super::StoredObject;
use super::VersionedLog;
use crate::metrics::MUTATIONS_COMMITTED;
use crate::metrics::WRITE_CONFLICTS;
use crate::Result;
use crate::StoreError;

#[derive(Debug, Default)]
struct IndexState {
    /// RV of the last mutation published to the index
    rv: u64,
    objects: BTreeMap<String, Arc<StoredObject>>,
}

impl IndexState {
    fn scan(
        &self,
        filter: &KeyFilter,
    ) -> Vec<Arc<StoredObject>> {
        if !filter.is_recursive() {
            return self.objects.get(filter.key()).cloned().into_iter().collect();
        }
        self.objects
            .range::<str, _>((Bound::Included(filter.key()), Bound::Unbounded))
            .take_while(|(k, _)| filter.matches(k))
            .map(|(_, v)| v.clone())
            .collect()
    }
}

pub struct ObjectStore {
    writer: Mutex<()>,
    index: RwLock<IndexState>,
    log: Arc<VersionedLog>,
    backend: Arc<dyn StorageBackend>,
}

impl std::fmt::Debug for ObjectStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        let index = self.index.read();
        f.debug_struct("ObjectStore")
            .field("backend", &self.backend.name())
            .field("rv", &index.rv)
            .field("objects", &index.objects.len())
            .finish()
    }
}

impl ObjectStore {
    /// Rebuilds the index from `backend`. The log starts empty with its floor
    /// at the recovered RV.
    pub fn open(
        backend: Arc<dyn StorageBackend>,
        max_retained_records: usize,
    ) -> Result<Self> {
        let recovered = backend.load()?;
        let objects = recovered
            .objects
            .into_iter()
            .map(|o| (o.key.clone(), Arc::new(o)))
            .collect::<BTreeMap<_, _>>();

        debug!(
            backend = backend.name(),
            rv = recovered.resource_version,
            objects = objects.len(),
            "object store opened"
        );

        Ok(Self {
            writer: Mutex::new(()),
            index: RwLock::new(IndexState {
                rv: recovered.resource_version,
                objects,
            }),
            log: Arc::new(VersionedLog::new(recovered.resource_version, max_retained_records)),
            backend,
        })
    }

    pub fn log(&self) -> &Arc<VersionedLog> {
        &self.log
    }

    pub fn current_rv(&self) -> u64 {
        self.index.read().rv
    }

    /// Returns the live object at `key` and the RV the read was served at.
    pub fn get(
        &self,
        key: &str,
    ) -> (Option<Arc<StoredObject>>, u64) {
        let index = self.index.read();
        (index.objects.get(key).cloned(), index.rv)
    }

    /// Live objects matching `filter` in key order, with the RV of the snapshot.
    pub fn snapshot(
        &self,
        filter: &KeyFilter,
    ) -> (Vec<Arc<StoredObject>>, u64) {
        let index = self.index.read();
        (index.scan(filter), index.rv)
    }

    /// Reconstructs the objects matching `filter` as they were at `rv`.
    ///
    /// Walks the log backwards from the current RV, undoing every mutation
    /// above `rv`.
    pub fn snapshot_at(
        &self,
        filter: &KeyFilter,
        rv: u64,
    ) -> Result<Vec<Arc<StoredObject>>> {
        let index = self.index.read();
        if rv > index.rv {
            return Err(StoreError::TooLargeResourceVersion {
                requested: rv,
                current: index.rv,
            }
            .into());
        }
        if rv == index.rv {
            return Ok(index.scan(filter));
        }

        let newer = self.log.read_range(rv, index.rv)?;
        let mut objects: BTreeMap<String, Arc<StoredObject>> = index
            .scan(filter)
            .into_iter()
            .map(|o| (o.key.clone(), o))
            .collect();
        drop(index);

        for record in newer.iter().rev().filter(|r| filter.matches(&r.key)) {
            match (record.kind, &record.prev_value) {
                (MutationKind::Create, _) | (_, None) => {
                    objects.remove(&record.key);
                }
                (MutationKind::Update | MutationKind::Delete, Some(prev)) => {
                    objects.insert(
                        record.key.clone(),
                        Arc::new(StoredObject {
                            key: record.key.clone(),
                            value: prev.clone(),
                            rv: record.prev_rv,
                        }),
                    );
                }
            }
        }
        Ok(objects.into_values().collect())
    }

    pub fn count(
        &self,
        filter: &KeyFilter,
    ) -> usize {
        let index = self.index.read();
        if !filter.is_recursive() {
            return usize::from(index.objects.contains_key(filter.key()));
        }
        index
            .objects
            .range::<str, _>((Bound::Included(filter.key()), Bound::Unbounded))
            .take_while(|(k, _)| filter.matches(k))
            .count()
    }

    /// Creates or replaces `key` if it is in the `desired` state.
    #[instrument(skip(self, value), fields(value_len = value.len()))]
    pub fn put(
        &self,
        key: &str,
        desired: DesiredVersion,
        value: bytes::Bytes,
    ) -> Result<Arc<StoredObject>> {
        let _guard = self.writer.lock();
        let current = self.index.read().objects.get(key).cloned();

        match (desired, &current) {
            (DesiredVersion::Absent, Some(_)) => {
                return Err(StoreError::AlreadyExists {
                    key: key.to_string(),
                }
                .into());
            }
            (DesiredVersion::Exact(_) | DesiredVersion::AnyExisting, None) => {
                return Err(StoreError::NotFound {
                    key: key.to_string(),
                }
                .into());
            }
            (DesiredVersion::Exact(expected), Some(obj)) if obj.rv != expected => {
                WRITE_CONFLICTS.inc();
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    expected,
                    actual: obj.rv,
                }
                .into());
            }
            _ => {}
        }

        let record = MutationRecord {
            key: key.to_string(),
            kind: if current.is_some() {
                MutationKind::Update
            } else {
                MutationKind::Create
            },
            value,
            prev_value: current.as_ref().map(|o| o.value.clone()),
            prev_rv: current.as_ref().map(|o| o.rv).unwrap_or(0),
            rv: self.log.next_rv(),
        };
        let stored = Arc::new(StoredObject {
            key: record.key.clone(),
            value: record.value.clone(),
            rv: record.rv,
        });

        self.commit(record)?;
        Ok(stored)
    }

    /// Removes `key` if it is in the `desired` state and `check` accepts the
    /// current object. Returns the last live object and the delete's RV.
    #[instrument(skip(self, check))]
    pub fn delete<F>(
        &self,
        key: &str,
        desired: DesiredVersion,
        check: F,
    ) -> Result<(Arc<StoredObject>, u64)>
    where
        F: FnOnce(&StoredObject) -> Result<()>,
    {
        let _guard = self.writer.lock();
        let current = self.index.read().objects.get(key).cloned().ok_or_else(|| {
            StoreError::NotFound {
                key: key.to_string(),
            }
        })?;

        match desired {
            DesiredVersion::Absent => {
                return Err(StoreError::InvalidArgument(format!(
                    "delete of {key} cannot require the key to be absent"
                ))
                .into());
            }
            DesiredVersion::Exact(expected) if current.rv != expected => {
                WRITE_CONFLICTS.inc();
                return Err(StoreError::Conflict {
                    key: key.to_string(),
                    expected,
                    actual: current.rv,
                }
                .into());
            }
            _ => {}
        }
        check(&current)?;

        let rv = self.log.next_rv();
        self.commit(MutationRecord {
            key: key.to_string(),
            kind: MutationKind::Delete,
            value: current.value.clone(),
            prev_value: Some(current.value.clone()),
            prev_rv: current.rv,
            rv,
        })?;
        Ok((current, rv))
    }

    /// Drops log history at or below `rv`. Returns the new floor.
    pub fn compact(
        &self,
        rv: u64,
    ) -> u64 {
        self.log.compact(rv)
    }

    pub fn flush(&self) -> Result<()> {
        self.backend.flush()
    }

    /// Must be called with the writer lock held.
    fn commit(
        &self,
        record: MutationRecord,
    ) -> Result<()> {
        if let Err(e) = self.backend.persist(&record) {
            warn!(key = %record.key, rv = record.rv, "backend persist failed: {}", e);
            return Err(e);
        }

        let kind = record.kind;
        let key = record.key.clone();
        let rv = record.rv;
        let live = match kind {
            MutationKind::Delete => None,
            MutationKind::Create | MutationKind::Update => Some(Arc::new(StoredObject {
                key: key.clone(),
                value: record.value.clone(),
                rv,
            })),
        };

        // Log and index advance under the index write guard so readers never
        // observe an index RV the log does not cover.
        let mut index = self.index.write();
        self.log.append(record)?;
        match live {
            Some(obj) => {
                index.objects.insert(key.clone(), obj);
            }
            None => {
                index.objects.remove(&key);
            }
        }
        index.rv = rv;
        drop(index);

        MUTATIONS_COMMITTED.with_label_values(&[kind.as_str()]).inc();
        debug!(%key, rv, kind = kind.as_str(), "mutation committed");
        Ok(())
    }
}
