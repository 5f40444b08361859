//! Persists live objects in an embedded sled database.
//!
//! Layout:
//! - `OBJECTS_TREE`: object key -> bincode(`PersistedEntry`)
//! - `META_TREE`: `META_KEY_LAST_RESOURCE_VERSION` -> big-endian u64
//!
//! Both trees are updated in one sled transaction per mutation.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use sled::transaction::ConflictableTransactionError;
use sled::transaction::TransactionError;
use sled::Transactional;
use tracing::debug;
use tracing::error;
use tracing::info;

use super::init_sled_store_db;
use crate::constants::META_KEY_LAST_RESOURCE_VERSION;
use crate::constants::META_TREE;
use crate::constants::OBJECTS_TREE;
use crate::convert::safe_kv;
use crate::convert::safe_vk;
use crate::ConvertError;
use crate::MutationKind;
use crate::MutationRecord;
use crate::RecoveredState;
use crate::Result;
use crate::StorageBackend;
use crate::StorageError;
use crate::StoredObject;

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    rv: u64,
    value: Vec<u8>,
}

pub struct SledBackend {
    db: sled::Db,
    objects: sled::Tree,
    meta: sled::Tree,
}

impl std::fmt::Debug for SledBackend {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledBackend")
            .field("objects_len", &self.objects.len())
            .finish()
    }
}

impl Drop for SledBackend {
    fn drop(&mut self) {
        if let Err(e) = self.db.flush() {
            error!("Failed to flush sled backend on drop: {}", e);
        }
    }
}

impl SledBackend {
    pub fn open(
        db_root_dir: impl AsRef<Path> + std::fmt::Debug,
        cache_capacity: u64,
    ) -> Result<Self> {
        let db = init_sled_store_db(db_root_dir, cache_capacity)?;
        Self::from_db(db)
    }

    pub fn from_db(db: sled::Db) -> Result<Self> {
        let objects = db.open_tree(OBJECTS_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        Ok(Self { db, objects, meta })
    }

    fn last_resource_version(&self) -> Result<u64> {
        match self.meta.get(META_KEY_LAST_RESOURCE_VERSION)? {
            Some(bytes) => safe_vk(&bytes),
            None => Ok(0),
        }
    }
}

impl StorageBackend for SledBackend {
    fn load(&self) -> Result<RecoveredState> {
        let resource_version = self.last_resource_version()?;
        let mut objects = Vec::with_capacity(self.objects.len());

        for item in self.objects.iter() {
            let (key, value) = item?;
            let key = String::from_utf8(key.to_vec())
                .map_err(|e| ConvertError::ConversionFailure(e.to_string()))?;
            let entry: PersistedEntry = bincode::deserialize(&value)?;
            objects.push(StoredObject {
                key,
                value: entry.value.into(),
                rv: entry.rv,
            });
        }

        info!(
            resource_version,
            objects = objects.len(),
            "sled backend recovered"
        );
        Ok(RecoveredState {
            resource_version,
            objects,
        })
    }

    fn persist(
        &self,
        record: &MutationRecord,
    ) -> Result<()> {
        let encoded = match record.kind {
            MutationKind::Create | MutationKind::Update => Some(bincode::serialize(&PersistedEntry {
                rv: record.rv,
                value: record.value.to_vec(),
            })?),
            MutationKind::Delete => None,
        };
        let key = record.key.as_bytes();
        let rv_bytes = safe_kv(record.rv);

        let result: std::result::Result<(), TransactionError<()>> =
            (&self.objects, &self.meta).transaction(|(objects, meta)| {
                match &encoded {
                    Some(value) => {
                        objects.insert(key, value.as_slice())?;
                    }
                    None => {
                        objects.remove(key)?;
                    }
                }
                meta.insert(META_KEY_LAST_RESOURCE_VERSION, &rv_bytes[..])?;
                Ok::<(), ConflictableTransactionError<()>>(())
            });

        result.map_err(|e| {
            error!(key = %record.key, rv = record.rv, "sled persist failed: {:?}", e);
            StorageError::DbError(format!("{e:?}"))
        })?;

        debug!(key = %record.key, rv = record.rv, kind = record.kind.as_str(), "persisted");
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        self.db.flush()?;
        Ok(())
    }

    fn name(&self) -> &'static str {
        "sled"
    }
}
