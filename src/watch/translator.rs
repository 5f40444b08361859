use std::sync::Arc;

use crate::codec::decode_object;
use crate::Codec;
use crate::MutationKind;
use crate::MutationRecord;
use crate::Object;
use crate::StoredObject;
use crate::WatchError;
use crate::WatchEvent;

/// Turns committed mutation records into typed watch events.
///
/// Stateless apart from the codec; every record is translated once by the
/// broadcaster and shared by all subscribers.
pub struct EventTranslator<T> {
    codec: Arc<dyn Codec<T>>,
}

impl<T> Clone for EventTranslator<T> {
    fn clone(&self) -> Self {
        Self {
            codec: self.codec.clone(),
        }
    }
}

impl<T: Object> EventTranslator<T> {
    pub fn new(codec: Arc<dyn Codec<T>>) -> Self {
        Self { codec }
    }

    pub fn translate(
        &self,
        record: &MutationRecord,
    ) -> Result<WatchEvent<T>, WatchError> {
        match record.kind {
            MutationKind::Create => {
                let object = self.decode(&record.key, &record.value, record.rv)?;
                Ok(WatchEvent::added(record.key.clone(), object, record.rv))
            }
            MutationKind::Update => {
                let object = self.decode(&record.key, &record.value, record.rv)?;
                let prev = self.decode_prev(record)?;
                Ok(WatchEvent::modified(record.key.clone(), object, prev, record.rv))
            }
            MutationKind::Delete => {
                // Last live state, stamped with the RV of the deletion
                let object = self.decode(&record.key, &record.value, record.rv)?;
                let prev = self.decode_prev(record)?;
                Ok(WatchEvent::deleted(record.key.clone(), object, prev, record.rv))
            }
        }
    }

    /// Decodes an index entry for an initial-events replay
    pub fn decode_stored(
        &self,
        stored: &StoredObject,
    ) -> Result<T, WatchError> {
        self.decode(&stored.key, &stored.value, stored.rv)
    }

    fn decode_prev(
        &self,
        record: &MutationRecord,
    ) -> Result<Option<T>, WatchError> {
        record
            .prev_value
            .as_ref()
            .map(|prev| self.decode(&record.key, prev, record.prev_rv))
            .transpose()
    }

    fn decode(
        &self,
        key: &str,
        value: &[u8],
        rv: u64,
    ) -> Result<T, WatchError> {
        decode_object(self.codec.as_ref(), value, rv).map_err(|e| WatchError::Decode {
            key: key.to_string(),
            rv,
            reason: e.to_string(),
        })
    }
}
