//! Object encoding seam.
//!
//! The store never inspects object payloads. It only needs to:
//! - turn a typed object into bytes and back ([`Codec`])
//! - read and stamp the resource version ([`Object`])
//! - derive the storage key of an object ([`KeyFunc`])

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::Result;
use crate::StorageError;

/// Contract every stored object type fulfils.
///
/// The resource version is owned by the store: it is cleared before encoding
/// and stamped from the stored version on every read.
pub trait Object: Clone + Send + Sync + 'static {
    fn resource_version(&self) -> u64;

    fn set_resource_version(
        &mut self,
        rv: u64,
    );

    /// Unique identity checked by UID preconditions
    fn uid(&self) -> Option<&str> {
        None
    }
}

pub trait Codec<T>: Send + Sync + 'static {
    fn encode(
        &self,
        object: &T,
    ) -> Result<Bytes>;

    fn decode(
        &self,
        data: &[u8],
    ) -> Result<T>;
}

/// Derives the storage key (e.g. `/pods/<namespace>/<name>`) of an object
pub type KeyFunc<T> = Arc<dyn Fn(&T) -> Result<String> + Send + Sync>;

/// Compact binary encoding backed by `bincode`
pub struct BincodeCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> BincodeCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for BincodeCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BincodeCodec<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("BincodeCodec")
    }
}

impl<T> Codec<T> for BincodeCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(
        &self,
        object: &T,
    ) -> Result<Bytes> {
        let buf = bincode::serialize(object)
            .map_err(|e| StorageError::Encode(format!("{e:?}")))?;
        Ok(Bytes::from(buf))
    }

    fn decode(
        &self,
        data: &[u8],
    ) -> Result<T> {
        bincode::deserialize(data).map_err(|e| StorageError::Decode(format!("{e:?}")).into())
    }
}

/// Human readable encoding backed by `serde_json`
pub struct JsonCodec<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonCodec<T> {
    pub fn new() -> Self {
        Self {
            _marker: PhantomData,
        }
    }
}

impl<T> Default for JsonCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for JsonCodec<T> {
    fn fmt(
        &self,
        f: &mut fmt::Formatter<'_>,
    ) -> fmt::Result {
        f.write_str("JsonCodec")
    }
}

impl<T> Codec<T> for JsonCodec<T>
where
    T: Serialize + DeserializeOwned + 'static,
{
    fn encode(
        &self,
        object: &T,
    ) -> Result<Bytes> {
        let buf =
            serde_json::to_vec(object).map_err(|e| StorageError::Encode(e.to_string()))?;
        Ok(Bytes::from(buf))
    }

    fn decode(
        &self,
        data: &[u8],
    ) -> Result<T> {
        serde_json::from_slice(data).map_err(|e| StorageError::Decode(e.to_string()).into())
    }
}

/// Encodes `object` with its resource version cleared.
pub(crate) fn encode_object<T: Object>(
    codec: &dyn Codec<T>,
    object: &T,
) -> Result<Bytes> {
    if object.resource_version() == 0 {
        return codec.encode(object);
    }
    let mut stripped = object.clone();
    stripped.set_resource_version(0);
    codec.encode(&stripped)
}

/// Decodes `data` and stamps it with the stored resource version.
pub(crate) fn decode_object<T: Object>(
    codec: &dyn Codec<T>,
    data: &[u8],
    rv: u64,
) -> Result<T> {
    let mut object = codec.decode(data)?;
    object.set_resource_version(rv);
    Ok(object)
}
