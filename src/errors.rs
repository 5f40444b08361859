//! Storage Error Hierarchy
//!
//! Errors are grouped by the layer that raises them:
//! - [`StoreError`]: storage-interface failures surfaced to API callers
//! - [`WatchError`]: terminal conditions of a single watch stream
//! - [`StorageError`]: durable backend and encoding failures

use std::time::Duration;

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Storage-interface failures (not found, conflicts, preconditions)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Watch subscription failures
    #[error(transparent)]
    Watch(#[from] WatchError),

    /// Backend, encoding and I/O failures
    #[error(transparent)]
    Storage(#[from] StorageError),

    /// Configuration validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Broken internal invariants
    #[error("Fatal error: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Key not found: {key}")]
    NotFound { key: String },

    #[error("Key already exists: {key}")]
    AlreadyExists { key: String },

    /// Optimistic concurrency failure (expected RV does not match stored RV)
    #[error("Conflict on {key}: expected resource version {expected}, found {actual}")]
    Conflict {
        key: String,
        expected: u64,
        actual: u64,
    },

    #[error("Precondition failed for {key}: {reason}")]
    PreconditionFailed { key: String, reason: String },

    /// Requested resource version is no longer retained in the log
    #[error("Resource version {requested} has been compacted (oldest retained: {compacted})")]
    Compacted { requested: u64, compacted: u64 },

    #[error("Too large resource version: {requested}, current: {current}")]
    TooLargeResourceVersion { requested: u64, current: u64 },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid continue token: {0}")]
    InvalidContinueToken(String),

    #[error("Operation canceled")]
    Canceled,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Store is not ready")]
    NotReady,
}

/// Terminal reasons for a watch subscription.
///
/// Cloned into every stream that is closed for the same reason.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WatchError {
    #[error("Resource version {requested} has been compacted (oldest retained: {compacted})")]
    Compacted { requested: u64, compacted: u64 },

    /// Watcher was too slow and its delivery queue filled up
    #[error("Watcher {watcher_id} fell behind: delivery queue of {capacity} events is full")]
    Overflow { watcher_id: u64, capacity: usize },

    #[error("Failed to decode object {key} at resource version {rv}: {reason}")]
    Decode {
        key: String,
        rv: u64,
        reason: String,
    },

    #[error("Watch broadcaster stopped")]
    Stopped,
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Serialization failures for persisted data
    #[error(transparent)]
    BincodeError(#[from] bincode::Error),

    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// Embedded database errors
    #[error("Embedded database error: {0}")]
    DbError(String),

    #[error("Object encode failed: {0}")]
    Encode(String),

    #[error("Object decode failed: {0}")]
    Decode(String),

    /// Error type for value conversion operations
    #[error("Value convert failed")]
    Convert(#[from] ConvertError),
}

/// Error type for value conversion operations
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    /// This occurs when the input byte slice length doesn't match the required 8 bytes.
    #[error("invalid byte length: expected 8 bytes, received {0} bytes")]
    InvalidLength(usize),

    #[error("conversion failure: {0}")]
    ConversionFailure(String),
}

// ============== Conversion Implementations ============== //
impl From<sled::Error> for StorageError {
    fn from(e: sled::Error) -> Self {
        StorageError::DbError(e.to_string())
    }
}

impl From<sled::Error> for Error {
    fn from(e: sled::Error) -> Self {
        Error::Storage(StorageError::from(e))
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(StorageError::IoError(e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::Storage(StorageError::BincodeError(e))
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Storage(StorageError::JsonError(e))
    }
}

impl From<ConvertError> for Error {
    fn from(e: ConvertError) -> Self {
        Error::Storage(StorageError::Convert(e))
    }
}

// ============== Classification helpers ============== //
impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotFound { .. }))
    }

    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Store(StoreError::AlreadyExists { .. }))
    }

    /// Retryable optimistic-concurrency failure
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Store(StoreError::Conflict { .. }))
    }

    pub fn is_precondition_failed(&self) -> bool {
        matches!(self, Error::Store(StoreError::PreconditionFailed { .. }))
    }

    /// Caller must restart from a fresh list
    pub fn is_compacted(&self) -> bool {
        matches!(
            self,
            Error::Store(StoreError::Compacted { .. }) | Error::Watch(WatchError::Compacted { .. })
        )
    }

    pub fn is_too_large_resource_version(&self) -> bool {
        matches!(self, Error::Store(StoreError::TooLargeResourceVersion { .. }))
    }
}

