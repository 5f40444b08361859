use bytes::Bytes;

/// Live object as held by the index. Deletions remove the entry; tombstones
/// exist only as delete records in the versioned log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    /// Encoded object with its resource version cleared
    pub value: Bytes,
    pub rv: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationKind {
    Create,
    Update,
    Delete,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Create => "create",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
        }
    }
}

/// One committed mutation. Immutable once appended to the log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub key: String,
    pub kind: MutationKind,
    /// New state for create/update; last live state for delete
    pub value: Bytes,
    /// State before this mutation (`None` for create)
    pub prev_value: Option<Bytes>,
    /// RV of `prev_value`, `0` for create
    pub prev_rv: u64,
    pub rv: u64,
}

/// Key scope of a list or watch.
///
/// A recursive filter matches every key below `prefix/`; a non-recursive one
/// matches the exact key only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyFilter {
    key: String,
    recursive: bool,
}

impl KeyFilter {
    pub fn new(
        key: impl Into<String>,
        recursive: bool,
    ) -> Self {
        let mut key = key.into();
        if recursive && !key.ends_with('/') {
            key.push('/');
        }
        Self { key, recursive }
    }

    pub fn exact(key: impl Into<String>) -> Self {
        Self::new(key, false)
    }

    pub fn prefix(key: impl Into<String>) -> Self {
        Self::new(key, true)
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn is_recursive(&self) -> bool {
        self.recursive
    }

    pub fn matches(
        &self,
        key: &str,
    ) -> bool {
        if self.recursive {
            key.starts_with(&self.key)
        } else {
            key == self.key
        }
    }
}

/// Expected state of a key at write time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DesiredVersion {
    /// Key must not exist
    Absent,
    /// Key must exist at exactly this resource version
    Exact(u64),
    /// Key must exist, any resource version
    AnyExisting,
}

/// State rebuilt by a backend on open
#[derive(Debug, Default)]
pub struct RecoveredState {
    pub resource_version: u64,
    pub objects: Vec<StoredObject>,
}
