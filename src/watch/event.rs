/// Event type for watch notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchEventType {
    /// Object entered the watched set (created, or started matching the predicate)
    Added,
    /// Object in the watched set changed
    Modified,
    /// Object left the watched set (deleted, or stopped matching the predicate)
    Deleted,
    /// Progress marker: every event up to `resource_version` has been delivered
    Bookmark,
}

impl WatchEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatchEventType::Added => "ADDED",
            WatchEventType::Modified => "MODIFIED",
            WatchEventType::Deleted => "DELETED",
            WatchEventType::Bookmark => "BOOKMARK",
        }
    }
}

/// Typed change notification delivered to a watch consumer
#[derive(Debug, Clone, PartialEq)]
pub struct WatchEvent<T> {
    pub event_type: WatchEventType,
    /// Storage key of the object; empty for bookmarks
    pub key: String,
    /// Object carrying `resource_version`; `None` for bookmarks
    pub object: Option<T>,
    /// State before a modification or deletion, at its own resource version
    pub prev_object: Option<T>,
    pub resource_version: u64,
    /// Set on the bookmark that ends an initial-events replay
    pub initial_events_end: bool,
}

impl<T> WatchEvent<T> {
    pub fn added(
        key: impl Into<String>,
        object: T,
        resource_version: u64,
    ) -> Self {
        Self {
            event_type: WatchEventType::Added,
            key: key.into(),
            object: Some(object),
            prev_object: None,
            resource_version,
            initial_events_end: false,
        }
    }

    pub fn modified(
        key: impl Into<String>,
        object: T,
        prev_object: Option<T>,
        resource_version: u64,
    ) -> Self {
        Self {
            event_type: WatchEventType::Modified,
            key: key.into(),
            object: Some(object),
            prev_object,
            resource_version,
            initial_events_end: false,
        }
    }

    pub fn deleted(
        key: impl Into<String>,
        object: T,
        prev_object: Option<T>,
        resource_version: u64,
    ) -> Self {
        Self {
            event_type: WatchEventType::Deleted,
            key: key.into(),
            object: Some(object),
            prev_object,
            resource_version,
            initial_events_end: false,
        }
    }

    pub fn bookmark(resource_version: u64) -> Self {
        Self {
            event_type: WatchEventType::Bookmark,
            key: String::new(),
            object: None,
            prev_object: None,
            resource_version,
            initial_events_end: false,
        }
    }

    pub fn initial_events_end(resource_version: u64) -> Self {
        Self {
            initial_events_end: true,
            ..Self::bookmark(resource_version)
        }
    }

    pub fn is_bookmark(&self) -> bool {
        self.event_type == WatchEventType::Bookmark
    }
}
