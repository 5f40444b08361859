use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::Predicate;

#[derive(Debug, Clone, Default)]
pub struct GetOptions {
    /// Return `Ok(None)` instead of `NotFound`
    pub ignore_not_found: bool,
    /// Minimum resource version the read must reflect. `0` reads the latest state.
    pub resource_version: u64,
}

/// How `ListOptions::resource_version` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResourceVersionMatch {
    /// Serve a snapshot at least as new as the requested RV (the latest one)
    #[default]
    NotOlderThan,
    /// Serve the snapshot at exactly the requested RV
    Exact,
}

pub struct ListOptions<T> {
    /// `0` lists the latest state
    pub resource_version: u64,
    pub resource_version_match: ResourceVersionMatch,
    /// Maximum items per page. `0` returns everything.
    pub limit: usize,
    /// Token from a previous page. Pages are served at the first page's RV.
    pub continue_token: Option<String>,
    /// List every key under the prefix instead of the exact key
    pub recursive: bool,
    pub predicate: Option<Predicate<T>>,
}

impl<T> Default for ListOptions<T> {
    fn default() -> Self {
        Self {
            resource_version: 0,
            resource_version_match: ResourceVersionMatch::default(),
            limit: 0,
            continue_token: None,
            recursive: true,
            predicate: None,
        }
    }
}

impl<T> Clone for ListOptions<T> {
    fn clone(&self) -> Self {
        Self {
            resource_version: self.resource_version,
            resource_version_match: self.resource_version_match,
            limit: self.limit,
            continue_token: self.continue_token.clone(),
            recursive: self.recursive,
            predicate: self.predicate.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    /// RV the page was served at
    pub resource_version: u64,
    /// Present when more items follow
    pub continue_token: Option<String>,
    /// Items left after this page; only known when no predicate filters the list
    pub remaining_item_count: Option<u64>,
}

/// Watch start and delivery options.
///
/// Start position:
/// - `resource_version == 0`, `send_initial_events == None`: replay the current
///   state as `Added` events, then stream changes
/// - `resource_version == 0`, `send_initial_events == Some(false)`: only changes
///   after the watch starts
/// - `send_initial_events == Some(true)`: replay the current state; a bookmark
///   flagged `initial_events_end` follows when `allow_watch_bookmarks` is set
/// - `resource_version == r > 0`: changes with RV greater than `r`
pub struct WatchOptions<T> {
    pub resource_version: u64,
    pub send_initial_events: Option<bool>,
    /// Accept bookmarks. Does not enable periodic bookmarks on its own.
    pub allow_watch_bookmarks: bool,
    /// Periodic progress bookmarks
    pub progress_notify: bool,
    pub recursive: bool,
    pub predicate: Option<Predicate<T>>,
    /// Ends the watch gracefully once elapsed
    pub timeout: Option<Duration>,
    /// Parent token; cancelling it ends the watch
    pub cancel: Option<CancellationToken>,
}

impl<T> Default for WatchOptions<T> {
    fn default() -> Self {
        Self {
            resource_version: 0,
            send_initial_events: None,
            allow_watch_bookmarks: false,
            progress_notify: false,
            recursive: true,
            predicate: None,
            timeout: None,
            cancel: None,
        }
    }
}

/// Conditions the stored object must meet before an update or delete
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Preconditions {
    pub uid: Option<String>,
    pub resource_version: Option<u64>,
}

impl Preconditions {
    pub fn with_uid(uid: impl Into<String>) -> Self {
        Self {
            uid: Some(uid.into()),
            resource_version: None,
        }
    }

    pub fn with_resource_version(rv: u64) -> Self {
        Self {
            uid: None,
            resource_version: Some(rv),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct UpdateOptions {
    pub preconditions: Option<Preconditions>,
    /// Pass `None` to the update function instead of failing on a missing key
    pub ignore_not_found: bool,
    pub cancel: Option<CancellationToken>,
    /// Overrides `update.default_timeout_ms`
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, Default)]
pub struct DeleteOptions {
    pub preconditions: Option<Preconditions>,
}
