use std::sync::Arc;

use crate::KeyFilter;
use crate::Object;
use crate::WatchEvent;
use crate::WatchEventType;

/// Object selector evaluated on every candidate event
pub type Predicate<T> = Arc<dyn Fn(&T) -> bool + Send + Sync>;

/// Key scope plus optional object predicate of one subscription
pub struct WatchFilter<T> {
    keys: KeyFilter,
    predicate: Option<Predicate<T>>,
}

impl<T> std::fmt::Debug for WatchFilter<T> {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("WatchFilter")
            .field("keys", &self.keys)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

impl<T: Object> WatchFilter<T> {
    pub fn new(
        keys: KeyFilter,
        predicate: Option<Predicate<T>>,
    ) -> Self {
        Self { keys, predicate }
    }

    pub fn keys(&self) -> &KeyFilter {
        &self.keys
    }

    pub fn matches_key(
        &self,
        key: &str,
    ) -> bool {
        self.keys.matches(key)
    }

    pub fn matches_object(
        &self,
        object: &T,
    ) -> bool {
        self.predicate.as_ref().map_or(true, |p| p(object))
    }

    /// Projects a shared event onto this subscription.
    ///
    /// Updates crossing the predicate boundary are rewritten:
    /// - old matched, new does not: `Deleted` carrying the old object at the new RV
    /// - old did not match, new does: `Added`
    pub fn apply(
        &self,
        event: &Arc<WatchEvent<T>>,
    ) -> Option<Arc<WatchEvent<T>>> {
        if event.is_bookmark() {
            return Some(event.clone());
        }
        if !self.matches_key(&event.key) {
            return None;
        }
        if self.predicate.is_none() {
            return Some(event.clone());
        }

        match event.event_type {
            WatchEventType::Added | WatchEventType::Deleted => {
                let matched = event.object.as_ref().is_some_and(|o| self.matches_object(o));
                matched.then(|| event.clone())
            }
            WatchEventType::Modified => {
                let cur = event.object.as_ref().is_some_and(|o| self.matches_object(o));
                let old = event.prev_object.as_ref().is_some_and(|o| self.matches_object(o));
                match (old, cur) {
                    (true, true) => Some(event.clone()),
                    (false, true) => {
                        let object = event.object.clone()?;
                        Some(Arc::new(WatchEvent::added(
                            event.key.clone(),
                            object,
                            event.resource_version,
                        )))
                    }
                    (true, false) => {
                        let mut object = event.prev_object.clone()?;
                        object.set_resource_version(event.resource_version);
                        Some(Arc::new(WatchEvent::deleted(
                            event.key.clone(),
                            object,
                            event.prev_object.clone(),
                            event.resource_version,
                        )))
                    }
                    (false, false) => None,
                }
            }
            WatchEventType::Bookmark => Some(event.clone()),
        }
    }
}
