//! Prometheus collectors for the store and watch engine.
//!
//! Collectors are process-global. Embedders expose them by calling
//! [`register_custom_metrics`] with their own registry, or by gathering
//! [`REGISTRY`].

use lazy_static::lazy_static;
use prometheus::IntCounter;
use prometheus::IntCounterVec;
use prometheus::IntGauge;
use prometheus::Opts;
use prometheus::Registry;


lazy_static! {
    pub static ref MUTATIONS_COMMITTED: IntCounterVec = IntCounterVec::new(
        Opts::new("dstore_mutations_committed", "Committed mutations by kind"),
        &["kind"]
    )
    .expect("metric can not be created");

    pub static ref WRITE_CONFLICTS: IntCounter = IntCounter::new(
        "dstore_write_conflicts",
        "Writes rejected by an optimistic concurrency check"
    )
    .expect("metric can not be created");

    pub static ref WATCH_EVENTS_DISPATCHED: IntCounter = IntCounter::new(
        "dstore_watch_events_dispatched",
        "Events handed to watcher delivery queues"
    )
    .expect("metric can not be created");

    pub static ref WATCH_OVERFLOWS: IntCounter = IntCounter::new(
        "dstore_watch_overflows",
        "Watchers closed because their delivery queue was full"
    )
    .expect("metric can not be created");

    pub static ref ACTIVE_WATCHERS: IntGauge = IntGauge::new(
        "dstore_active_watchers",
        "Currently registered watch subscriptions"
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = {
        let registry = Registry::new();
        register_custom_metrics(&registry);
        registry
    };
}

/// Registers every store collector into `registry`.
///
/// Registration errors (duplicate collectors) are ignored so the call is idempotent.
pub fn register_custom_metrics(registry: &Registry) {
    let _ = registry.register(Box::new(MUTATIONS_COMMITTED.clone()));
    let _ = registry.register(Box::new(WRITE_CONFLICTS.clone()));
    let _ = registry.register(Box::new(WATCH_EVENTS_DISPATCHED.clone()));
    let _ = registry.register(Box::new(WATCH_OVERFLOWS.clone()));
    let _ = registry.register(Box::new(ACTIVE_WATCHERS.clone()));
}
