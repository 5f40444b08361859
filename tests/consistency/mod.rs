mod guaranteed_update;
mod list_snapshot;
