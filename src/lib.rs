//! Versioned object storage with ordered, resumable watches.
//!
//! Objects are stored under hierarchical keys (`/pods/<namespace>/<name>`).
//! Every mutation gets the next resource version and is appended to a
//! versioned log that feeds the watch engine, so a watcher starting at any
//! retained version sees every later matching change exactly once and in order.
mod codec;
mod config;
mod constants;
mod errors;
pub mod metrics;
mod storage;
mod store;
pub mod utils;
mod watch;

pub use codec::*;
pub use config::*;
pub use errors::*;
pub use storage::*;
pub use store::*;
pub use utils::*;
pub use watch::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
