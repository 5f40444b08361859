//! Watch engine: translation, fan-out and per-watch delivery of committed
//! mutations.
mod broadcaster;
mod event;
mod filter;
mod session;
mod translator;


pub use broadcaster::WatchBroadcaster;
pub(crate) use broadcaster::*;
pub use event::*;
pub use filter::*;
pub(crate) use session::spawn_session;
pub(crate) use session::SessionParams;
pub use session::CloseReason;
pub use session::WatchResult;
pub use session::WatchStream;
pub use translator::*;
