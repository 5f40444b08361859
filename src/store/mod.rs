//! Storage interface exposed to the API layer and its versioned implementation.
mod continue_token;
mod interface;
mod options;
mod versioned_store;


pub use interface::*;
pub use options::*;
pub use versioned_store::*;
