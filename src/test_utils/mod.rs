//! Shared fixtures for unit tests
mod pod;

pub use pod::*;
