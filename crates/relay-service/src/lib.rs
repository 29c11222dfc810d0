//! relay-service: process wiring around `relay-core`.
//!
//! The binary is a thin shell over this library so the loops and setup
//! helpers can be driven from integration tests.

pub mod cleanup;
pub mod setup;

pub use cleanup::{spawn_cleanup_loop, CleanupHandle};
pub use setup::{load_config, open_relay, reindex_stores};
