//! Persistence boundary for pager windows
//!
//! This module provides:
//! - [`SnapshotStore`] trait for saving and restoring window snapshots
//! - [`InMemorySnapshotStore`] for testing

mod memory;
mod store;

pub use memory::InMemorySnapshotStore;
pub use store::{SnapshotStore, WindowSnapshot};
