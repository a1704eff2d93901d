//! In-memory implementation of SnapshotStore

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::store::{SnapshotStore, WindowSnapshot};
use crate::error::SnapshotError;

/// In-memory implementation of [`SnapshotStore`]
///
/// Useful for tests and for applications that only need snapshots to
/// survive the teardown of a single component, not of the process.
///
/// # Example
///
/// ```
/// use everload::InMemorySnapshotStore;
///
/// let store = InMemorySnapshotStore::new();
/// assert!(store.is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemorySnapshotStore {
    snapshots: RwLock<HashMap<String, WindowSnapshot>>,
}

impl InMemorySnapshotStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored snapshots
    pub fn len(&self) -> usize {
        self.snapshots.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.read().is_empty()
    }
}

#[async_trait]
impl SnapshotStore for InMemorySnapshotStore {
    async fn save(&self, key: &str, snapshot: WindowSnapshot) -> Result<(), SnapshotError> {
        self.snapshots.write().insert(key.to_string(), snapshot);
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<WindowSnapshot>, SnapshotError> {
        Ok(self.snapshots.read().get(key).cloned())
    }

    async fn remove(&self, key: &str) -> Result<bool, SnapshotError> {
        Ok(self.snapshots.write().remove(key).is_some())
    }
}
