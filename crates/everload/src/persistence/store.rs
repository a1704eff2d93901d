//! SnapshotStore trait definition

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;

/// Persisted shape of a pager window
///
/// `items` is an opaque blob produced by the pager; stores must hand it
/// back byte for byte.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSnapshot {
    /// Absolute position of the first held item
    pub offset: usize,
    /// Serialized held items
    pub items: Vec<u8>,
}

impl WindowSnapshot {
    pub fn new(offset: usize, items: Vec<u8>) -> Self {
        Self { offset, items }
    }
}

/// Persistence collaborator for pager windows
///
/// Implementations decide where snapshots live; the pager only relies on
/// a save followed by a load returning the same snapshot.
#[async_trait]
pub trait SnapshotStore: Send + Sync + 'static {
    /// Store `snapshot` under `key`, replacing any previous one
    async fn save(&self, key: &str, snapshot: WindowSnapshot) -> Result<(), SnapshotError>;

    /// Fetch the snapshot stored under `key`
    async fn load(&self, key: &str) -> Result<Option<WindowSnapshot>, SnapshotError>;

    /// Remove the snapshot stored under `key`, returning whether one existed
    async fn remove(&self, key: &str) -> Result<bool, SnapshotError>;
}
