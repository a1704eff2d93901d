//! Pool counters
//!
//! Lock-free counters updated by submitters and worker tasks.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Running totals for a [`LoadPool`](super::LoadPool)
#[derive(Debug, Default)]
pub(crate) struct PoolStats {
    submitted: AtomicU64,
    coalesced: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    interrupted: AtomicU64,
}

/// Point-in-time copy of the pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStatsSnapshot {
    /// Executions started
    pub submitted: u64,
    /// Submissions that joined an execution already in flight
    pub coalesced: u64,
    /// Executions that delivered a value
    pub completed: u64,
    /// Executions that delivered an error
    pub failed: u64,
    /// Executions stopped before delivery
    pub interrupted: u64,
}

impl PoolStats {
    pub(crate) fn record_submitted(&self) {
        self.submitted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_interrupted(&self) {
        self.interrupted.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            interrupted: self.interrupted.load(Ordering::Relaxed),
        }
    }
}

impl PoolStatsSnapshot {
    /// Executions that are neither delivered nor interrupted yet
    pub fn pending(&self) -> u64 {
        self.submitted
            .saturating_sub(self.completed + self.failed + self.interrupted)
    }
}
