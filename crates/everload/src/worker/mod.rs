//! Deduplicating worker pool for keyed loads
//!
//! This module provides:
//! - [`LoadPool`] - Coalesces concurrent loads per key and fans results out
//! - [`Loader`] - The unit of work a pool executes
//! - [`PoolConfig`] - Worker sizing and the pool-wide retry delay switch
//!
//! # Architecture
//!
//! ```text
//! submit(key) ──► ┌──────────────────────────────┐
//!                 │  in-flight: key → waiters     │──► coalesced (false)
//!                 └──────────────┬───────────────┘
//!                                │ new key (true)
//!                                ▼
//!                 ┌──────────────────────────────┐
//!                 │  Semaphore (max_workers)      │  queued until a permit frees
//!                 └──────────────┬───────────────┘
//!                                ▼
//!                 ┌──────────────────────────────┐
//!                 │  RetryingTask                 │  attempts, backoff, cancellation
//!                 └──────────────┬───────────────┘
//!                                ▼
//!                 remove waiters ──► Dispatcher ──► callbacks in registration order
//! ```

mod loader;
mod pool;
mod stats;

pub use loader::{blocking_loader, loader_fn, BlockingLoader, FnLoader, Loader};
pub use pool::{Completion, LoadPool, PoolConfig, Submission, WaiterId};
pub use stats::PoolStatsSnapshot;
