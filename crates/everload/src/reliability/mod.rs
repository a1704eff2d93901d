//! Retry behaviour for loads
//!
//! This module provides:
//! - [`RetryPolicy`] - Attempt limit and backoff schedule
//! - [`RetryingTask`] - Runs a loader until success, fatal error, limit or interruption

mod retry;
mod task;

pub use retry::{Backoff, RetryPolicy};
pub use task::{RetryingTask, TaskState};
