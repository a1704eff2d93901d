//! Retrying task: one keyed load wrapped in a bounded retry loop

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::retry::RetryPolicy;
use crate::error::LoadError;
use crate::worker::Loader;

/// Lifecycle of a retrying task
///
/// ```text
/// Idle ──► Running ──► Succeeded
///             │  ▲
///   no value  │  │ delay elapsed
///             ▼  │
///          Retrying ──► RetryLimitExceeded
///
/// Running ──► Failed        (loader error)
/// any     ──► Interrupted   (cancellation observed at a safe point)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Running,
    Retrying,
    Succeeded,
    Failed,
    RetryLimitExceeded,
    Interrupted,
}

/// A load wrapped with a bounded-retry policy
///
/// Cancellation is checked before each attempt, before and after the
/// inter-attempt delay, and once more before the outcome is returned. An
/// interrupted task yields [`LoadError::Interrupted`], which callers must
/// swallow rather than deliver.
pub struct RetryingTask<K, V> {
    loader: Arc<dyn Loader<K, V>>,
    policy: RetryPolicy,
    delay_enabled: bool,
    cancel: CancellationToken,
    retry_count: u32,
    state: TaskState,
}

impl<K, V> RetryingTask<K, V>
where
    K: Send + Sync + 'static,
    V: Send + 'static,
{
    /// Create a task with a fresh cancellation token and delays enabled
    pub fn new(loader: Arc<dyn Loader<K, V>>, policy: RetryPolicy) -> Self {
        Self {
            loader,
            policy,
            delay_enabled: true,
            cancel: CancellationToken::new(),
            retry_count: 0,
            state: TaskState::Idle,
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Enable or disable the inter-attempt delay
    pub fn with_delay(mut self, enabled: bool) -> Self {
        self.delay_enabled = enabled;
        self
    }

    /// Handle that interrupts this task
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Number of transient failures seen so far
    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Current lifecycle state
    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Run attempts until success, a fatal error, the retry limit or interruption
    pub async fn run(&mut self, key: &K) -> Result<V, LoadError> {
        loop {
            if self.cancel.is_cancelled() {
                return self.interrupted();
            }

            self.state = TaskState::Running;
            let attempt = self.retry_count + 1;
            trace!(attempt, "Starting load attempt");

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => None,
                outcome = self.loader.load(key) => Some(outcome),
            };

            // Never report a result once interrupted
            let Some(outcome) = outcome.filter(|_| !self.cancel.is_cancelled()) else {
                return self.interrupted();
            };

            match outcome {
                Ok(Some(value)) => {
                    self.state = TaskState::Succeeded;
                    return Ok(value);
                }
                Err(e) => {
                    debug!(attempt, error = %e, "Load failed");
                    self.state = TaskState::Failed;
                    return Err(LoadError::fatal(e));
                }
                Ok(None) => {
                    self.retry_count += 1;
                    if !self.policy.has_attempts_remaining(self.retry_count) {
                        debug!(attempts = self.retry_count, "Retry limit exceeded");
                        self.state = TaskState::RetryLimitExceeded;
                        return Err(LoadError::RetryLimitExceeded {
                            attempts: self.retry_count,
                        });
                    }
                    self.state = TaskState::Retrying;

                    if self.delay_enabled {
                        let delay = self.policy.delay_for_retry(self.retry_count);
                        trace!(
                            retry = self.retry_count,
                            delay_ms = delay.as_millis() as u64,
                            "No result, backing off"
                        );
                        let cancelled = tokio::select! {
                            biased;
                            _ = self.cancel.cancelled() => true,
                            _ = tokio::time::sleep(delay) => false,
                        };
                        if cancelled {
                            return self.interrupted();
                        }
                    }
                }
            }
        }
    }

    fn interrupted(&mut self) -> Result<V, LoadError> {
        trace!(retries = self.retry_count, "Task interrupted");
        self.state = TaskState::Interrupted;
        Err(LoadError::Interrupted)
    }
}
