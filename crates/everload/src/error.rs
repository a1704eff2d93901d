//! Error types shared across the engine

use std::sync::Arc;

/// Outcome of a failed load as seen by completion callbacks
///
/// `LoadError` is cheap to clone so a single failure can be fanned out to
/// every waiter registered against the same key.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    /// The loader returned an error. Never retried.
    #[error("load failed: {0}")]
    Fatal(Arc<anyhow::Error>),

    /// Every attempt allowed by the retry policy produced no result
    #[error("retry limit exceeded after {attempts} attempts")]
    RetryLimitExceeded { attempts: u32 },

    /// The load was stopped before it could deliver
    ///
    /// Interrupted work is silent: this variant is used internally to unwind
    /// a task and is never handed to a completion.
    #[error("load was interrupted")]
    Interrupted,
}

impl LoadError {
    /// Wrap a loader error as a fatal failure
    pub fn fatal(err: impl Into<anyhow::Error>) -> Self {
        Self::Fatal(Arc::new(err.into()))
    }

    /// Check if this is a fatal loader failure
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }

    /// Check if the retry budget was exhausted
    pub fn is_retry_limit_exceeded(&self) -> bool {
        matches!(self, Self::RetryLimitExceeded { .. })
    }

    /// Check if the load was interrupted
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted)
    }
}

impl PartialEq for LoadError {
    /// Two fatal errors are equal only when they are the same fanned-out failure.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Fatal(a), Self::Fatal(b)) => Arc::ptr_eq(a, b),
            (
                Self::RetryLimitExceeded { attempts: a },
                Self::RetryLimitExceeded { attempts: b },
            ) => a == b,
            (Self::Interrupted, Self::Interrupted) => true,
            _ => false,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A value is out of range or inconsistent with another value
    #[error("invalid configuration: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed
    #[error("invalid value for {var}: {value:?}")]
    Env { var: String, value: String },
}

/// Errors from saving or restoring window snapshots
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// Items could not be encoded or decoded
    #[error("snapshot serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The persistence collaborator failed
    #[error("snapshot store error: {0}")]
    Store(String),
}
