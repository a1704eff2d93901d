//! Retry policy implementation

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::duration_millis;
use crate::error::ConfigError;

/// Delay schedule applied between attempts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backoff {
    /// Retry immediately
    None,

    /// `base + retry_count * step`
    Linear {
        #[serde(with = "duration_millis")]
        base: Duration,
        #[serde(with = "duration_millis")]
        step: Duration,
    },

    /// Exponential growth from `initial_interval`, capped at `max_interval`
    Exponential {
        #[serde(with = "duration_millis")]
        initial_interval: Duration,
        #[serde(with = "duration_millis")]
        max_interval: Duration,
        /// Backoff multiplier (e.g., 2.0 for doubling)
        coefficient: f64,
        /// Jitter factor (0.0-1.0); 0.1 means ±10% randomness
        jitter: f64,
    },
}

/// Configuration for load retries
///
/// A loader signals a transient failure by returning no result; that attempt
/// is retried until `max_attempts` is reached. Loader errors are fatal and
/// never consult the policy.
///
/// # Example
///
/// ```
/// use everload::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy::linear()
///     .with_max_attempts(4);
///
/// // First retry after 350ms, second after 625ms, third after 900ms
/// assert_eq!(policy.delay_for_retry(1), Duration::from_millis(350));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including initial)
    pub max_attempts: u32,

    /// Delay between attempts
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::linear()
    }
}

impl RetryPolicy {
    /// Create a linear backoff policy: 5 attempts, `75ms + retry * 275ms`
    pub fn linear() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Linear {
                base: Duration::from_millis(75),
                step: Duration::from_millis(275),
            },
        }
    }

    /// Create an exponential backoff retry policy
    ///
    /// - 5 max attempts
    /// - 1 second initial interval
    /// - 60 second max interval
    /// - 2x backoff coefficient
    /// - 10% jitter
    pub fn exponential() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Exponential {
                initial_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(60),
                coefficient: 2.0,
                jitter: 0.1,
            },
        }
    }

    /// Create a policy that never retries
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::None,
        }
    }

    /// Create a policy with fixed intervals (no backoff)
    pub fn fixed(interval: Duration, max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Linear {
                base: interval,
                step: Duration::ZERO,
            },
        }
    }

    /// Set the maximum number of attempts
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set the delay schedule
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the jitter factor (0.0-1.0); only affects exponential backoff
    pub fn with_jitter(mut self, value: f64) -> Self {
        if let Backoff::Exponential { jitter, .. } = &mut self.backoff {
            *jitter = value.clamp(0.0, 1.0);
        }
        self
    }

    /// Calculate the delay before retry number `retry_count` (1-based)
    ///
    /// `retry_count` is the number of transient failures seen so far.
    pub fn delay_for_retry(&self, retry_count: u32) -> Duration {
        match &self.backoff {
            Backoff::None => Duration::ZERO,
            Backoff::Linear { base, step } => *base + step.saturating_mul(retry_count),
            Backoff::Exponential {
                initial_interval,
                max_interval,
                coefficient,
                jitter,
            } => {
                let exponent = retry_count.saturating_sub(1) as i32;
                let base = initial_interval.as_secs_f64() * coefficient.powi(exponent);
                let capped = base.min(max_interval.as_secs_f64());

                let jittered = if *jitter > 0.0 && capped > 0.0 {
                    let mut rng = rand::thread_rng();
                    let jitter_range = capped * jitter;
                    let jitter_offset = rng.gen_range(-jitter_range..jitter_range);
                    (capped + jitter_offset).max(0.0)
                } else {
                    capped
                };

                Duration::from_secs_f64(jittered)
            }
        }
    }

    /// Check if there are remaining attempts after `attempts_made`
    pub fn has_attempts_remaining(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Validate the policy
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "max_attempts must be at least 1".into(),
            ));
        }
        if let Backoff::Exponential {
            coefficient,
            jitter,
            ..
        } = &self.backoff
        {
            if *coefficient < 1.0 {
                return Err(ConfigError::Invalid(
                    "backoff coefficient must be at least 1.0".into(),
                ));
            }
            if !(0.0..=1.0).contains(jitter) {
                return Err(ConfigError::Invalid("jitter must be within 0.0-1.0".into()));
            }
        }
        Ok(())
    }
}
