//! Engine configuration

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pager::PagerConfig;
use crate::reliability::RetryPolicy;
use crate::worker::PoolConfig;

/// Configuration for every part of the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub pool: PoolConfig,
    pub retry: RetryPolicy,
    pub pager: PagerConfig,
}

impl EngineConfig {
    /// Create configuration from environment variables
    ///
    /// Environment variables:
    /// - `EVERLOAD_CORE_WORKERS`: Worker threads kept alive while idle
    /// - `EVERLOAD_MAX_WORKERS`: Maximum loads executing at once
    /// - `EVERLOAD_IDLE_TIMEOUT_MS`: Idle thread lifetime in milliseconds
    /// - `EVERLOAD_RETRY_DELAY`: Enable the delay between retries (`true`/`false`, `1`/`0`)
    /// - `EVERLOAD_RETRY_LIMIT`: Attempts per load, including the first
    /// - `EVERLOAD_PAGE_SIZE`: Items per page
    /// - `EVERLOAD_MAX_IN_MEMORY`: Items a pager holds before evicting (default: 4 pages)
    /// - `EVERLOAD_EVICTION_BATCH`: Items evicted at once (default: 2 pages)
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(workers) = parse(&lookup, "EVERLOAD_CORE_WORKERS")? {
            config.pool.core_workers = workers;
        }
        if let Some(workers) = parse(&lookup, "EVERLOAD_MAX_WORKERS")? {
            config.pool.max_workers = workers;
        }
        if let Some(millis) = parse::<u64, _>(&lookup, "EVERLOAD_IDLE_TIMEOUT_MS")? {
            config.pool.idle_timeout = Duration::from_millis(millis);
        }
        if let Some(enabled) = parse_flag(&lookup, "EVERLOAD_RETRY_DELAY")? {
            config.pool.retry_delay_enabled = enabled;
        }
        if let Some(limit) = parse(&lookup, "EVERLOAD_RETRY_LIMIT")? {
            config.retry.max_attempts = limit;
        }
        if let Some(page_size) = parse(&lookup, "EVERLOAD_PAGE_SIZE")? {
            config.pager = PagerConfig::new(page_size);
        }
        if let Some(max) = parse(&lookup, "EVERLOAD_MAX_IN_MEMORY")? {
            config.pager.max_in_memory = max;
        }
        if let Some(batch) = parse(&lookup, "EVERLOAD_EVICTION_BATCH")? {
            config.pager.eviction_batch = Some(batch);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pool.validate()?;
        self.retry.validate()?;
        self.pager.validate()
    }
}

fn parse<T, F>(lookup: &F, var: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Env {
                var: var.to_string(),
                value,
            }),
        None => Ok(None),
    }
}

fn parse_flag<F>(lookup: &F, var: &str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        Some(value) => match value.trim().to_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::Env {
                var: var.to_string(),
                value,
            }),
        },
        None => Ok(None),
    }
}
