//! Pager window configuration

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Sizing of a pager window
///
/// `page_size` should be at least three times the number of items visible
/// at once and `max_in_memory` at least four page sizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PagerConfig {
    /// Items requested per page
    pub page_size: usize,
    /// Items held before eviction kicks in
    pub max_in_memory: usize,
    /// Items evicted at once when over `max_in_memory` (defaults to two pages)
    pub eviction_batch: Option<usize>,
    /// Known upper bound on the list length, if any
    pub presumed_total_size: Option<usize>,
}

impl Default for PagerConfig {
    fn default() -> Self {
        Self::new(30)
    }
}

impl PagerConfig {
    /// Create a config for `page_size` with room for four pages
    pub fn new(page_size: usize) -> Self {
        Self {
            page_size,
            max_in_memory: page_size.saturating_mul(4),
            eviction_batch: None,
            presumed_total_size: None,
        }
    }

    pub fn with_max_in_memory(mut self, max_in_memory: usize) -> Self {
        self.max_in_memory = max_in_memory;
        self
    }

    /// Set how many items are evicted at once
    ///
    /// Evicting more than the overflow leaves room to scroll back and forth
    /// near the boundary without evicting and reloading the same page.
    pub fn with_eviction_batch(mut self, batch: usize) -> Self {
        self.eviction_batch = Some(batch);
        self
    }

    pub fn with_presumed_total_size(mut self, total: usize) -> Self {
        self.presumed_total_size = Some(total);
        self
    }

    /// Eviction batch actually used
    pub fn effective_eviction_batch(&self) -> usize {
        self.eviction_batch
            .unwrap_or_else(|| self.page_size.saturating_mul(2))
    }

    /// Distance from either edge of the window that triggers a page load
    pub fn prefetch_distance(&self) -> usize {
        (self.page_size / 3).max(1)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be at least 1".into()));
        }
        if self.max_in_memory < self.page_size {
            return Err(ConfigError::Invalid(format!(
                "max_in_memory ({}) must be at least page_size ({})",
                self.max_in_memory, self.page_size
            )));
        }
        if self.eviction_batch == Some(0) {
            return Err(ConfigError::Invalid(
                "eviction_batch must be at least 1".into(),
            ));
        }
        Ok(())
    }
}
