//! Window bookkeeping
//!
//! Pure state for the contiguous range of a list a pager holds. Everything
//! here is synchronous and free of I/O so the merge and eviction rules can
//! be tested on their own.

use serde::{Deserialize, Serialize};

use super::config::PagerConfig;
use super::source::LoadDirection;

/// Deltas produced by the most recent merge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowChange {
    /// Change in the number of held items
    pub size_change: isize,
    /// Change in the absolute position of the first held item
    pub offset_change: isize,
}

/// Point-in-time copy of a window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub offset: usize,
    pub size: usize,
    pub page_size: usize,
    pub max_in_memory: usize,
    pub presumed_total_size: Option<usize>,
    pub loading: Option<LoadDirection>,
    pub valid: bool,
    pub last_change: WindowChange,
}

impl WindowState {
    pub fn is_loading_forward(&self) -> bool {
        self.loading == Some(LoadDirection::Forward)
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Window {
    offset: usize,
    size: usize,
    page_size: usize,
    max_in_memory: usize,
    eviction_batch: usize,
    presumed_total_size: Option<usize>,
    loading: Option<LoadDirection>,
    valid: bool,
    last_change: WindowChange,
}

impl Window {
    pub(crate) fn new(config: &PagerConfig) -> Self {
        Self {
            offset: 0,
            size: 0,
            page_size: config.page_size,
            max_in_memory: config.max_in_memory,
            eviction_batch: config.effective_eviction_batch(),
            presumed_total_size: config.presumed_total_size,
            loading: None,
            valid: false,
            last_change: WindowChange::default(),
        }
    }

    pub(crate) fn offset(&self) -> usize {
        self.offset
    }

    pub(crate) fn size(&self) -> usize {
        self.size
    }

    pub(crate) fn presumed_total_size(&self) -> Option<usize> {
        self.presumed_total_size
    }

    pub(crate) fn is_valid(&self) -> bool {
        self.valid
    }

    pub(crate) fn loading(&self) -> Option<LoadDirection> {
        self.loading
    }

    fn end(&self) -> usize {
        self.offset + self.size
    }

    pub(crate) fn has_next(&self) -> bool {
        self.presumed_total_size
            .map_or(true, |total| self.end() < total)
    }

    pub(crate) fn has_previous(&self) -> bool {
        self.offset > 0
    }

    /// Range for the next forward page, if one may be requested now
    pub(crate) fn next_request(&self) -> Option<(usize, usize)> {
        (self.valid && self.has_next() && self.loading.is_none())
            .then(|| (self.end(), self.page_size))
    }

    /// Range for the next backward page, if one may be requested now
    pub(crate) fn previous_request(&self) -> Option<(usize, usize)> {
        if !self.valid || !self.has_previous() || self.loading.is_some() {
            return None;
        }
        let count = self.offset.min(self.page_size);
        Some((self.offset - count, count))
    }

    /// Range that re-initializes the window in place
    pub(crate) fn reload_request(&self) -> (usize, usize) {
        (self.offset, self.size.max(self.page_size))
    }

    pub(crate) fn begin(&mut self, direction: LoadDirection) {
        self.loading = Some(direction);
    }

    pub(crate) fn finish(&mut self) {
        self.loading = None;
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    /// Merge a forward page of `received` items
    ///
    /// Returns how many items to evict from the head.
    pub(crate) fn merge_forward(&mut self, received: usize, short: bool) -> usize {
        self.size += received;
        if short {
            // The list ends here, whatever bound was configured
            self.presumed_total_size = Some(self.end());
        }

        let evicted = self.evict_count();
        self.offset += evicted;
        self.size -= evicted;
        self.last_change = WindowChange {
            size_change: received as isize - evicted as isize,
            offset_change: evicted as isize,
        };
        evicted
    }

    /// Merge a backward page of `received` items
    ///
    /// Returns how many items to evict from the tail.
    pub(crate) fn merge_backward(&mut self, received: usize) -> usize {
        let received = received.min(self.offset);
        self.offset -= received;
        self.size += received;

        let evicted = self.evict_count();
        self.size -= evicted;
        self.last_change = WindowChange {
            size_change: received as isize - evicted as isize,
            offset_change: -(received as isize),
        };
        evicted
    }

    /// Replace the window contents with `received` items at the current offset
    pub(crate) fn reinitialize(&mut self, received: usize, short: bool) {
        let previous_size = self.size;
        self.size = received;
        self.valid = true;

        let end = self.end();
        self.presumed_total_size = if short {
            Some(end)
        } else {
            // A full reload cannot see the end; keep a bound it does not contradict
            self.presumed_total_size.filter(|&total| total >= end)
        };
        self.last_change = WindowChange {
            size_change: received as isize - previous_size as isize,
            offset_change: 0,
        };
    }

    /// Replace the window with restored contents
    pub(crate) fn restore(&mut self, offset: usize, size: usize) {
        self.offset = offset;
        self.size = size;
        self.valid = true;
        self.loading = None;
        self.presumed_total_size = self.presumed_total_size.filter(|&total| total >= offset + size);
        self.last_change = WindowChange::default();
    }

    fn evict_count(&self) -> usize {
        if self.size > self.max_in_memory {
            self.eviction_batch.min(self.size)
        } else {
            0
        }
    }

    pub(crate) fn state(&self) -> WindowState {
        WindowState {
            offset: self.offset,
            size: self.size,
            page_size: self.page_size,
            max_in_memory: self.max_in_memory,
            presumed_total_size: self.presumed_total_size,
            loading: self.loading,
            valid: self.valid,
            last_change: self.last_change,
        }
    }
}
