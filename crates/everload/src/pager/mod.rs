//! Windowed paging over large ordered lists
//!
//! This module provides:
//! - [`Pager`] - Holds a bounded window and loads pages at its edges
//! - [`PageSource`] - Where pages come from
//! - [`MutableSequence`] - Where held items are stored
//! - [`PagerConfig`] - Page size, memory cap and eviction batch
//!
//! # Window
//!
//! ```text
//!            offset                    offset + size
//!               │◄──────── held ────────►│
//!   ... ────────┼────────────────────────┼──────── ... presumed_total_size
//!   load_previous ◄── prepend            append ──► load_next
//!   evict tail when over max_in_memory   evict head when over max_in_memory
//! ```

mod config;
#[allow(clippy::module_inception)]
mod pager;
mod sequence;
mod source;
mod window;

pub use config::PagerConfig;
pub use pager::{PageCompletion, Pager};
pub use sequence::MutableSequence;
pub use source::{LoadDirection, Page, PageKey, PageSource};
pub use window::{WindowChange, WindowState};
