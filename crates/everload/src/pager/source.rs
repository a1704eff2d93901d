//! Page data source seam

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::worker::Loader;

/// One page returned by a [`PageSource`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// The source had fewer items than requested: the end of the list was reached
    pub got_fewer_than_requested: bool,
}

impl<T> Page<T> {
    /// Build a page for a request of `requested` items
    pub fn new(items: Vec<T>, requested: usize) -> Self {
        let got_fewer_than_requested = items.len() < requested;
        Self {
            items,
            got_fewer_than_requested,
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fetches pages of an ordered list
///
/// The return value follows the [`Loader`] contract: `Ok(None)` is a
/// transient failure retried by the pool, `Err` is fatal.
#[async_trait]
pub trait PageSource<T>: Send + Sync + 'static {
    async fn fetch(&self, offset: usize, page_size: usize) -> anyhow::Result<Option<Page<T>>>;
}

/// Direction of a page request relative to the window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadDirection {
    /// Append after the last held item
    Forward,
    /// Prepend before the first held item
    Backward,
    /// Replace the whole window
    Reload,
}

/// Pool key for one page request
///
/// `pager` identifies the pager that issued the request, so pagers sharing
/// one pool never coalesce onto each other's sources. `epoch` changes
/// whenever the window is reset so that a page requested for an older
/// window is never merged into a newer one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub pager: u64,
    pub epoch: u64,
    pub offset: usize,
    pub count: usize,
    pub direction: LoadDirection,
}

/// Adapts a [`PageSource`] to the pool's [`Loader`] seam
pub(crate) struct PageLoader<S: ?Sized, T> {
    source: Arc<S>,
    _item: PhantomData<fn() -> T>,
}

impl<S, T> PageLoader<S, T>
where
    S: PageSource<T> + ?Sized,
    T: Send + 'static,
{
    pub(crate) fn new(source: Arc<S>) -> Self {
        Self {
            source,
            _item: PhantomData,
        }
    }
}

#[async_trait]
impl<S, T> Loader<PageKey, Page<T>> for PageLoader<S, T>
where
    S: PageSource<T> + ?Sized,
    T: Send + 'static,
{
    async fn load(&self, key: &PageKey) -> anyhow::Result<Option<Page<T>>> {
        self.source.fetch(key.offset, key.count).await
    }
}
