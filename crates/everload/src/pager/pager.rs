//! Windowed pager over a page source

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, trace, warn};

use super::config::PagerConfig;
use super::sequence::MutableSequence;
use super::source::{LoadDirection, Page, PageKey, PageLoader, PageSource};
use super::window::{Window, WindowChange, WindowState};
use crate::error::{ConfigError, LoadError, SnapshotError};
use crate::persistence::{SnapshotStore, WindowSnapshot};
use crate::worker::{LoadPool, Loader};

static NEXT_PAGER_ID: AtomicU64 = AtomicU64::new(1);

/// Callback fired after a page has been merged, or after the page load failed
pub type PageCompletion = Box<dyn FnOnce(Result<WindowChange, LoadError>) + Send + 'static>;

/// Bounded window over a conceptually unbounded ordered list
///
/// A pager is built from two capabilities: a [`PageSource`] that fetches
/// pages and a [`MutableSequence`] that stores the held items. Pages are
/// fetched through a [`LoadPool`], so retries and cancellation follow the
/// pool's rules, and merges happen on the pool's dispatch context before
/// the caller's completion runs.
///
/// Positions passed to [`get`](Self::get) and [`peek`](Self::peek) are
/// relative to the window, the way a list view addresses its rows.
///
/// # Example
///
/// ```ignore
/// let pager = Pager::new(source, VecDeque::new(), PagerConfig::new(30), pool)?;
/// pager.load(|result| render(result));
///
/// // While scrolling
/// let row = pager.get(position, |result| render(result));
/// ```
pub struct Pager<T, M = VecDeque<T>> {
    inner: Arc<PagerInner<T, M>>,
}

impl<T, M> Clone for Pager<T, M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct PagerInner<T, M> {
    config: PagerConfig,
    pool: LoadPool<PageKey, Page<T>>,
    loader: Arc<dyn Loader<PageKey, Page<T>>>,
    state: Mutex<PagerState<T, M>>,
    weak_self: Weak<PagerInner<T, M>>,
}

struct PagerState<T, M> {
    id: u64,
    window: Window,
    items: M,
    epoch: u64,
    pending: Option<PageKey>,
    _item: std::marker::PhantomData<fn() -> T>,
}

impl<T, M> Pager<T, M>
where
    T: Clone + Send + Sync + 'static,
    M: MutableSequence<T>,
{
    /// Create a pager that fetches pages from `source` through `pool`
    ///
    /// `items` is the storage the window is materialized into; anything it
    /// already holds is discarded. The pool may be shared with other pagers:
    /// every page key carries this pager's id.
    pub fn new<S>(
        source: Arc<S>,
        mut items: M,
        config: PagerConfig,
        pool: LoadPool<PageKey, Page<T>>,
    ) -> Result<Self, ConfigError>
    where
        S: PageSource<T> + ?Sized,
    {
        config.validate()?;
        items.clear();

        let loader: Arc<dyn Loader<PageKey, Page<T>>> = Arc::new(PageLoader::new(source));
        let window = Window::new(&config);
        let inner = Arc::new_cyclic(|weak_self| PagerInner {
            config,
            pool,
            loader,
            state: Mutex::new(PagerState {
                id: NEXT_PAGER_ID.fetch_add(1, Ordering::Relaxed),
                window,
                items,
                epoch: 0,
                pending: None,
                _item: std::marker::PhantomData,
            }),
            weak_self: weak_self.clone(),
        });
        Ok(Self { inner })
    }

    /// Item at `position`, triggering a page load near either edge
    ///
    /// The item is whatever is held right now and may be stale. When
    /// `position` is within a third of a page of the tail a forward load
    /// starts, within a third of a page of the head a backward load. An
    /// invalid window is reloaded instead. `completion` fires only if one
    /// of those loads was started.
    pub fn get(
        &self,
        position: usize,
        completion: impl FnOnce(Result<WindowChange, LoadError>) + Send + 'static,
    ) -> Option<T> {
        let distance = self.inner.config.prefetch_distance();
        let (item, direction) = {
            let state = self.inner.state.lock();
            let item = state.items.get(position).cloned();
            let size = state.window.size();

            let direction = if !state.window.is_valid() {
                Some(LoadDirection::Reload)
            } else if position + distance >= size {
                Some(LoadDirection::Forward)
            } else if position < distance {
                Some(LoadDirection::Backward)
            } else {
                None
            };
            (item, direction)
        };

        match direction {
            Some(LoadDirection::Forward) => {
                // A window shorter than both prefetch edges may still extend backward
                let completion: PageCompletion = Box::new(completion);
                if let Err(completion) = self.try_load_next(completion) {
                    if position < distance {
                        self.load_previous(completion);
                    }
                }
            }
            Some(LoadDirection::Backward) => {
                self.load_previous(completion);
            }
            Some(LoadDirection::Reload) => {
                if !self.is_loading() {
                    self.load(completion);
                }
            }
            None => {}
        }
        item
    }

    /// Item at `position` without side effects
    pub fn peek(&self, position: usize) -> Option<T> {
        self.inner.state.lock().items.get(position).cloned()
    }

    /// Copy of every held item, in order
    pub fn items(&self) -> Vec<T> {
        self.inner.state.lock().items.to_vec()
    }

    /// Append the next page
    ///
    /// Returns `false` without dispatching anything unless the window is
    /// valid, [`has_next`](Self::has_next) holds and no load is in flight.
    pub fn load_next(
        &self,
        completion: impl FnOnce(Result<WindowChange, LoadError>) + Send + 'static,
    ) -> bool {
        self.try_load_next(Box::new(completion)).is_ok()
    }

    /// Like [`load_next`](Self::load_next), handing back the completion when
    /// nothing was dispatched
    fn try_load_next(&self, completion: PageCompletion) -> Result<(), PageCompletion> {
        let key = {
            let mut state = self.inner.state.lock();
            let Some((offset, count)) = state.window.next_request() else {
                trace!("Forward load skipped");
                return Err(completion);
            };
            state.begin(LoadDirection::Forward, offset, count)
        };
        self.inner.request(key, completion);
        Ok(())
    }

    /// Prepend the page that ends at the current offset
    ///
    /// Returns `false` unless the window is valid, the offset is positive
    /// and no load is in flight.
    pub fn load_previous(
        &self,
        completion: impl FnOnce(Result<WindowChange, LoadError>) + Send + 'static,
    ) -> bool {
        let key = {
            let mut state = self.inner.state.lock();
            let Some((offset, count)) = state.window.previous_request() else {
                trace!("Backward load skipped");
                return false;
            };
            state.begin(LoadDirection::Backward, offset, count)
        };
        self.inner.request(key, Box::new(completion));
        true
    }

    /// Re-initialize the window in place
    ///
    /// Fetches `[offset, offset + max(size, page_size))` and replaces the
    /// held items with the result. Any load already in flight is cancelled.
    pub fn load(
        &self,
        completion: impl FnOnce(Result<WindowChange, LoadError>) + Send + 'static,
    ) -> bool {
        let key = {
            let mut state = self.inner.state.lock();
            self.inner.cancel_pending(&mut state);
            state.epoch += 1;
            let (offset, count) = state.window.reload_request();
            state.begin(LoadDirection::Reload, offset, count)
        };
        self.inner.request(key, Box::new(completion));
        true
    }

    /// Mark the window for re-initialization on the next load
    ///
    /// Held items stay readable until the reload replaces them. A page in
    /// flight for the old window is cancelled.
    pub fn invalidate(&self) {
        let mut state = self.inner.state.lock();
        self.inner.cancel_pending(&mut state);
        state.epoch += 1;
        state.window.invalidate();
        debug!(offset = state.window.offset(), "Window invalidated");
    }

    /// Cancel the page load in flight, if any; its completion never fires
    pub fn cancel_loading(&self) -> bool {
        let mut state = self.inner.state.lock();
        self.inner.cancel_pending(&mut state)
    }

    pub fn has_next(&self) -> bool {
        self.inner.state.lock().window.has_next()
    }

    pub fn has_previous(&self) -> bool {
        self.inner.state.lock().window.has_previous()
    }

    pub fn is_loading(&self) -> bool {
        self.inner.state.lock().window.loading().is_some()
    }

    pub fn is_valid(&self) -> bool {
        self.inner.state.lock().window.is_valid()
    }

    /// Absolute position of the first held item
    pub fn offset(&self) -> usize {
        self.inner.state.lock().window.offset()
    }

    /// Number of held items
    pub fn len(&self) -> usize {
        self.inner.state.lock().window.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn presumed_total_size(&self) -> Option<usize> {
        self.inner.state.lock().window.presumed_total_size()
    }

    pub fn state(&self) -> WindowState {
        self.inner.state.lock().window.state()
    }

    pub fn config(&self) -> &PagerConfig {
        &self.inner.config
    }

    /// Capture the window as `{offset, items}`
    pub fn snapshot(&self) -> Result<WindowSnapshot, SnapshotError>
    where
        T: Serialize,
    {
        let state = self.inner.state.lock();
        let items = serde_json::to_vec(&state.items.to_vec())?;
        Ok(WindowSnapshot::new(state.window.offset(), items))
    }

    /// Replace the window with a snapshot
    ///
    /// The restored window is valid and ready for `load_next` and
    /// `load_previous`. A page in flight is cancelled. On a decoding error
    /// the window is left unchanged.
    pub fn restore(&self, snapshot: &WindowSnapshot) -> Result<(), SnapshotError>
    where
        T: DeserializeOwned,
    {
        let items: Vec<T> = serde_json::from_slice(&snapshot.items)?;

        let mut state = self.inner.state.lock();
        self.inner.cancel_pending(&mut state);
        state.epoch += 1;
        let size = items.len();
        state.items.clear();
        state.items.extend_back(items);
        state.window.restore(snapshot.offset, size);
        debug!(offset = snapshot.offset, size, "Window restored");
        Ok(())
    }

    /// Save a snapshot of the window under `key`
    pub async fn save_to(
        &self,
        store: &dyn SnapshotStore,
        key: &str,
    ) -> Result<(), SnapshotError>
    where
        T: Serialize,
    {
        let snapshot = self.snapshot()?;
        store.save(key, snapshot).await
    }

    /// Restore the window saved under `key`
    ///
    /// Returns `false` if the store has nothing under `key`.
    pub async fn restore_from(
        &self,
        store: &dyn SnapshotStore,
        key: &str,
    ) -> Result<bool, SnapshotError>
    where
        T: DeserializeOwned,
    {
        match store.load(key).await? {
            Some(snapshot) => {
                self.restore(&snapshot)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

impl<T, M> PagerState<T, M>
where
    T: Send + 'static,
    M: MutableSequence<T>,
{
    fn begin(&mut self, direction: LoadDirection, offset: usize, count: usize) -> PageKey {
        self.window.begin(direction);
        let key = PageKey {
            pager: self.id,
            epoch: self.epoch,
            offset,
            count,
            direction,
        };
        self.pending = Some(key.clone());
        key
    }

    fn merge(&mut self, key: &PageKey, page: Page<T>) -> WindowChange {
        let mut items = page.items;
        items.truncate(key.count);
        let received = items.len();
        let short = page.got_fewer_than_requested || received < key.count;

        match key.direction {
            LoadDirection::Forward => {
                self.items.extend_back(items);
                let evicted = self.window.merge_forward(received, short);
                self.items.truncate_front(evicted);
            }
            LoadDirection::Backward => {
                self.items.extend_front(items);
                let evicted = self.window.merge_backward(received);
                self.items.truncate_back(evicted);
            }
            LoadDirection::Reload => {
                self.items.clear();
                self.items.extend_back(items);
                self.window.reinitialize(received, short);
            }
        }
        self.window.state().last_change
    }
}

impl<T, M> PagerInner<T, M>
where
    T: Clone + Send + Sync + 'static,
    M: MutableSequence<T>,
{
    #[instrument(skip_all, fields(direction = ?key.direction, offset = key.offset, count = key.count))]
    fn request(&self, key: PageKey, completion: PageCompletion) {
        let pager = self.weak_self.clone();
        self.pool
            .submit(key, Arc::clone(&self.loader), move |key, result| {
                match pager.upgrade() {
                    Some(pager) => pager.on_page(key, result, completion),
                    None => trace!("Pager dropped, page discarded"),
                }
            });
    }

    /// Merge a finished page, then run the caller's completion
    fn on_page(&self, key: &PageKey, result: Result<Page<T>, LoadError>, completion: PageCompletion) {
        let outcome = {
            let mut state = self.state.lock();
            if state.pending.as_ref() != Some(key) {
                trace!(offset = key.offset, "Stale page dropped");
                return;
            }
            state.pending = None;
            state.window.finish();

            match result {
                Ok(page) => {
                    let change = state.merge(key, page);
                    debug!(
                        direction = ?key.direction,
                        offset = state.window.offset(),
                        size = state.window.size(),
                        size_change = change.size_change,
                        offset_change = change.offset_change,
                        "Page merged"
                    );
                    Ok(change)
                }
                Err(e) => {
                    warn!(direction = ?key.direction, offset = key.offset, error = %e, "Page load failed");
                    Err(e)
                }
            }
        };
        completion(outcome);
    }

    fn cancel_pending(&self, state: &mut PagerState<T, M>) -> bool {
        let Some(key) = state.pending.take() else {
            return false;
        };
        state.window.finish();
        state.epoch += 1;
        self.pool.stop_loading(&key);
        debug!(direction = ?key.direction, offset = key.offset, "Page load cancelled");
        true
    }
}

impl<T, M> std::fmt::Debug for Pager<T, M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pager")
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::oneshot;

    use super::*;
    use crate::dispatch::Dispatcher;
    use crate::persistence::InMemorySnapshotStore;
    use crate::worker::PoolConfig;

    struct Numbers {
        total: usize,
        fail_from: Option<usize>,
        calls: AtomicUsize,
    }

    impl Numbers {
        fn new(total: usize) -> Arc<Self> {
            Arc::new(Self {
                total,
                fail_from: None,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl PageSource<usize> for Numbers {
        async fn fetch(&self, offset: usize, page_size: usize) -> anyhow::Result<Option<Page<usize>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_from.is_some_and(|from| offset >= from) {
                anyhow::bail!("backend unavailable");
            }
            let end = (offset + page_size).min(self.total);
            Ok(Some(Page::new((offset.min(end)..end).collect(), page_size)))
        }
    }

    struct Stalled;

    #[async_trait]
    impl PageSource<usize> for Stalled {
        async fn fetch(&self, _offset: usize, _page_size: usize) -> anyhow::Result<Option<Page<usize>>> {
            futures::future::pending().await
        }
    }

    fn pager<S: PageSource<usize>>(source: Arc<S>, config: PagerConfig) -> Pager<usize> {
        let pool = LoadPool::new(
            PoolConfig::default().with_retry_delay(false),
            Dispatcher::spawn(),
        );
        Pager::new(source, VecDeque::new(), config, pool).unwrap()
    }

    async fn settle(
        start: impl FnOnce(PageCompletion) -> bool,
    ) -> Result<WindowChange, LoadError> {
        let (tx, rx) = oneshot::channel();
        assert!(start(Box::new(move |result| {
            let _ = tx.send(result);
        })));
        rx.await.unwrap()
    }

    #[tokio::test]
    async fn test_load_initializes_window() {
        let pager = pager(Numbers::new(100), PagerConfig::new(10));
        assert!(!pager.is_valid());

        let change = settle(|done| pager.load(done)).await.unwrap();

        assert_eq!(change.size_change, 10);
        assert!(pager.is_valid());
        assert_eq!(pager.items(), (0..10).collect::<Vec<_>>());
        assert_eq!(pager.peek(3), Some(3));
    }

    #[tokio::test]
    async fn test_load_next_requires_valid_window() {
        let pager = pager(Numbers::new(100), PagerConfig::new(10));
        assert!(!pager.load_next(|_| panic!("must not dispatch")));
        assert!(!pager.load_previous(|_| panic!("must not dispatch")));
    }

    #[tokio::test]
    async fn test_get_near_tail_loads_forward() {
        let pager = pager(Numbers::new(100), PagerConfig::new(9));
        settle(|done| pager.load(done)).await.unwrap();

        // Prefetch distance is 3, so position 4 is clear of both edges
        let (tx, rx) = oneshot::channel();
        assert_eq!(pager.get(4, |_| {}), Some(4));
        assert!(!pager.is_loading());

        assert_eq!(
            pager.get(6, move |result| {
                let _ = tx.send(result);
            }),
            Some(6)
        );
        assert!(pager.is_loading());
        rx.await.unwrap().unwrap();
        assert_eq!(pager.len(), 18);
    }

    #[tokio::test]
    async fn test_get_on_short_window_falls_back_to_backward() {
        let pager = pager(Numbers::new(52), PagerConfig::new(9));
        let snapshot = WindowSnapshot::new(50, serde_json::to_vec(&vec![50usize, 51]).unwrap());
        pager.restore(&snapshot).unwrap();

        // Both edges are in range; the forward load discovers the end
        let (tx, rx) = oneshot::channel();
        pager.get(0, move |result| {
            let _ = tx.send(result);
        });
        rx.await.unwrap().unwrap();
        assert_eq!(pager.presumed_total_size(), Some(52));
        assert!(!pager.has_next());

        let (tx, rx) = oneshot::channel();
        pager.get(0, move |result| {
            let _ = tx.send(result);
        });
        let change = rx.await.unwrap().unwrap();

        assert_eq!(change.offset_change, -9);
        assert_eq!(pager.offset(), 41);
        assert_eq!(pager.items(), (41..52).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_configured_bound_yields_to_short_page() {
        let source = Numbers::new(15);
        let pager = pager(
            Arc::clone(&source),
            PagerConfig::new(10).with_presumed_total_size(100),
        );
        settle(|done| pager.load(done)).await.unwrap();
        assert_eq!(pager.presumed_total_size(), Some(100));

        settle(|done| pager.load_next(done)).await.unwrap();

        assert_eq!(pager.len(), 15);
        assert_eq!(pager.presumed_total_size(), Some(15));
        assert!(!pager.has_next());
        let calls = source.calls.load(Ordering::SeqCst);
        assert!(!pager.load_next(|_| panic!("must not dispatch")));
        assert_eq!(source.calls.load(Ordering::SeqCst), calls);
    }

    #[tokio::test]
    async fn test_pagers_sharing_a_pool_keep_their_sources() {
        struct Shifted(usize);

        #[async_trait]
        impl PageSource<usize> for Shifted {
            async fn fetch(&self, offset: usize, page_size: usize) -> anyhow::Result<Option<Page<usize>>> {
                let start = self.0 + offset;
                Ok(Some(Page::new((start..start + page_size).collect(), page_size)))
            }
        }

        let pool = LoadPool::new(
            PoolConfig::default().with_retry_delay(false),
            Dispatcher::spawn(),
        );
        let low: Pager<usize> =
            Pager::new(Arc::new(Shifted(0)), VecDeque::new(), PagerConfig::new(10), pool.clone())
                .unwrap();
        let high: Pager<usize> =
            Pager::new(Arc::new(Shifted(1000)), VecDeque::new(), PagerConfig::new(10), pool)
                .unwrap();

        let (low_done, high_done) = tokio::join!(
            settle(|done| low.load(done)),
            settle(|done| high.load(done)),
        );
        low_done.unwrap();
        high_done.unwrap();

        assert_eq!(low.peek(0), Some(0));
        assert_eq!(high.peek(0), Some(1000));
        assert_eq!(high.items(), (1000..1010).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_get_on_invalid_window_reloads() {
        let pager = pager(Numbers::new(100), PagerConfig::new(10));
        let (tx, rx) = oneshot::channel();

        assert_eq!(
            pager.get(0, move |result| {
                let _ = tx.send(result);
            }),
            None
        );
        rx.await.unwrap().unwrap();
        assert_eq!(pager.len(), 10);
    }

    #[tokio::test]
    async fn test_failed_page_leaves_window_unchanged() {
        let source = Arc::new(Numbers {
            total: 100,
            fail_from: Some(10),
            calls: AtomicUsize::new(0),
        });
        let pager = pager(Arc::clone(&source), PagerConfig::new(10));
        settle(|done| pager.load(done)).await.unwrap();
        let before = pager.state();

        let err = settle(|done| pager.load_next(done)).await.unwrap_err();

        assert!(err.is_fatal());
        assert_eq!(pager.items(), (0..10).collect::<Vec<_>>());
        assert_eq!(pager.state().offset, before.offset);
        assert_eq!(pager.state().size, before.size);
        assert!(!pager.is_loading());
    }

    #[tokio::test]
    async fn test_cancel_loading_is_silent() {
        let pager = pager(Arc::new(Stalled), PagerConfig::new(10));
        let fired = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&fired);

        assert!(pager.load(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        }));
        assert!(pager.is_loading());
        assert!(pager.cancel_loading());
        assert!(!pager.cancel_loading());
        assert!(!pager.is_loading());

        tokio::task::yield_now().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_backward_after_restore() {
        let pager = pager(Numbers::new(100), PagerConfig::new(10));
        let snapshot = WindowSnapshot::new(35, serde_json::to_vec(&(35..45).collect::<Vec<usize>>()).unwrap());
        pager.restore(&snapshot).unwrap();

        let change = settle(|done| pager.load_previous(done)).await.unwrap();

        assert_eq!(change.offset_change, -10);
        assert_eq!(pager.offset(), 25);
        assert_eq!(pager.items(), (25..45).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_restore_rejects_bad_blob() {
        let pager = pager(Numbers::new(100), PagerConfig::new(10));
        settle(|done| pager.load(done)).await.unwrap();

        let result = pager.restore(&WindowSnapshot::new(50, b"not json".to_vec()));

        assert!(matches!(result, Err(SnapshotError::Serialization(_))));
        assert_eq!(pager.offset(), 0);
        assert_eq!(pager.len(), 10);
    }

    #[tokio::test]
    async fn test_save_and_restore_through_store() {
        let store = InMemorySnapshotStore::new();
        let first = pager(Numbers::new(100), PagerConfig::new(10));
        settle(|done| first.load(done)).await.unwrap();
        settle(|done| first.load_next(done)).await.unwrap();
        first.save_to(&store, "feed").await.unwrap();

        let second = pager(Numbers::new(100), PagerConfig::new(10));
        assert!(!second.restore_from(&store, "missing").await.unwrap());
        assert!(second.restore_from(&store, "feed").await.unwrap());

        assert_eq!(second.offset(), first.offset());
        assert_eq!(second.items(), first.items());
        assert!(second.is_valid());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let _guard = runtime.enter();
        let pool = LoadPool::new(PoolConfig::default(), Dispatcher::spawn());

        let result = Pager::new(
            Numbers::new(10),
            VecDeque::new(),
            PagerConfig::new(10).with_max_in_memory(5),
            pool,
        );
        assert!(result.is_err());
    }
}
