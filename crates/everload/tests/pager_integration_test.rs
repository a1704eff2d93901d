//! Integration tests for the windowed pager
//!
//! Run with: cargo test -p everload --test pager_integration_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::oneshot;

use everload::{
    Engine, EngineConfig, InMemorySnapshotStore, LoadError, LoadPool, Page, PageKey, PageSource,
    Pager, PagerConfig, WindowChange,
};

/// Source over the integers `start..start + total`
struct RangeSource {
    start: usize,
    total: usize,
    fetches: AtomicUsize,
}

impl RangeSource {
    fn new(total: usize) -> Arc<Self> {
        Self::starting_at(0, total)
    }

    fn starting_at(start: usize, total: usize) -> Arc<Self> {
        Arc::new(Self {
            start,
            total,
            fetches: AtomicUsize::new(0),
        })
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PageSource<u64> for RangeSource {
    async fn fetch(&self, offset: usize, page_size: usize) -> anyhow::Result<Option<Page<u64>>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let end = (offset + page_size).min(self.total);
        let items = (offset.min(end)..end)
            .map(|i| (self.start + i) as u64)
            .collect();
        Ok(Some(Page::new(items, page_size)))
    }
}

fn engine() -> Engine {
    let mut config = EngineConfig::default();
    config.pool.retry_delay_enabled = false;
    Engine::new(config).unwrap()
}

fn pager(engine: &Engine, source: Arc<RangeSource>, page_size: usize, max: usize) -> Pager<u64> {
    engine
        .pager_with(
            source,
            Default::default(),
            PagerConfig::new(page_size).with_max_in_memory(max),
        )
        .unwrap()
}

async fn load(pager: &Pager<u64>) -> WindowChange {
    let (tx, rx) = oneshot::channel();
    assert!(pager.load(move |result| {
        let _ = tx.send(result);
    }));
    rx.await.unwrap().unwrap()
}

async fn load_next(pager: &Pager<u64>) -> Result<WindowChange, LoadError> {
    let (tx, rx) = oneshot::channel();
    assert!(pager.load_next(move |result| {
        let _ = tx.send(result);
    }));
    rx.await.unwrap()
}

async fn load_previous(pager: &Pager<u64>) -> WindowChange {
    let (tx, rx) = oneshot::channel();
    assert!(pager.load_previous(move |result| {
        let _ = tx.send(result);
    }));
    rx.await.unwrap().unwrap()
}

fn range(start: u64, end: u64) -> Vec<u64> {
    (start..end).collect()
}

// ============================================
// Eviction
// ============================================

#[test_log::test(tokio::test)]
async fn test_forward_paging_evicts_two_pages_past_the_cap() {
    let engine = engine();
    let pager = pager(&engine, RangeSource::new(1000), 10, 40);

    // An empty valid window at offset 0
    pager
        .restore(&everload::WindowSnapshot::new(0, b"[]".to_vec()))
        .unwrap();

    for _ in 0..3 {
        load_next(&pager).await.unwrap();
    }
    assert_eq!((pager.offset(), pager.len()), (0, 30));

    load_next(&pager).await.unwrap();
    assert_eq!((pager.offset(), pager.len()), (0, 40));

    let change = load_next(&pager).await.unwrap();
    assert_eq!((pager.offset(), pager.len()), (20, 30));
    assert_eq!(
        change,
        WindowChange {
            size_change: -10,
            offset_change: 20
        }
    );
    assert_eq!(pager.items(), range(20, 50));
}

#[tokio::test]
async fn test_backward_paging_evicts_from_tail() {
    let engine = engine();
    let pager = pager(&engine, RangeSource::new(1000), 10, 40);
    pager
        .restore(&everload::WindowSnapshot::new(
            100,
            serde_json::to_vec(&range(100, 140)).unwrap(),
        ))
        .unwrap();

    let change = load_previous(&pager).await;

    assert_eq!(change.offset_change, -10);
    assert_eq!(pager.offset(), 90);
    assert_eq!(pager.len(), 30);
    assert_eq!(pager.items(), range(90, 120));
}

// ============================================
// End of list
// ============================================

#[tokio::test]
async fn test_load_next_is_noop_at_end() {
    let engine = engine();
    let source = RangeSource::new(25);
    let pager = pager(&engine, Arc::clone(&source), 10, 40);

    load(&pager).await;
    load_next(&pager).await.unwrap();
    load_next(&pager).await.unwrap();
    assert_eq!(pager.presumed_total_size(), Some(25));
    assert!(!pager.has_next());

    let fetches = source.fetches();
    let (tx, rx) = oneshot::channel::<()>();
    assert!(!pager.load_next(move |_| {
        let _ = tx.send(());
    }));
    // The completion was dropped without being called
    assert!(rx.await.is_err());
    assert_eq!(source.fetches(), fetches);
    assert!(!pager.is_loading());
}

// ============================================
// Re-initialization and persistence
// ============================================

#[tokio::test]
async fn test_invalidate_then_load_reproduces_window() {
    let engine = engine();
    let pager = pager(&engine, RangeSource::new(35), 10, 40);

    load(&pager).await;
    load_next(&pager).await.unwrap();
    load_next(&pager).await.unwrap();
    load_next(&pager).await.unwrap();
    let before = pager.state();
    let items = pager.items();
    assert_eq!(items, range(0, 35));

    pager.invalidate();
    assert!(!pager.is_valid());
    assert_eq!(pager.items(), items);

    load(&pager).await;
    let after = pager.state();

    assert_eq!(pager.items(), items);
    assert_eq!(after.offset, before.offset);
    assert_eq!(after.size, before.size);
    assert_eq!(after.presumed_total_size, before.presumed_total_size);
    assert!(after.valid);
}

#[tokio::test]
async fn test_snapshot_round_trip() {
    let engine = engine();
    let source = RangeSource::new(1000);
    let original = pager(&engine, Arc::clone(&source), 10, 40);
    load(&original).await;
    for _ in 0..5 {
        load_next(&original).await.unwrap();
    }
    assert_eq!(original.offset(), 20);

    let store = InMemorySnapshotStore::new();
    original.save_to(&store, "list").await.unwrap();

    let restored = pager(&engine, Arc::clone(&source), 10, 40);
    assert!(restored.restore_from(&store, "list").await.unwrap());

    assert_eq!(restored.offset(), original.offset());
    assert_eq!(restored.items(), original.items());
    assert_eq!(restored.snapshot().unwrap(), original.snapshot().unwrap());

    // The restored window keeps paging from where the original stopped
    load_next(&restored).await.unwrap();
    assert_eq!(restored.items().last(), Some(&69));
}

// ============================================
// Scrolling
// ============================================

#[tokio::test]
async fn test_scrolling_with_get() {
    let engine = engine();
    let pager = pager(&engine, RangeSource::new(100), 12, 48);
    load(&pager).await;

    let mut position = 0;
    while pager.offset() + pager.len() < 100 {
        let (tx, rx) = oneshot::channel();
        let item = pager.get(position, move |result| {
            let _ = tx.send(result);
        });
        assert_eq!(item, Some((pager.offset() + position) as u64));

        if pager.is_loading() {
            let change = rx.await.unwrap().unwrap();
            position = (position as isize - change.offset_change) as usize;
        }
        position += 1;
    }

    assert!(!pager.has_next());
    assert!(pager.len() <= 48);
    assert_eq!(pager.items().last(), Some(&99));
}

#[tokio::test]
async fn test_scrolling_stops_at_real_end_despite_larger_configured_total() {
    let engine = engine();
    let source = RangeSource::new(45);
    let pager = engine
        .pager_with(
            Arc::clone(&source),
            Default::default(),
            PagerConfig::new(10).with_presumed_total_size(1000),
        )
        .unwrap();
    load(&pager).await;

    let mut position = 0;
    while position < pager.len() {
        let (tx, rx) = oneshot::channel();
        pager.get(position, move |result| {
            let _ = tx.send(result);
        });
        if let Ok(result) = rx.await {
            position = (position as isize - result.unwrap().offset_change) as usize;
        }
        position += 1;
    }

    assert_eq!(pager.presumed_total_size(), Some(45));
    assert!(!pager.has_next());
    assert_eq!(pager.items().last(), Some(&44));

    // Reading the tail again fetches nothing more
    let fetches = source.fetches();
    pager.get(pager.len() - 1, |_| {});
    assert!(!pager.is_loading());
    assert_eq!(source.fetches(), fetches);
}

// ============================================
// Shared pools
// ============================================

#[tokio::test]
async fn test_pagers_on_one_pool_load_their_own_pages() {
    let engine = engine();
    let pool: LoadPool<PageKey, Page<u64>> = engine.pool();
    let first_source = RangeSource::new(100);
    let second_source = RangeSource::starting_at(1000, 100);
    let first: Pager<u64> = Pager::new(
        Arc::clone(&first_source),
        Default::default(),
        PagerConfig::new(10),
        pool.clone(),
    )
    .unwrap();
    let second: Pager<u64> = Pager::new(
        Arc::clone(&second_source),
        Default::default(),
        PagerConfig::new(10),
        pool,
    )
    .unwrap();

    let (first_change, second_change) = tokio::join!(load(&first), load(&second));

    assert_eq!(first_change.size_change, 10);
    assert_eq!(second_change.size_change, 10);
    assert_eq!(first.items(), range(0, 10));
    assert_eq!(second.items(), range(1000, 1010));
    assert_eq!(first_source.fetches(), 1);
    assert_eq!(second_source.fetches(), 1);
}
