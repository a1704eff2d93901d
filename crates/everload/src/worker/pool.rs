//! Deduplicating worker pool
//!
//! Coalesces concurrent loads that share a key into a single execution and
//! fans the single result out to every waiter on the dispatch context.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use super::loader::Loader;
use super::stats::{PoolStats, PoolStatsSnapshot};
use crate::dispatch::Dispatcher;
use crate::duration_millis;
use crate::error::{ConfigError, LoadError};
use crate::reliability::{RetryPolicy, RetryingTask};

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolConfig {
    /// Worker threads kept alive while idle
    pub core_workers: usize,

    /// Maximum loads executing at once
    pub max_workers: usize,

    /// How long a surplus idle thread lingers before it is reclaimed
    #[serde(with = "duration_millis")]
    pub idle_timeout: Duration,

    /// Pool-wide switch for the delay between retry attempts
    pub retry_delay_enabled: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        let cpus = num_cpus::get();
        Self {
            core_workers: (cpus / 2).max(1),
            max_workers: cpus.max(1),
            idle_timeout: Duration::from_secs(10),
            retry_delay_enabled: true,
        }
    }
}

impl PoolConfig {
    /// Create a configuration sized for this machine
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of core workers
    pub fn with_core_workers(mut self, workers: usize) -> Self {
        self.core_workers = workers.max(1);
        self
    }

    /// Set maximum concurrency
    pub fn with_max_workers(mut self, workers: usize) -> Self {
        self.max_workers = workers.max(1);
        self
    }

    /// Set the idle reclaim period
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enable or disable retry delays for every task in the pool
    pub fn with_retry_delay(mut self, enabled: bool) -> Self {
        self.retry_delay_enabled = enabled;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.core_workers == 0 || self.max_workers == 0 {
            return Err(ConfigError::Invalid(
                "pool needs at least one worker".into(),
            ));
        }
        if self.core_workers > self.max_workers {
            return Err(ConfigError::Invalid(
                "core_workers must not exceed max_workers".into(),
            ));
        }
        Ok(())
    }

    /// Build a multi-thread runtime sized by this configuration
    ///
    /// Async workers are fixed at `core_workers`; blocking loaders may grow
    /// the blocking pool up to `max_workers` threads, which are reclaimed
    /// after `idle_timeout`.
    pub fn build_runtime(&self) -> std::io::Result<tokio::runtime::Runtime> {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(self.core_workers)
            .max_blocking_threads(self.max_workers)
            .thread_keep_alive(self.idle_timeout)
            .thread_name("everload-worker")
            .enable_all()
            .build()
    }
}

/// Identifies one registered completion callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

/// Result of a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Submission {
    /// `true` if a new execution was started, `false` if the callback joined
    /// an execution already in flight
    pub started: bool,

    /// Handle for withdrawing this callback with [`LoadPool::stop_waiter`]
    pub waiter: WaiterId,
}

/// Completion callback: `(key, result)`, invoked once on the dispatch context
pub type Completion<K, V> = Box<dyn FnOnce(&K, Result<V, LoadError>) + Send + 'static>;

/// Bookkeeping for one execution
struct TaskHandle {
    id: u64,
    cancel: CancellationToken,
}

/// Waiters registered against an in-flight key, in registration order
struct InFlight<K, V> {
    task: Arc<TaskHandle>,
    started: bool,
    waiters: Vec<(WaiterId, Completion<K, V>)>,
}

struct PoolInner<K, V> {
    config: PoolConfig,
    retry: RetryPolicy,
    dispatcher: Dispatcher,
    runtime: Handle,
    permits: Arc<Semaphore>,
    in_flight: Mutex<HashMap<K, InFlight<K, V>>>,
    next_task_id: AtomicU64,
    next_waiter_id: AtomicU64,
    stats: PoolStats,
}

/// Deduplicating pool for keyed loads
///
/// At most one execution runs per key. Every submission made while that
/// execution is in flight joins its waiter list and receives the same
/// `(key, result)` pair, in registration order, on the dispatch context.
///
/// # Example
///
/// ```ignore
/// use everload::prelude::*;
///
/// let pool: LoadPool<String, Profile> = LoadPool::new(PoolConfig::default(), dispatcher);
/// let loader = loader_fn(|user: String| async move { fetch_profile(&user).await });
///
/// pool.submit("alice".to_string(), loader.clone(), |_, result| render(result));
/// // Coalesced onto the load above
/// pool.submit("alice".to_string(), loader, |_, result| cache(result));
/// ```
pub struct LoadPool<K, V> {
    inner: Arc<PoolInner<K, V>>,
}

impl<K, V> Clone for LoadPool<K, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, V> LoadPool<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Create a pool on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(config: PoolConfig, dispatcher: Dispatcher) -> Self {
        Self::with_runtime(config, RetryPolicy::default(), dispatcher, Handle::current())
    }

    /// Create a pool with an explicit retry policy and runtime handle
    pub fn with_runtime(
        config: PoolConfig,
        retry: RetryPolicy,
        dispatcher: Dispatcher,
        runtime: Handle,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_workers.max(1)));
        Self {
            inner: Arc::new(PoolInner {
                config,
                retry,
                dispatcher,
                runtime,
                permits,
                in_flight: Mutex::new(HashMap::new()),
                next_task_id: AtomicU64::new(1),
                next_waiter_id: AtomicU64::new(1),
                stats: PoolStats::default(),
            }),
        }
    }

    /// Submit a keyed load
    ///
    /// Returns `true` if a new execution was started, `false` if the callback
    /// was coalesced onto an execution already in flight for `key`.
    pub fn submit(
        &self,
        key: K,
        loader: Arc<dyn Loader<K, V>>,
        on_complete: impl FnOnce(&K, Result<V, LoadError>) + Send + 'static,
    ) -> bool {
        self.submit_tracked(key, loader, on_complete).started
    }

    /// Submit a keyed load and get a handle to the registered callback
    pub fn submit_tracked(
        &self,
        key: K,
        loader: Arc<dyn Loader<K, V>>,
        on_complete: impl FnOnce(&K, Result<V, LoadError>) + Send + 'static,
    ) -> Submission {
        self.submit_with_policy(key, loader, self.inner.retry.clone(), on_complete)
    }

    /// Submit a keyed load with a retry policy for this execution only
    ///
    /// The policy is ignored when the callback is coalesced.
    #[instrument(skip_all, fields(key = ?key))]
    pub fn submit_with_policy(
        &self,
        key: K,
        loader: Arc<dyn Loader<K, V>>,
        policy: RetryPolicy,
        on_complete: impl FnOnce(&K, Result<V, LoadError>) + Send + 'static,
    ) -> Submission {
        let waiter = WaiterId(self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed));
        let completion: Completion<K, V> = Box::new(on_complete);

        let task = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(entry) = in_flight.get_mut(&key) {
                entry.waiters.push((waiter, completion));
                self.inner.stats.record_coalesced();
                debug!(waiters = entry.waiters.len(), "Coalesced onto in-flight load");
                return Submission {
                    started: false,
                    waiter,
                };
            }

            let task = Arc::new(TaskHandle {
                id: self.inner.next_task_id.fetch_add(1, Ordering::Relaxed),
                cancel: CancellationToken::new(),
            });
            in_flight.insert(
                key.clone(),
                InFlight {
                    task: Arc::clone(&task),
                    started: false,
                    waiters: vec![(waiter, completion)],
                },
            );
            task
        };

        self.inner.stats.record_submitted();
        debug!(task_id = task.id, "Queued new load");
        self.spawn_task(key, loader, policy, task);

        Submission {
            started: true,
            waiter,
        }
    }

    /// Stop the load for `key`
    ///
    /// A queued task is dequeued and never runs. A running task is marked
    /// interrupted; it stops at its next safe point and never delivers. In
    /// both cases every waiter is dropped without being called, and the key
    /// is immediately free for a fresh submission.
    ///
    /// Returns `false` if nothing was in flight for `key`.
    pub fn stop_loading(&self, key: &K) -> bool {
        let entry = self.inner.in_flight.lock().remove(key);
        match entry {
            Some(entry) => {
                entry.task.cancel.cancel();
                self.inner.stats.record_interrupted();
                debug!(
                    key = ?key,
                    started = entry.started,
                    dropped_waiters = entry.waiters.len(),
                    "Stopped load"
                );
                true
            }
            None => false,
        }
    }

    /// Withdraw a single callback
    ///
    /// If it was the last waiter for `key`, the load is stopped as with
    /// [`stop_loading`](Self::stop_loading). Returns `false` if the waiter
    /// was not registered (already delivered or already withdrawn).
    pub fn stop_waiter(&self, key: &K, waiter: WaiterId) -> bool {
        let mut in_flight = self.inner.in_flight.lock();
        let Some(entry) = in_flight.get_mut(key) else {
            return false;
        };
        let before = entry.waiters.len();
        entry.waiters.retain(|(id, _)| *id != waiter);
        if entry.waiters.len() == before {
            return false;
        }

        if entry.waiters.is_empty() {
            if let Some(entry) = in_flight.remove(key) {
                entry.task.cancel.cancel();
                self.inner.stats.record_interrupted();
                debug!(key = ?key, "Last waiter withdrawn, stopped load");
            }
        }
        true
    }

    /// Check if a load for `key` is queued or running
    pub fn is_loading(&self, key: &K) -> bool {
        self.inner.in_flight.lock().contains_key(key)
    }

    /// Number of keys currently queued or running
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.lock().len()
    }

    /// Number of loads currently executing
    pub fn active(&self) -> usize {
        self.inner
            .config
            .max_workers
            .saturating_sub(self.inner.permits.available_permits())
    }

    /// Counters since the pool was created
    pub fn stats(&self) -> PoolStatsSnapshot {
        self.inner.stats.snapshot()
    }

    /// Pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Dispatcher used for completions
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.inner.dispatcher
    }

    /// Interrupt everything and refuse further work
    ///
    /// No completion fires for interrupted loads. Submissions made after
    /// shutdown are dropped silently, the same way as interrupted ones.
    pub fn shutdown(&self) {
        self.inner.permits.close();
        let drained: Vec<_> = self.inner.in_flight.lock().drain().collect();
        for (_, entry) in &drained {
            entry.task.cancel.cancel();
            self.inner.stats.record_interrupted();
        }
        info!(interrupted = drained.len(), "Load pool shut down");
    }

    fn spawn_task(
        &self,
        key: K,
        loader: Arc<dyn Loader<K, V>>,
        policy: RetryPolicy,
        task: Arc<TaskHandle>,
    ) {
        let inner = Arc::clone(&self.inner);

        self.inner.runtime.spawn(async move {
            // Wait for a free worker; a stop while queued dequeues the task
            let permit = tokio::select! {
                biased;
                _ = task.cancel.cancelled() => None,
                permit = Arc::clone(&inner.permits).acquire_owned() => permit.ok(),
            };
            let Some(permit) = permit else {
                trace!(key = ?key, task_id = task.id, "Dequeued before start");
                inner.forget(&key, &task);
                return;
            };

            if !inner.mark_started(&key, &task) {
                trace!(key = ?key, task_id = task.id, "Stopped before start");
                return;
            }

            let mut retrying = RetryingTask::new(loader, policy)
                .with_cancellation(task.cancel.clone())
                .with_delay(inner.config.retry_delay_enabled);
            let result = retrying.run(&key).await;
            drop(permit);

            inner.finish(key, &task, result);
        });
    }
}

impl<K, V> PoolInner<K, V>
where
    K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    /// Flip the entry to running if it still belongs to this task
    fn mark_started(&self, key: &K, task: &TaskHandle) -> bool {
        let mut in_flight = self.in_flight.lock();
        match in_flight.get_mut(key) {
            Some(entry) if entry.task.id == task.id && !task.cancel.is_cancelled() => {
                entry.started = true;
                true
            }
            _ => false,
        }
    }

    /// Drop the entry of a task that will never run
    fn forget(&self, key: &K, task: &TaskHandle) {
        let mut in_flight = self.in_flight.lock();
        if in_flight.get(key).is_some_and(|entry| entry.task.id == task.id) {
            in_flight.remove(key);
            self.stats.record_interrupted();
        }
    }

    /// Remove the waiter list and fan the result out
    fn finish(&self, key: K, task: &TaskHandle, result: Result<V, LoadError>) {
        // The key becomes free for a fresh submission at this removal
        let waiters = {
            let mut in_flight = self.in_flight.lock();
            let owned = in_flight
                .get(&key)
                .is_some_and(|entry| entry.task.id == task.id);
            if owned {
                in_flight.remove(&key).map(|entry| entry.waiters)
            } else {
                None
            }
        };

        if matches!(result, Err(LoadError::Interrupted)) || task.cancel.is_cancelled() {
            trace!(key = ?key, task_id = task.id, "Interrupted, result discarded");
            return;
        }
        let Some(waiters) = waiters else {
            trace!(key = ?key, task_id = task.id, "No waiters left, result discarded");
            return;
        };

        match &result {
            Ok(_) => self.stats.record_completed(),
            Err(e) => {
                self.stats.record_failed();
                debug!(key = ?key, error = %e, "Load failed");
            }
        }

        let delivered = self.dispatcher.post(move || {
            for (_, completion) in waiters {
                completion(&key, result.clone());
            }
        });
        if !delivered {
            warn!(task_id = task.id, "Dispatcher closed, completions dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use tokio::sync::mpsc;

    use crate::worker::loader_fn;

    #[test]
    fn test_default_config() {
        let config = PoolConfig::default();
        let cpus = num_cpus::get();
        assert_eq!(config.core_workers, (cpus / 2).max(1));
        assert_eq!(config.max_workers, cpus.max(1));
        assert!(config.retry_delay_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = PoolConfig::new()
            .with_core_workers(2)
            .with_max_workers(8)
            .with_idle_timeout(Duration::from_secs(30))
            .with_retry_delay(false);

        assert_eq!(config.core_workers, 2);
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.idle_timeout, Duration::from_secs(30));
        assert!(!config.retry_delay_enabled);
    }

    #[test]
    fn test_config_validation() {
        let inverted = PoolConfig::new().with_core_workers(8).with_max_workers(2);
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_config_serialization() {
        let config = PoolConfig::new().with_idle_timeout(Duration::from_millis(1500));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["idle_timeout"], 1500);

        let parsed: PoolConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_build_runtime() {
        let config = PoolConfig::new().with_core_workers(1).with_max_workers(2);
        let runtime = config.build_runtime().unwrap();
        let answer = runtime.block_on(async { 42 });
        assert_eq!(answer, 42);
    }

    #[tokio::test]
    async fn test_submit_delivers_on_dispatcher() {
        let pool: LoadPool<u32, String> =
            LoadPool::new(PoolConfig::new().with_max_workers(2), Dispatcher::spawn());
        let loader = loader_fn(|key: u32| async move { Ok(Some(format!("value-{key}"))) });
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(pool.submit(7, loader, move |key, result| {
            tx.send((*key, result)).unwrap();
        }));

        let (key, result) = rx.recv().await.unwrap();
        assert_eq!(key, 7);
        assert_eq!(result.unwrap(), "value-7");
        assert!(!pool.is_loading(&7));
        assert_eq!(pool.stats().completed, 1);
    }

    #[tokio::test]
    async fn test_key_is_reusable_after_delivery() {
        let pool: LoadPool<&'static str, usize> =
            LoadPool::new(PoolConfig::new(), Dispatcher::spawn());
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let loader = loader_fn(move |_key: &'static str| {
            let counter = Arc::clone(&counter);
            async move { Ok(Some(counter.fetch_add(1, Ordering::SeqCst) + 1)) }
        });

        for expected in 1..=2 {
            let (tx, mut rx) = mpsc::unbounded_channel();
            assert!(pool.submit("k", Arc::clone(&loader), move |_, result| {
                tx.send(result).unwrap();
            }));
            assert_eq!(rx.recv().await.unwrap().unwrap(), expected);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_stop_waiter_keeps_remaining_waiters() {
        let pool: LoadPool<u8, u8> = LoadPool::new(PoolConfig::new(), Dispatcher::spawn());
        let gate = Arc::new(Semaphore::new(0));
        let loader = {
            let gate = Arc::clone(&gate);
            loader_fn(move |_key: u8| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    Ok(Some(1))
                }
            })
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first_tx = tx.clone();
        let first = pool.submit_tracked(1, Arc::clone(&loader), move |_, _| {
            first_tx.send("first").unwrap();
        });
        let second = pool.submit_tracked(1, loader, move |_, _| {
            tx.send("second").unwrap();
        });
        assert!(first.started);
        assert!(!second.started);

        assert!(pool.stop_waiter(&1, first.waiter));
        assert!(!pool.stop_waiter(&1, first.waiter));
        assert!(pool.is_loading(&1));

        gate.add_permits(1);
        assert_eq!(rx.recv().await.unwrap(), "second");
        pool.dispatcher().flush().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_last_waiter_stops_load() {
        let pool: LoadPool<u8, u8> = LoadPool::new(PoolConfig::new(), Dispatcher::spawn());
        let gate = Arc::new(Semaphore::new(0));
        let loader = {
            let gate = Arc::clone(&gate);
            loader_fn(move |_key: u8| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    Ok(Some(1))
                }
            })
        };

        let delivered = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&delivered);
        let only = pool.submit_tracked(3, loader, move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(pool.stop_waiter(&3, only.waiter));
        assert!(!pool.is_loading(&3));
        assert_eq!(pool.stats().interrupted, 1);

        gate.add_permits(1);
        tokio::task::yield_now().await;
        pool.dispatcher().flush().await;
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_fatal_error_reaches_every_waiter() {
        let pool: LoadPool<u8, u8> = LoadPool::new(PoolConfig::new(), Dispatcher::spawn());
        let gate = Arc::new(Semaphore::new(0));
        let loader = {
            let gate = Arc::clone(&gate);
            loader_fn(move |_key: u8| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    Err(anyhow::anyhow!("not found"))
                }
            })
        };
        let (tx, mut rx) = mpsc::unbounded_channel();

        for _ in 0..3 {
            let tx = tx.clone();
            pool.submit(9, Arc::clone(&loader), move |_, result| {
                tx.send(result).unwrap();
            });
        }
        gate.add_permits(1);

        let first = rx.recv().await.unwrap().unwrap_err();
        assert!(first.is_fatal());
        for _ in 0..2 {
            assert_eq!(rx.recv().await.unwrap().unwrap_err(), first);
        }
        assert_eq!(pool.stats().failed, 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_everything() {
        let pool: LoadPool<u8, u8> =
            LoadPool::new(PoolConfig::new().with_max_workers(1), Dispatcher::spawn());
        let gate = Arc::new(Semaphore::new(0));
        let loader = {
            let gate = Arc::clone(&gate);
            loader_fn(move |_key: u8| {
                let gate = Arc::clone(&gate);
                async move {
                    let _permit = gate.acquire().await?;
                    Ok(Some(1))
                }
            })
        };

        let delivered = Arc::new(AtomicUsize::new(0));
        for key in 1..=2 {
            let counter = Arc::clone(&delivered);
            pool.submit(key, Arc::clone(&loader), move |_, _| {
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        pool.shutdown();
        gate.add_permits(2);

        assert_eq!(pool.in_flight(), 0);
        tokio::task::yield_now().await;
        pool.dispatcher().flush().await;
        assert_eq!(pool.stats().interrupted, 2);
        assert_eq!(delivered.load(Ordering::SeqCst), 0);
    }
}
