//! Engine facade
//!
//! The `Engine` owns the dispatch context and hands out pools, slot
//! registries and pagers configured from one [`EngineConfig`]. Every
//! component it creates is an isolated value; nothing is shared through
//! process-wide state.

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::info;

use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::error::ConfigError;
use crate::pager::{MutableSequence, Page, PageKey, PageSource, Pager, PagerConfig};
use crate::slot::SlotRegistry;
use crate::worker::LoadPool;

/// Entry point wiring the engine components to a single dispatch context
#[derive(Debug, Clone)]
pub struct Engine {
    config: EngineConfig,
    dispatcher: Dispatcher,
    runtime: Handle,
}

impl Engine {
    /// Create an engine on the current tokio runtime
    ///
    /// Completions are delivered by a dispatch consumer spawned on the same
    /// runtime.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(config: EngineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = Self {
            config,
            dispatcher: Dispatcher::spawn(),
            runtime: Handle::current(),
        };
        engine.log_started();
        Ok(engine)
    }

    /// Create an engine delivering completions through `dispatcher`
    ///
    /// Use this with [`Dispatcher::manual`] when an application loop drains
    /// the completion queue itself.
    pub fn with_dispatcher(
        config: EngineConfig,
        dispatcher: Dispatcher,
        runtime: Handle,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let engine = Self {
            config,
            dispatcher,
            runtime,
        };
        engine.log_started();
        Ok(engine)
    }

    fn log_started(&self) {
        info!(
            core_workers = self.config.pool.core_workers,
            max_workers = self.config.pool.max_workers,
            retry_limit = self.config.retry.max_attempts,
            page_size = self.config.pager.page_size,
            "Engine started"
        );
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Create a deduplicating pool for keyed loads
    pub fn pool<K, V>(&self) -> LoadPool<K, V>
    where
        K: Eq + Hash + Clone + Debug + Send + Sync + 'static,
        V: Clone + Send + 'static,
    {
        LoadPool::with_runtime(
            self.config.pool.clone(),
            self.config.retry.clone(),
            self.dispatcher.clone(),
            self.runtime.clone(),
        )
    }

    /// Create a registry of survivable loads
    pub fn slot_registry<V: Send + 'static>(&self) -> Arc<SlotRegistry<V>> {
        SlotRegistry::with_runtime(self.dispatcher.clone(), self.runtime.clone())
    }

    /// Create a pager over `source` with the configured window sizing
    pub fn pager<T, S>(&self, source: Arc<S>) -> Result<Pager<T>, ConfigError>
    where
        T: Clone + Send + Sync + 'static,
        S: PageSource<T> + ?Sized,
    {
        self.pager_with(source, Default::default(), self.config.pager.clone())
    }

    /// Create a pager with custom storage and sizing
    ///
    /// Each pager fetches through its own pool so page keys never collide
    /// between pagers.
    pub fn pager_with<T, M, S>(
        &self,
        source: Arc<S>,
        items: M,
        config: PagerConfig,
    ) -> Result<Pager<T, M>, ConfigError>
    where
        T: Clone + Send + Sync + 'static,
        M: MutableSequence<T>,
        S: PageSource<T> + ?Sized,
    {
        let pool: LoadPool<PageKey, Page<T>> = self.pool();
        Pager::new(source, items, config, pool)
    }

    /// Wait until every completion posted so far has run
    pub async fn flush(&self) {
        self.dispatcher.flush().await;
    }
}
