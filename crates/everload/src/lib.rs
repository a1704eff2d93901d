//! # Background Loading Engine
//!
//! Concurrency and caching layer for UI-driven applications that fetch data
//! asynchronously.
//!
//! ## Features
//!
//! - **Coalescing**: Concurrent loads for the same key run once and fan out one result
//! - **Bounded retries**: Transient failures are retried with optional backoff
//! - **Survivable loads**: A load outlives the component that started it and is adopted by its replacement
//! - **Windowed paging**: Very large lists are held as a bounded window loaded at its edges
//! - **Single delivery context**: Every completion runs on one dispatch queue
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────┐     ┌──────────────────────┐
//! │        Pager         │     │     SlotRegistry      │
//! │ (window, eviction)   │     │ (survivable loads)    │
//! └──────────┬───────────┘     └──────────┬───────────┘
//!            │ page requests               │ owner handover
//!            ▼                             │
//! ┌──────────────────────┐                 │
//! │       LoadPool       │                 │
//! │ (coalescing, permits)│                 │
//! └──────────┬───────────┘                 │
//!            ▼                             │
//! ┌──────────────────────┐                 │
//! │     RetryingTask     │                 │
//! │ (attempts, backoff)  │                 │
//! └──────────┬───────────┘                 │
//!            ▼                             ▼
//! ┌─────────────────────────────────────────────────────┐
//! │                     Dispatcher                       │
//! │   (single consumer, completions in posting order)   │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use everload::prelude::*;
//!
//! let engine = Engine::new(EngineConfig::from_env()?)?;
//!
//! let profiles: LoadPool<UserId, Profile> = engine.pool();
//! profiles.submit(user_id, profile_loader.clone(), |key, result| match result {
//!     Ok(profile) => show(profile),
//!     Err(e) => show_error(key, e),
//! });
//!
//! let feed = engine.pager(Arc::new(FeedSource::new(client)))?;
//! feed.load(|_| refresh());
//! ```

pub mod config;
pub mod dispatch;
pub(crate) mod duration_millis;
pub mod engine;
pub mod error;
pub mod pager;
pub mod persistence;
pub mod reliability;
pub mod slot;
pub mod worker;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::dispatch::Dispatcher;
    pub use crate::engine::Engine;
    pub use crate::error::{ConfigError, LoadError, SnapshotError};
    pub use crate::pager::{MutableSequence, Page, PageSource, Pager, PagerConfig, WindowChange};
    pub use crate::persistence::{InMemorySnapshotStore, SnapshotStore, WindowSnapshot};
    pub use crate::reliability::{Backoff, RetryPolicy};
    pub use crate::slot::{SlotRegistry, SurvivableLoader};
    pub use crate::worker::{blocking_loader, loader_fn, LoadPool, Loader, PoolConfig};
}

// Re-export key types at crate root
pub use config::EngineConfig;
pub use dispatch::{DispatchQueue, Dispatcher};
pub use engine::Engine;
pub use error::{ConfigError, LoadError, SnapshotError};
pub use pager::{
    LoadDirection, MutableSequence, Page, PageKey, PageSource, Pager, PagerConfig, WindowChange,
    WindowState,
};
pub use persistence::{InMemorySnapshotStore, SnapshotStore, WindowSnapshot};
pub use reliability::{Backoff, RetryPolicy, RetryingTask, TaskState};
pub use slot::{OwnerId, SlotRegistry, SurvivableLoader};
pub use worker::{
    blocking_loader, loader_fn, LoadPool, Loader, PoolConfig, PoolStatsSnapshot, Submission,
    WaiterId,
};
