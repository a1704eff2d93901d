//! Registry of survivable load slots
//!
//! A slot is addressed by a stable identifier and lets a background load
//! outlive the owner that started it. A later owner using the same
//! identifier adopts the running load, or receives its buffered result,
//! instead of starting the work again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::owner::SurvivableLoader;
use crate::dispatch::Dispatcher;
use crate::error::LoadError;

/// Completion callback for a survivable load, invoked once on the dispatch context
pub type SlotCompletion<V> = Box<dyn FnOnce(Result<V, LoadError>) + Send + 'static>;

/// Identifies one owner handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OwnerId(u64);

/// How an owner leaves its slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Detach {
    /// Keep the slot registered so the next owner can adopt it
    KeepForNext,
    /// Unregister the slot; the running work finishes into nothing
    Discard,
    /// Cancel the work and unregister the slot
    Interrupt,
}

/// How a request was associated with a slot
///
/// Accepted requests carry the generation of the slot they landed on.
/// Identifiers are reused once a slot is delivered; the generation is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Attach {
    Started(u64),
    AdoptedRunning(u64),
    AdoptedFinished(u64),
    Rejected,
}

impl Attach {
    pub(crate) fn generation(self) -> Option<u64> {
        match self {
            Attach::Started(generation)
            | Attach::AdoptedRunning(generation)
            | Attach::AdoptedFinished(generation) => Some(generation),
            Attach::Rejected => None,
        }
    }
}

struct Binding<V> {
    owner: OwnerId,
    completion: SlotCompletion<V>,
}

struct SlotState<V> {
    buffered: Option<Result<V, LoadError>>,
    owner: Option<Binding<V>>,
    interrupted: bool,
    discarded: bool,
}

struct Slot<V> {
    generation: u64,
    identifier: String,
    cancel: CancellationToken,
    state: Mutex<SlotState<V>>,
}

/// Registry of survivable loads keyed by stable identifier
///
/// The registry is an ordinary value: create one per scope that needs
/// survivability (usually one per application) and share it with an `Arc`.
/// Lock order is always the slot map first, then the slot.
///
/// # Example
///
/// ```ignore
/// let registry = SlotRegistry::new(dispatcher);
///
/// let screen = registry.owner();
/// screen.load_in_background(fetch_feed(), "feed", |result| show(result));
/// drop(screen); // torn down; the load keeps running
///
/// let rebuilt = registry.owner();
/// // Adopts the running (or finished) load; fetch_feed is not called again
/// rebuilt.load_in_background(fetch_feed(), "feed", |result| show(result));
/// ```
pub struct SlotRegistry<V> {
    slots: Mutex<HashMap<String, Arc<Slot<V>>>>,
    dispatcher: Dispatcher,
    runtime: Handle,
    next_owner: AtomicU64,
    next_generation: AtomicU64,
    closed: AtomicBool,
    weak_self: Weak<SlotRegistry<V>>,
}

impl<V: Send + 'static> SlotRegistry<V> {
    /// Create a registry on the current tokio runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn new(dispatcher: Dispatcher) -> Arc<Self> {
        Self::with_runtime(dispatcher, Handle::current())
    }

    /// Create a registry that spawns loads on `runtime`
    pub fn with_runtime(dispatcher: Dispatcher, runtime: Handle) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            slots: Mutex::new(HashMap::new()),
            dispatcher,
            runtime,
            next_owner: AtomicU64::new(1),
            next_generation: AtomicU64::new(1),
            closed: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    /// Create a new owner handle bound to this registry
    pub fn owner(self: &Arc<Self>) -> SurvivableLoader<V> {
        let id = OwnerId(self.next_owner.fetch_add(1, Ordering::Relaxed));
        SurvivableLoader::new(Arc::clone(self), id)
    }

    /// Check if a slot is registered under `identifier`
    pub fn contains(&self, identifier: &str) -> bool {
        self.slots.lock().contains_key(identifier)
    }

    /// Check if the slot under `identifier` holds a result nobody has claimed yet
    pub fn has_buffered_result(&self, identifier: &str) -> bool {
        self.slots
            .lock()
            .get(identifier)
            .is_some_and(|slot| slot.state.lock().buffered.is_some())
    }

    /// Number of registered slots
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    /// Check if no slots are registered
    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Identifiers of every registered slot
    pub fn identifiers(&self) -> Vec<String> {
        self.slots.lock().keys().cloned().collect()
    }

    /// Cancel the load under `identifier`, whoever owns it
    ///
    /// Any buffered result is dropped and no completion fires.
    pub fn interrupt(&self, identifier: &str) -> bool {
        let removed = self.slots.lock().remove(identifier);
        match removed {
            Some(slot) => {
                Self::cancel_slot(&slot);
                debug!(identifier, "Slot interrupted");
                true
            }
            None => false,
        }
    }

    /// Cancel every registered load
    pub fn interrupt_all(&self) -> usize {
        let drained: Vec<_> = self.slots.lock().drain().collect();
        for (_, slot) in &drained {
            Self::cancel_slot(slot);
        }
        drained.len()
    }

    /// Cancel every load and refuse further requests
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let interrupted = self.interrupt_all();
        info!(interrupted, "Slot registry closed");
    }

    /// Check if the registry refuses new requests
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Check if `owner` is the live owner of the slot under `identifier`
    pub(crate) fn is_bound(&self, owner: OwnerId, identifier: &str) -> bool {
        self.slots.lock().get(identifier).is_some_and(|slot| {
            slot.state
                .lock()
                .owner
                .as_ref()
                .is_some_and(|binding| binding.owner == owner)
        })
    }

    /// Associate `owner` with the slot for `identifier`, starting `load` if needed
    ///
    /// When a slot already exists, `load` is dropped without being polled.
    pub(crate) fn attach(
        &self,
        owner: OwnerId,
        identifier: &str,
        load: BoxFuture<'static, Result<V, LoadError>>,
        completion: SlotCompletion<V>,
    ) -> Attach {
        if self.is_closed() {
            warn!(identifier, "Slot registry closed, request rejected");
            return Attach::Rejected;
        }

        let mut slots = self.slots.lock();
        let binding = Binding { owner, completion };

        if let Some(slot) = slots.get(identifier).cloned() {
            let mut state = slot.state.lock();
            if let Some(result) = state.buffered.take() {
                slots.remove(identifier);
                drop(state);
                drop(slots);
                debug!(identifier, generation = slot.generation, "Adopted finished load");
                self.deliver(identifier, binding, result);
                return Attach::AdoptedFinished(slot.generation);
            }

            if let Some(previous) = state.owner.replace(binding) {
                if previous.owner != owner {
                    debug!(identifier, "Previous owner displaced");
                }
            }
            debug!(identifier, generation = slot.generation, "Adopted running load");
            return Attach::AdoptedRunning(slot.generation);
        }

        let slot = Arc::new(Slot {
            generation: self.next_generation.fetch_add(1, Ordering::Relaxed),
            identifier: identifier.to_string(),
            cancel: CancellationToken::new(),
            state: Mutex::new(SlotState {
                buffered: None,
                owner: Some(binding),
                interrupted: false,
                discarded: false,
            }),
        });
        slots.insert(identifier.to_string(), Arc::clone(&slot));
        drop(slots);

        let generation = slot.generation;
        debug!(identifier, generation, "Started background load");
        self.spawn(slot, load);
        Attach::Started(generation)
    }

    /// Detach `owner` from the slot for `identifier`
    ///
    /// `generation` must match the slot the owner attached to; a slot
    /// re-created under the same identifier is left alone. Only the live
    /// owner may detach. An unowned slot of the same generation can still
    /// be interrupted.
    pub(crate) fn detach(
        &self,
        owner: OwnerId,
        identifier: &str,
        generation: u64,
        mode: Detach,
    ) -> bool {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.get(identifier).cloned() else {
            return false;
        };
        if slot.generation != generation {
            trace!(identifier, generation, current = slot.generation, "Stale detach ignored");
            return false;
        }
        let mut state = slot.state.lock();

        let bound_here = state
            .owner
            .as_ref()
            .is_some_and(|binding| binding.owner == owner);
        let allowed = bound_here || (mode == Detach::Interrupt && state.owner.is_none());
        if !allowed {
            return false;
        }
        state.owner = None;

        match mode {
            Detach::KeepForNext => {
                trace!(identifier, "Owner detached, slot kept for next owner");
            }
            Detach::Discard => {
                // Explicit discard: the work keeps running but its result has nowhere to go
                state.discarded = true;
                state.buffered = None;
                slots.remove(identifier);
                debug!(identifier, "Owner detached, result will be discarded");
            }
            Detach::Interrupt => {
                state.interrupted = true;
                state.buffered = None;
                slots.remove(identifier);
                slot.cancel.cancel();
                debug!(identifier, "Owner interrupted slot");
            }
        }
        true
    }

    fn spawn(&self, slot: Arc<Slot<V>>, load: BoxFuture<'static, Result<V, LoadError>>) {
        let registry = self.weak_self.clone();
        self.runtime.spawn(async move {
            let result = tokio::select! {
                biased;
                _ = slot.cancel.cancelled() => None,
                result = load => Some(result),
            };
            let Some(result) = result else {
                trace!(identifier = %slot.identifier, "Background load cancelled");
                return;
            };
            match registry.upgrade() {
                Some(registry) => registry.complete(&slot, result),
                None => trace!(identifier = %slot.identifier, "Registry gone, result dropped"),
            }
        });
    }

    /// Hand a finished result to the live owner, or buffer it for the next one
    fn complete(&self, slot: &Arc<Slot<V>>, result: Result<V, LoadError>) {
        let mut slots = self.slots.lock();
        let mut state = slot.state.lock();

        if state.interrupted || result.as_ref().is_err_and(LoadError::is_interrupted) {
            trace!(identifier = %slot.identifier, "Slot interrupted, result dropped");
            return;
        }
        if state.discarded {
            debug!(identifier = %slot.identifier, "Discarding result of detached load");
            return;
        }

        match state.owner.take() {
            Some(binding) => {
                let registered_here = slots
                    .get(&slot.identifier)
                    .is_some_and(|current| Arc::ptr_eq(current, slot));
                if registered_here {
                    slots.remove(&slot.identifier);
                }
                drop(state);
                drop(slots);
                self.deliver(&slot.identifier, binding, result);
            }
            None => {
                debug!(identifier = %slot.identifier, "No owner attached, buffering result");
                state.buffered = Some(result);
            }
        }
    }

    fn deliver(&self, identifier: &str, binding: Binding<V>, result: Result<V, LoadError>) {
        let completion = binding.completion;
        if !self.dispatcher.post(move || completion(result)) {
            warn!(identifier, "Dispatcher closed, survivable result dropped");
        }
    }

    fn cancel_slot(slot: &Slot<V>) {
        let mut state = slot.state.lock();
        state.interrupted = true;
        state.owner = None;
        state.buffered = None;
        slot.cancel.cancel();
    }
}

impl<V> std::fmt::Debug for SlotRegistry<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotRegistry")
            .field("slots", &self.slots.lock().keys().collect::<Vec<_>>())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}
