//! Owner handle for survivable loads

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use parking_lot::Mutex;
use tracing::{debug, instrument};

use super::registry::{Detach, OwnerId, SlotRegistry};
use crate::error::LoadError;

/// Handle a short-lived owner uses to start or adopt survivable loads
///
/// An owner is bound to at most one slot at a time. Dropping the handle
/// behaves like [`delay_for_next_loader`](Self::delay_for_next_loader): the
/// load keeps running and its result waits for the next owner that asks
/// for the same identifier.
pub struct SurvivableLoader<V: Send + 'static> {
    registry: Arc<SlotRegistry<V>>,
    id: OwnerId,
    current: Mutex<Option<Attached>>,
}

/// Slot an owner last attached to
struct Attached {
    identifier: String,
    generation: u64,
}

impl<V: Send + 'static> SurvivableLoader<V> {
    pub(crate) fn new(registry: Arc<SlotRegistry<V>>, id: OwnerId) -> Self {
        Self {
            registry,
            id,
            current: Mutex::new(None),
        }
    }

    pub fn id(&self) -> OwnerId {
        self.id
    }

    /// Identifier of the slot this owner last attached to
    pub fn identifier(&self) -> Option<String> {
        self.current
            .lock()
            .as_ref()
            .map(|attached| attached.identifier.clone())
    }

    /// Check if this owner will receive the result of its current slot
    pub fn is_attached(&self) -> bool {
        self.current
            .lock()
            .as_ref()
            .is_some_and(|attached| self.registry.is_bound(self.id, &attached.identifier))
    }

    /// Start `load` under `identifier`, or adopt the load already registered there
    ///
    /// If a slot exists for `identifier`, `load` is dropped unpolled and this
    /// owner takes over delivery: a finished result is posted to the
    /// dispatcher right away, a running one when it completes. Returns
    /// `false` when the registry is closed or the identifier is empty.
    ///
    /// Being attached elsewhere first detaches from that slot, which is kept
    /// for the next owner.
    #[instrument(skip_all, fields(owner = ?self.id, identifier = tracing::field::Empty))]
    pub fn load_in_background<F, C>(
        &self,
        load: F,
        identifier: impl Into<String>,
        completion: C,
    ) -> bool
    where
        F: Future<Output = Result<V, LoadError>> + Send + 'static,
        C: FnOnce(Result<V, LoadError>) + Send + 'static,
    {
        let identifier = identifier.into();
        tracing::Span::current().record("identifier", identifier.as_str());
        if identifier.is_empty() {
            debug!("Empty identifier rejected");
            return false;
        }

        let mut current = self.current.lock();
        if let Some(previous) = current.as_ref() {
            if previous.identifier != identifier {
                self.registry.detach(
                    self.id,
                    &previous.identifier,
                    previous.generation,
                    Detach::KeepForNext,
                );
            }
        }

        let attach =
            self.registry
                .attach(self.id, &identifier, load.boxed(), Box::new(completion));
        let Some(generation) = attach.generation() else {
            return false;
        };
        *current = Some(Attached {
            identifier,
            generation,
        });
        true
    }

    /// Stop caring about the current load
    ///
    /// The slot is unregistered without cancelling the work; its result is
    /// discarded and a later request for the same identifier starts fresh.
    pub fn delay_for_this(&self) -> bool {
        self.leave(Detach::Discard)
    }

    /// Detach while keeping the slot for the next owner
    pub fn delay_for_next_loader(&self) -> bool {
        self.leave(Detach::KeepForNext)
    }

    /// Cancel the current load; no completion fires
    pub fn interrupt(&self) -> bool {
        self.leave(Detach::Interrupt)
    }

    fn leave(&self, mode: Detach) -> bool {
        match self.current.lock().take() {
            Some(attached) => {
                self.registry
                    .detach(self.id, &attached.identifier, attached.generation, mode)
            }
            None => false,
        }
    }
}

impl<V: Send + 'static> Drop for SurvivableLoader<V> {
    fn drop(&mut self) {
        if let Some(attached) = self.current.get_mut().take() {
            self.registry.detach(
                self.id,
                &attached.identifier,
                attached.generation,
                Detach::KeepForNext,
            );
        }
    }
}

impl<V: Send + 'static> std::fmt::Debug for SurvivableLoader<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SurvivableLoader")
            .field("id", &self.id)
            .field("identifier", &self.identifier())
            .finish()
    }
}
