//! Single-consumer dispatch queue
//!
//! Worker tasks never touch caller-owned state directly. They post jobs here
//! and exactly one consumer runs them, in the order they were posted.

use std::panic::{catch_unwind, AssertUnwindSafe};

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, trace, warn};

/// A unit of work to run on the dispatch context
pub type Job = Box<dyn FnOnce() + Send + 'static>;

enum Message {
    Run(Job),
    Flush(oneshot::Sender<()>),
}

/// Handle used to post jobs onto the dispatch context
///
/// Cloning is cheap; every clone feeds the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    tx: mpsc::UnboundedSender<Message>,
}

/// The consuming end of a [`Dispatcher`]
///
/// Exactly one `DispatchQueue` exists per dispatcher. Whoever owns it
/// decides which task acts as the delivery context.
pub struct DispatchQueue {
    rx: mpsc::UnboundedReceiver<Message>,
}

impl Dispatcher {
    /// Create a dispatcher whose queue is drained by the caller
    ///
    /// Use this when an application main loop should own delivery.
    pub fn manual() -> (Self, DispatchQueue) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, DispatchQueue { rx })
    }

    /// Create a dispatcher and drain it on a dedicated task of the current runtime
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn spawn() -> Self {
        let (dispatcher, queue) = Self::manual();
        tokio::spawn(queue.run());
        dispatcher
    }

    /// Post a job to the dispatch context
    ///
    /// Returns `false` if the queue has been dropped; the job is discarded.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        if self.tx.send(Message::Run(Box::new(job))).is_err() {
            warn!("Dispatch queue closed, dropping job");
            return false;
        }
        true
    }

    /// Wait until every job posted before this call has run
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(Message::Flush(tx)).is_err() {
            return;
        }
        let _ = rx.await;
    }

    /// Check if the consuming end is gone
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl DispatchQueue {
    /// Run jobs until every dispatcher handle is dropped
    pub async fn run(mut self) {
        debug!("Dispatch loop started");
        while let Some(message) = self.rx.recv().await {
            Self::handle(message);
        }
        debug!("Dispatch loop exited");
    }

    /// Run every job that is already queued, without waiting for more
    ///
    /// Returns the number of jobs executed.
    pub fn run_pending(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(message) = self.rx.try_recv() {
            if Self::handle(message) {
                ran += 1;
            }
        }
        ran
    }

    fn handle(message: Message) -> bool {
        match message {
            Message::Run(job) => {
                // A failing callback must not take the delivery context down with it
                if catch_unwind(AssertUnwindSafe(job)).is_err() {
                    error!("Dispatched job panicked");
                }
                true
            }
            Message::Flush(done) => {
                trace!("Dispatch flush reached");
                let _ = done.send(());
                false
            }
        }
    }
}
