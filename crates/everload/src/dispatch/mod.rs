//! Single logical delivery context
//!
//! Every completion produced by the pool, the slot registry and the pager is
//! marshaled through a [`Dispatcher`] and executed by one consumer.

mod queue;

pub use queue::{DispatchQueue, Dispatcher, Job};
