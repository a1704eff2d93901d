//! Survivable loads
//!
//! This module provides:
//! - [`SlotRegistry`] - Keeps loads alive across owner lifetimes, keyed by identifier
//! - [`SurvivableLoader`] - Per-owner handle to start, adopt, detach or interrupt a load
//!
//! # Lifecycle
//!
//! ```text
//!   owner A                       registry                     owner B
//!   load_in_background("id") ──► slot created, work spawned
//!   drop / delay_for_next_loader ─► slot unowned
//!                                 work finishes ─► result buffered
//!                                                ◄── load_in_background("id")
//!                                 slot removed ───────────────► completion(result)
//! ```

mod owner;
mod registry;

pub use owner::SurvivableLoader;
pub use registry::{OwnerId, SlotCompletion, SlotRegistry};
