//! Turn scheduling: epochs, leases and the ambient sweep.
//!
//! This module provides:
//! - **Tick counter**: per-channel epochs. Ambient sweeps advance them, message
//!   fast paths peek them.
//! - **Turn leases**: at most one turn per `(channel, avatar, tick)`, shared by
//!   the ambient sweep and the fast path.
//! - **Ambient scheduler**: periodic jittered sweep over the most recently
//!   active channels under a global budget.
//!
//! # Example
//!
//! ```ignore
//! use chorus::scheduler::{TickCounter, TurnLeaseRegistry, LeaseMeta};
//!
//! let ticks = TickCounter::new(store.clone());
//! let leases = TurnLeaseRegistry::new(store, 600_000);
//!
//! let tick = ticks.advance("channel-1", now_ms())?;
//! if let Some(lease) = leases.try_acquire("channel-1", "ada", tick, &LeaseMeta::ambient(), now_ms())? {
//!     // generate, then settle
//!     lease.complete()?;
//! }
//! ```

mod ambient;
mod lease;
mod tick;

pub use ambient::{AmbientScheduler, ambient_k};
pub use lease::{LeaseGuard, LeaseMeta, LeaseMode, LeaseStatus, TurnLease, TurnLeaseRegistry};
pub use tick::TickCounter;
