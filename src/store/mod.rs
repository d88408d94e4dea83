//! Shared coordination store for Chorus.
//!
//! Every piece of scheduling state (ticks, leases, locks, presence, activity)
//! lives in one SQLite database. De-duplication relies on the database's
//! uniqueness constraints and single-statement atomicity, never on in-process
//! locks, so several processes may open the same file concurrently.
//!
//! # Example
//!
//! ```ignore
//! use chorus::store::CoordinationStore;
//! use std::sync::Arc;
//!
//! let store = Arc::new(CoordinationStore::open(Path::new("/var/lib/chorus/chorus.db"))?);
//! let activity = ActivityLog::new(store.clone());
//! activity.record_human_message("channel-1", "user-7", now_ms())?;
//! ```

mod activity;
mod coordination_store;

pub use activity::{ActivityLog, ChannelActivity};
pub use coordination_store::CoordinationStore;
