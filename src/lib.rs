//! Chorus - turn scheduling and response coordination for multi-avatar channels
//!
//! Decides which avatars speak in a shared channel, in what order and when.
//! Triggers are human messages, periodic ambient ticks and avatar-to-avatar
//! mentions. All coordination state lives in one SQLite store so several
//! processes can schedule the same channels without duplicate turns.

pub mod collaborators;
pub mod config;
pub mod coordination;
pub mod engine;
pub mod error;
pub mod id;
pub mod presence;
pub mod scheduler;
pub mod store;

pub use engine::{Engine, EngineHandle};
pub use error::{ChorusError, Result};
