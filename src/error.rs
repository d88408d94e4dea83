//! Error types for Chorus
//!
//! Centralized error handling using thiserror. Contention (a lease or lock that
//! is already held) is never an error; it is reported as `false` by the
//! primitives that detect it.

use thiserror::Error;

/// All error types that can occur in Chorus
#[derive(Debug, Error)]
pub enum ChorusError {
    /// Coordination store failure (poisoned mutex, missing row, bad state)
    #[error("Storage error: {0}")]
    Storage(String),

    /// SQLite error from the coordination store
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Generation service failed for an avatar
    #[error("Generation error: {0}")]
    Generation(String),

    /// Messaging transport failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Identity store failure
    #[error("Identity error: {0}")]
    Identity(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for Chorus operations
pub type Result<T> = std::result::Result<T, ChorusError>;
