//! Per-channel scheduling epochs.
//!
//! Ambient sweeps `advance` to open a fresh epoch; message fast paths `peek`
//! so they lease inside the epoch the sweep is already using. Both operations
//! are single SQLite statements, so concurrent processes never observe a
//! duplicated or skipped tick id.

use std::sync::Arc;

use rusqlite::params;

use crate::error::Result;
use crate::store::CoordinationStore;

#[derive(Debug, Clone)]
pub struct TickCounter {
    store: Arc<CoordinationStore>,
}

impl TickCounter {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    /// Atomically increment and return the new epoch id.
    ///
    /// A missing counter is created at 0, so the first advance returns 1.
    pub fn advance(&self, channel_id: &str, now: i64) -> Result<u64> {
        let tick: i64 = self.store.with_conn(|c| {
            c.query_row(
                r#"
                INSERT INTO tick_counters (channel_id, tick_id, last_tick_at)
                VALUES (?1, 1, ?2)
                ON CONFLICT(channel_id) DO UPDATE SET
                    tick_id = tick_id + 1,
                    last_tick_at = excluded.last_tick_at
                RETURNING tick_id
                "#,
                params![channel_id, now],
                |row| row.get(0),
            )
        })?;
        Ok(tick as u64)
    }

    /// Current epoch id, initializing the counter to 0 if absent.
    pub fn peek(&self, channel_id: &str, now: i64) -> Result<u64> {
        let tick: i64 = self.store.with_conn(|c| {
            c.execute(
                "INSERT OR IGNORE INTO tick_counters (channel_id, tick_id, last_tick_at) VALUES (?1, 0, ?2)",
                params![channel_id, now],
            )?;
            c.query_row(
                "SELECT tick_id FROM tick_counters WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )
        })?;
        Ok(tick as u64)
    }
}
