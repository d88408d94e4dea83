//! Short-TTL in-flight mutex per (channel, avatar).
//!
//! Acquisition is a conditional insert, so at most one row exists per key.
//! Expired rows are left in place until the janitor removes them; a crashed
//! holder therefore blocks the avatar for at most TTL + janitor interval.

use std::sync::Arc;

use rusqlite::params;

use crate::error::Result;
use crate::store::CoordinationStore;

#[derive(Debug, Clone)]
pub struct ResponseLock {
    store: Arc<CoordinationStore>,
    ttl_ms: i64,
}

impl ResponseLock {
    pub fn new(store: Arc<CoordinationStore>, ttl_ms: i64) -> Self {
        Self { store, ttl_ms }
    }

    /// Try to take the lock. `false` means another generation is in flight;
    /// the caller skips rather than retries.
    pub fn acquire(&self, channel_id: &str, avatar_id: &str, now: i64) -> Result<bool> {
        let inserted = self.store.with_conn(|c| {
            c.execute(
                "INSERT OR IGNORE INTO response_locks (channel_id, avatar_id, acquired_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
                params![channel_id, avatar_id, now, now + self.ttl_ms],
            )
        })?;
        Ok(inserted == 1)
    }

    /// Take the lock and release it when the guard drops.
    pub fn try_guard(&self, channel_id: &str, avatar_id: &str, now: i64) -> Result<Option<LockGuard>> {
        if !self.acquire(channel_id, avatar_id, now)? {
            return Ok(None);
        }
        Ok(Some(LockGuard {
            lock: self.clone(),
            channel_id: channel_id.to_string(),
            avatar_id: avatar_id.to_string(),
        }))
    }

    /// Unconditional delete.
    pub fn release(&self, channel_id: &str, avatar_id: &str) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                "DELETE FROM response_locks WHERE channel_id = ?1 AND avatar_id = ?2",
                params![channel_id, avatar_id],
            )
        })?;
        Ok(())
    }

    pub fn is_held(&self, channel_id: &str, avatar_id: &str) -> Result<bool> {
        let count: i64 = self.store.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*) FROM response_locks WHERE channel_id = ?1 AND avatar_id = ?2",
                params![channel_id, avatar_id],
                |row| row.get(0),
            )
        })?;
        Ok(count > 0)
    }

    /// Delete locks whose TTL has passed.
    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        let removed = self
            .store
            .with_conn(|c| c.execute("DELETE FROM response_locks WHERE expires_at < ?1", [now]))?;
        Ok(removed)
    }
}

/// Releases the lock on drop.
#[derive(Debug)]
pub struct LockGuard {
    lock: ResponseLock,
    channel_id: String,
    avatar_id: String,
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release(&self.channel_id, &self.avatar_id) {
            log::warn!("Failed to release response lock {}/{}: {}", self.channel_id, self.avatar_id, e);
        }
    }
}
