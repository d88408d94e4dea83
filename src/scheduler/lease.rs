//! Turn leases: one ticket per (channel, avatar, tick).
//!
//! The composite primary key is the only de-duplication mechanism between the
//! ambient sweep and the message fast path inside one epoch. A lease moves
//! `pending -> completed` or `pending -> failed` exactly once; retrying needs a
//! new tick id.

use std::fmt;
use std::sync::Arc;

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use crate::error::Result;
use crate::id::now_ms;
use crate::store::CoordinationStore;

/// Lease lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseStatus {
    Pending,
    Completed,
    Failed,
}

impl LeaseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Which path took the lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseMode {
    Ambient,
    Priority,
    Fastlane,
}

impl LeaseMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ambient => "ambient",
            Self::Priority => "priority",
            Self::Fastlane => "fastlane",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ambient" => Some(Self::Ambient),
            "priority" => Some(Self::Priority),
            "fastlane" => Some(Self::Fastlane),
            _ => None,
        }
    }
}

impl fmt::Display for LeaseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trigger metadata stored with a lease.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaseMeta {
    pub mode: LeaseMode,
    pub message_id: Option<String>,
    pub author_id: Option<String>,
}

impl LeaseMeta {
    pub fn ambient() -> Self {
        Self {
            mode: LeaseMode::Ambient,
            message_id: None,
            author_id: None,
        }
    }

    pub fn for_message(mode: LeaseMode, message_id: &str, author_id: &str) -> Self {
        Self {
            mode,
            message_id: Some(message_id.to_string()),
            author_id: Some(author_id.to_string()),
        }
    }
}

/// A persisted lease row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnLease {
    pub channel_id: String,
    pub avatar_id: String,
    pub tick_id: u64,
    pub status: LeaseStatus,
    pub mode: LeaseMode,
    pub created_at: i64,
    pub lease_expires_at: i64,
    pub message_id: Option<String>,
    pub author_id: Option<String>,
    pub error: Option<String>,
    pub finished_at: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct TurnLeaseRegistry {
    store: Arc<CoordinationStore>,
    ttl_ms: i64,
}

impl TurnLeaseRegistry {
    pub fn new(store: Arc<CoordinationStore>, ttl_ms: i64) -> Self {
        Self { store, ttl_ms }
    }

    /// Try to take the lease. `false` means the avatar is already scheduled in
    /// this epoch.
    pub fn try_lease(&self, channel_id: &str, avatar_id: &str, tick_id: u64, meta: &LeaseMeta, now: i64) -> Result<bool> {
        let inserted = self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT OR IGNORE INTO turn_leases
                    (channel_id, avatar_id, tick_id, status, mode, created_at, lease_expires_at, message_id, author_id)
                VALUES (?1, ?2, ?3, 'pending', ?4, ?5, ?6, ?7, ?8)
                "#,
                params![
                    channel_id,
                    avatar_id,
                    tick_id as i64,
                    meta.mode.as_str(),
                    now,
                    now + self.ttl_ms,
                    meta.message_id,
                    meta.author_id,
                ],
            )
        })?;
        Ok(inserted == 1)
    }

    /// Take the lease and wrap it in a guard that settles it on every exit path.
    pub fn try_acquire(
        &self,
        channel_id: &str,
        avatar_id: &str,
        tick_id: u64,
        meta: &LeaseMeta,
        now: i64,
    ) -> Result<Option<LeaseGuard>> {
        if !self.try_lease(channel_id, avatar_id, tick_id, meta, now)? {
            return Ok(None);
        }
        Ok(Some(LeaseGuard {
            registry: self.clone(),
            channel_id: channel_id.to_string(),
            avatar_id: avatar_id.to_string(),
            tick_id,
            settled: false,
        }))
    }

    /// Mark a pending lease completed. Returns false if it was not pending.
    pub fn complete(&self, channel_id: &str, avatar_id: &str, tick_id: u64) -> Result<bool> {
        self.finish(channel_id, avatar_id, tick_id, LeaseStatus::Completed, None)
    }

    /// Mark a pending lease failed. Returns false if it was not pending.
    pub fn fail(&self, channel_id: &str, avatar_id: &str, tick_id: u64, error: &str) -> Result<bool> {
        self.finish(channel_id, avatar_id, tick_id, LeaseStatus::Failed, Some(error))
    }

    fn finish(
        &self,
        channel_id: &str,
        avatar_id: &str,
        tick_id: u64,
        status: LeaseStatus,
        error: Option<&str>,
    ) -> Result<bool> {
        let updated = self.store.with_conn(|c| {
            c.execute(
                r#"
                UPDATE turn_leases SET status = ?4, error = ?5, finished_at = ?6
                WHERE channel_id = ?1 AND avatar_id = ?2 AND tick_id = ?3 AND status = 'pending'
                "#,
                params![channel_id, avatar_id, tick_id as i64, status.as_str(), error, now_ms()],
            )
        })?;
        Ok(updated == 1)
    }

    pub fn get(&self, channel_id: &str, avatar_id: &str, tick_id: u64) -> Result<Option<TurnLease>> {
        self.store.with_conn(|c| {
            c.query_row(
                r#"
                SELECT channel_id, avatar_id, tick_id, status, mode, created_at, lease_expires_at,
                       message_id, author_id, error, finished_at
                FROM turn_leases WHERE channel_id = ?1 AND avatar_id = ?2 AND tick_id = ?3
                "#,
                params![channel_id, avatar_id, tick_id as i64],
                from_row,
            )
            .optional()
        })
    }

    /// Leases of a channel in one epoch, ordered by avatar id.
    pub fn list_for_tick(&self, channel_id: &str, tick_id: u64) -> Result<Vec<TurnLease>> {
        self.store.with_conn(|c| {
            let mut stmt = c.prepare(
                r#"
                SELECT channel_id, avatar_id, tick_id, status, mode, created_at, lease_expires_at,
                       message_id, author_id, error, finished_at
                FROM turn_leases WHERE channel_id = ?1 AND tick_id = ?2 ORDER BY avatar_id
                "#,
            )?;
            let rows = stmt.query_map(params![channel_id, tick_id as i64], from_row)?;
            rows.collect()
        })
    }

    /// Delete leases whose TTL has passed.
    pub fn purge_expired(&self, now: i64) -> Result<usize> {
        let removed = self
            .store
            .with_conn(|c| c.execute("DELETE FROM turn_leases WHERE lease_expires_at < ?1", [now]))?;
        Ok(removed)
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<TurnLease> {
    let status: String = row.get(3)?;
    let mode: String = row.get(4)?;
    Ok(TurnLease {
        channel_id: row.get(0)?,
        avatar_id: row.get(1)?,
        tick_id: row.get::<_, i64>(2)? as u64,
        status: LeaseStatus::parse(&status).ok_or_else(|| bad_text(3, &status))?,
        mode: LeaseMode::parse(&mode).ok_or_else(|| bad_text(4, &mode))?,
        created_at: row.get(5)?,
        lease_expires_at: row.get(6)?,
        message_id: row.get(7)?,
        author_id: row.get(8)?,
        error: row.get(9)?,
        finished_at: row.get(10)?,
    })
}

fn bad_text(col: usize, value: &str) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(col, Type::Text, format!("unknown lease value {:?}", value).into())
}

/// Held lease that must be settled.
///
/// Dropping the guard without calling [`complete`](Self::complete) or
/// [`fail`](Self::fail) marks the lease failed, so a panic or an early `?`
/// never leaves it pending.
#[derive(Debug)]
pub struct LeaseGuard {
    registry: TurnLeaseRegistry,
    channel_id: String,
    avatar_id: String,
    tick_id: u64,
    settled: bool,
}

impl LeaseGuard {
    pub fn tick_id(&self) -> u64 {
        self.tick_id
    }

    pub fn complete(mut self) -> Result<()> {
        self.settled = true;
        self.registry.complete(&self.channel_id, &self.avatar_id, self.tick_id)?;
        Ok(())
    }

    pub fn fail(mut self, error: &str) -> Result<()> {
        self.settled = true;
        self.registry.fail(&self.channel_id, &self.avatar_id, self.tick_id, error)?;
        Ok(())
    }
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        if let Err(e) = self
            .registry
            .fail(&self.channel_id, &self.avatar_id, self.tick_id, "abandoned")
        {
            log::warn!(
                "Failed to settle abandoned lease {}/{}@{}: {}",
                self.channel_id,
                self.avatar_id,
                self.tick_id,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TurnLeaseRegistry {
        TurnLeaseRegistry::new(Arc::new(CoordinationStore::open_in_memory().unwrap()), 60_000)
    }

    #[test]
    fn test_second_lease_same_key_rejected() {
        let leases = registry();
        assert!(leases.try_lease("c1", "a", 1, &LeaseMeta::ambient(), 100).unwrap());
        assert!(!leases.try_lease("c1", "a", 1, &LeaseMeta::ambient(), 100).unwrap());
        let fast = LeaseMeta::for_message(LeaseMode::Fastlane, "m1", "u1");
        assert!(!leases.try_lease("c1", "a", 1, &fast, 200).unwrap());
    }

    #[test]
    fn test_other_tick_or_avatar_allowed() {
        let leases = registry();
        assert!(leases.try_lease("c1", "a", 1, &LeaseMeta::ambient(), 100).unwrap());
        assert!(leases.try_lease("c1", "a", 2, &LeaseMeta::ambient(), 100).unwrap());
        assert!(leases.try_lease("c1", "b", 1, &LeaseMeta::ambient(), 100).unwrap());
        assert!(leases.try_lease("c2", "a", 1, &LeaseMeta::ambient(), 100).unwrap());
    }

    #[test]
    fn test_lease_row_contents() {
        let leases = registry();
        let meta = LeaseMeta::for_message(LeaseMode::Priority, "m1", "u1");
        leases.try_lease("c1", "a", 3, &meta, 100).unwrap();

        let lease = leases.get("c1", "a", 3).unwrap().unwrap();
        assert_eq!(lease.status, LeaseStatus::Pending);
        assert_eq!(lease.mode, LeaseMode::Priority);
        assert_eq!(lease.lease_expires_at, 60_100);
        assert_eq!(lease.message_id.as_deref(), Some("m1"));
        assert_eq!(lease.author_id.as_deref(), Some("u1"));
    }

    #[test]
    fn test_terminal_transitions_happen_once() {
        let leases = registry();
        leases.try_lease("c1", "a", 1, &LeaseMeta::ambient(), 100).unwrap();

        assert!(leases.complete("c1", "a", 1).unwrap());
        assert!(!leases.fail("c1", "a", 1, "late").unwrap());
        assert!(!leases.complete("c1", "a", 1).unwrap());

        let lease = leases.get("c1", "a", 1).unwrap().unwrap();
        assert_eq!(lease.status, LeaseStatus::Completed);
        assert!(lease.error.is_none());
        assert!(lease.finished_at.is_some());
    }

    #[test]
    fn test_fail_records_error() {
        let leases = registry();
        leases.try_lease("c1", "a", 1, &LeaseMeta::ambient(), 100).unwrap();
        leases.fail("c1", "a", 1, "boom").unwrap();

        let lease = leases.get("c1", "a", 1).unwrap().unwrap();
        assert_eq!(lease.status, LeaseStatus::Failed);
        assert_eq!(lease.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_guard_drop_marks_failed() {
        let leases = registry();
        {
            let guard = leases.try_acquire("c1", "a", 1, &LeaseMeta::ambient(), 100).unwrap();
            assert!(guard.is_some());
        }
        let lease = leases.get("c1", "a", 1).unwrap().unwrap();
        assert_eq!(lease.status, LeaseStatus::Failed);
        assert_eq!(lease.error.as_deref(), Some("abandoned"));
    }

    #[test]
    fn test_guard_complete() {
        let leases = registry();
        let guard = leases
            .try_acquire("c1", "a", 1, &LeaseMeta::ambient(), 100)
            .unwrap()
            .unwrap();
        assert_eq!(guard.tick_id(), 1);
        guard.complete().unwrap();
        assert_eq!(leases.get("c1", "a", 1).unwrap().unwrap().status, LeaseStatus::Completed);

        assert!(leases.try_acquire("c1", "a", 1, &LeaseMeta::ambient(), 100).unwrap().is_none());
    }

    #[test]
    fn test_purge_expired() {
        let leases = registry();
        leases.try_lease("c1", "a", 1, &LeaseMeta::ambient(), 0).unwrap();
        leases.try_lease("c1", "b", 1, &LeaseMeta::ambient(), 50_000).unwrap();

        assert_eq!(leases.purge_expired(70_000).unwrap(), 1);
        assert!(leases.get("c1", "a", 1).unwrap().is_none());
        assert_eq!(leases.list_for_tick("c1", 1).unwrap().len(), 1);
    }
}
