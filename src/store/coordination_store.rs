//! SQLite connection wrapper and schema for the coordination store.
//!
//! rusqlite's `Connection` isn't `Sync`, so each process holds one behind a
//! `Mutex`. Statements are short, which keeps the critical section tiny.
//! Cross-process exclusion comes from SQLite itself (WAL journal plus a busy
//! timeout), not from this mutex.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{ChorusError, Result};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS presence (
    channel_id TEXT NOT NULL,
    avatar_id TEXT NOT NULL,
    state TEXT NOT NULL,
    last_turn_at INTEGER,
    last_mentioned_at INTEGER,
    last_summoned_at INTEGER,
    new_summon_turns_remaining INTEGER NOT NULL DEFAULT 0,
    priority_pins INTEGER NOT NULL DEFAULT 0,
    topic_tags TEXT NOT NULL DEFAULT '[]',
    conversation_role TEXT,
    cooldown_until INTEGER,
    turns_taken INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (channel_id, avatar_id)
);

CREATE TABLE IF NOT EXISTS tick_counters (
    channel_id TEXT PRIMARY KEY,
    tick_id INTEGER NOT NULL,
    last_tick_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS turn_leases (
    channel_id TEXT NOT NULL,
    avatar_id TEXT NOT NULL,
    tick_id INTEGER NOT NULL,
    status TEXT NOT NULL,
    mode TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    lease_expires_at INTEGER NOT NULL,
    message_id TEXT,
    author_id TEXT,
    error TEXT,
    finished_at INTEGER,
    PRIMARY KEY (channel_id, avatar_id, tick_id)
);
CREATE INDEX IF NOT EXISTS idx_leases_expires ON turn_leases(lease_expires_at);

CREATE TABLE IF NOT EXISTS response_locks (
    channel_id TEXT NOT NULL,
    avatar_id TEXT NOT NULL,
    acquired_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (channel_id, avatar_id)
);

CREATE TABLE IF NOT EXISTS channel_activity (
    channel_id TEXT PRIMARY KEY,
    last_message_at INTEGER NOT NULL,
    last_human_at INTEGER,
    last_bot_at INTEGER,
    last_bot_trigger TEXT
);
CREATE INDEX IF NOT EXISTS idx_activity_recent ON channel_activity(last_message_at);

CREATE TABLE IF NOT EXISTS channel_topics (
    channel_id TEXT PRIMARY KEY,
    topics TEXT NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS human_activity (
    channel_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    last_seen_at INTEGER NOT NULL,
    PRIMARY KEY (channel_id, user_id)
);

CREATE TABLE IF NOT EXISTS avatar_messages (
    message_id TEXT PRIMARY KEY,
    channel_id TEXT NOT NULL,
    avatar_id TEXT NOT NULL,
    sent_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS trigger_responders (
    trigger_key TEXT NOT NULL,
    avatar_id TEXT NOT NULL,
    channel_id TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (trigger_key, avatar_id)
);
CREATE INDEX IF NOT EXISTS idx_responders_created ON trigger_responders(created_at);

CREATE TABLE IF NOT EXISTS conversation_threads (
    thread_id TEXT PRIMARY KEY,
    channel_id TEXT NOT NULL,
    participants TEXT NOT NULL,
    last_speaker TEXT,
    turns_remaining INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_threads_channel ON conversation_threads(channel_id);

CREATE TABLE IF NOT EXISTS conversation_sessions (
    channel_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    avatar_id TEXT NOT NULL,
    started_at INTEGER NOT NULL,
    last_activity_at INTEGER NOT NULL,
    turns INTEGER NOT NULL,
    PRIMARY KEY (channel_id, user_id)
);

CREATE TABLE IF NOT EXISTS affinities (
    channel_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    avatar_id TEXT NOT NULL,
    expires_at INTEGER NOT NULL,
    PRIMARY KEY (channel_id, user_id)
);
"#;

/// Shared coordination store backed by SQLite.
pub struct CoordinationStore {
    /// Database file (None for in-memory stores)
    path: Option<PathBuf>,

    /// Connection for this process
    db: Mutex<Connection>,
}

impl std::fmt::Debug for CoordinationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoordinationStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl CoordinationStore {
    /// Open or create a store at the given database file.
    ///
    /// Creates parent directories as needed. Other processes may open the same
    /// file; WAL mode lets readers proceed while a writer holds the lock.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let db = Connection::open(path)?;
        db.busy_timeout(BUSY_TIMEOUT)?;
        db.pragma_update(None, "journal_mode", "WAL")?;
        db.pragma_update(None, "synchronous", "NORMAL")?;
        Self::init_schema(&db)?;

        log::debug!("Opened coordination store at {}", path.display());

        Ok(Self {
            path: Some(path.to_path_buf()),
            db: Mutex::new(db),
        })
    }

    /// Open a private in-memory store.
    ///
    /// Only useful within a single process (tests, embedded single-instance use).
    pub fn open_in_memory() -> Result<Self> {
        let db = Connection::open_in_memory()?;
        Self::init_schema(&db)?;
        Ok(Self {
            path: None,
            db: Mutex::new(db),
        })
    }

    /// Initialize the SQLite schema.
    fn init_schema(db: &Connection) -> Result<()> {
        db.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Database file backing this store, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|e| ChorusError::Storage(e.to_string()))
    }

    /// Run a closure against the connection.
    ///
    /// Each statement inside runs atomically on its own; use [`with_tx`] when
    /// a read must be followed by a dependent write.
    ///
    /// [`with_tx`]: CoordinationStore::with_tx
    pub fn with_conn<T>(&self, f: impl FnOnce(&Connection) -> rusqlite::Result<T>) -> Result<T> {
        let conn = self.lock()?;
        Ok(f(&conn)?)
    }

    /// Run a closure inside an IMMEDIATE transaction.
    ///
    /// IMMEDIATE takes the database write lock up front, so check-then-insert
    /// sequences are serialized across processes, not just within this one.
    pub fn with_tx<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_database_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("chorus.db");
        let store = CoordinationStore::open(&path).unwrap();

        assert!(path.exists());
        assert_eq!(store.path(), Some(path.as_path()));
    }

    #[test]
    fn test_schema_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chorus.db");
        {
            let _store = CoordinationStore::open(&path).unwrap();
        }
        // Reopening runs CREATE IF NOT EXISTS again
        let store = CoordinationStore::open(&path).unwrap();
        let count: i64 = store
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM turn_leases", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_in_memory_has_no_path() {
        let store = CoordinationStore::open_in_memory().unwrap();
        assert!(store.path().is_none());
    }

    #[test]
    fn test_transaction_rolls_back_on_error() {
        let store = CoordinationStore::open_in_memory().unwrap();

        let result: Result<()> = store.with_tx(|tx| {
            tx.execute(
                "INSERT INTO tick_counters (channel_id, tick_id, last_tick_at) VALUES ('c1', 1, 0)",
                [],
            )?;
            Err(ChorusError::Storage("abort".to_string()))
        });
        assert!(result.is_err());

        let count: i64 = store
            .with_conn(|c| c.query_row("SELECT COUNT(*) FROM tick_counters", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_two_handles_share_one_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("chorus.db");
        let a = CoordinationStore::open(&path).unwrap();
        let b = CoordinationStore::open(&path).unwrap();

        a.with_conn(|c| {
            c.execute(
                "INSERT INTO tick_counters (channel_id, tick_id, last_tick_at) VALUES ('c1', 3, 0)",
                [],
            )
        })
        .unwrap();

        let tick: i64 = b
            .with_conn(|c| c.query_row("SELECT tick_id FROM tick_counters WHERE channel_id = 'c1'", [], |r| r.get(0)))
            .unwrap();
        assert_eq!(tick, 3);
    }
}
