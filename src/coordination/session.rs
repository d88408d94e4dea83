//! Conversation sessions: which avatar a human is currently talking to.

use std::sync::Arc;

use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::store::CoordinationStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSession {
    pub channel_id: String,
    pub user_id: String,
    pub avatar_id: String,
    pub started_at: i64,
    pub last_activity_at: i64,
    pub turns: u32,
}

#[derive(Debug, Clone)]
pub struct SessionStore {
    store: Arc<CoordinationStore>,
}

impl SessionStore {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    /// Record a response to `user_id` by `avatar_id`. Switching avatars
    /// restarts the session.
    pub fn upsert(&self, channel_id: &str, user_id: &str, avatar_id: &str, now: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO conversation_sessions (channel_id, user_id, avatar_id, started_at, last_activity_at, turns)
                VALUES (?1, ?2, ?3, ?4, ?4, 1)
                ON CONFLICT(channel_id, user_id) DO UPDATE SET
                    started_at = CASE WHEN avatar_id = excluded.avatar_id THEN started_at ELSE excluded.started_at END,
                    turns = CASE WHEN avatar_id = excluded.avatar_id THEN turns + 1 ELSE 1 END,
                    avatar_id = excluded.avatar_id,
                    last_activity_at = excluded.last_activity_at
                "#,
                params![channel_id, user_id, avatar_id, now],
            )
        })?;
        Ok(())
    }

    pub fn get(&self, channel_id: &str, user_id: &str) -> Result<Option<ConversationSession>> {
        self.store.with_conn(|c| {
            c.query_row(
                r#"
                SELECT channel_id, user_id, avatar_id, started_at, last_activity_at, turns
                FROM conversation_sessions WHERE channel_id = ?1 AND user_id = ?2
                "#,
                params![channel_id, user_id],
                |row| {
                    Ok(ConversationSession {
                        channel_id: row.get(0)?,
                        user_id: row.get(1)?,
                        avatar_id: row.get(2)?,
                        started_at: row.get(3)?,
                        last_activity_at: row.get(4)?,
                        turns: row.get(5)?,
                    })
                },
            )
            .optional()
        })
    }

    /// Drop sessions idle since before `before`.
    pub fn purge_idle(&self, before: i64) -> Result<usize> {
        let removed = self.store.with_conn(|c| {
            c.execute("DELETE FROM conversation_sessions WHERE last_activity_at < ?1", [before])
        })?;
        Ok(removed)
    }
}
