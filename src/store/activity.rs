//! Channel activity bookkeeping.
//!
//! Tracks when channels last saw traffic, which humans spoke recently, and
//! which avatar sent which platform message. The ambient sweep uses this to
//! pick channels and size its per-channel budget; the coordinator uses it to
//! attribute replies.

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::{OptionalExtension, params};

use crate::error::Result;
use crate::store::CoordinationStore;

/// Activity summary for one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelActivity {
    pub channel_id: String,
    pub last_message_at: i64,
    pub last_human_at: Option<i64>,
    pub last_bot_at: Option<i64>,
    /// Trigger key of the most recent bot output.
    pub last_bot_trigger: Option<String>,
}

/// Reads and writes channel/human/avatar-message activity rows.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    store: Arc<CoordinationStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    /// Record a human message: bumps channel recency, the human timestamp
    /// (suppression window) and the sender's last-seen time.
    pub fn record_human_message(&self, channel_id: &str, user_id: &str, at: i64) -> Result<()> {
        self.store.with_tx(|tx| {
            tx.execute(
                r#"
                INSERT INTO channel_activity (channel_id, last_message_at, last_human_at)
                VALUES (?1, ?2, ?2)
                ON CONFLICT(channel_id) DO UPDATE SET
                    last_message_at = MAX(last_message_at, excluded.last_message_at),
                    last_human_at = MAX(COALESCE(last_human_at, 0), excluded.last_human_at)
                "#,
                params![channel_id, at],
            )?;
            tx.execute(
                r#"
                INSERT INTO human_activity (channel_id, user_id, last_seen_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(channel_id, user_id) DO UPDATE SET
                    last_seen_at = MAX(last_seen_at, excluded.last_seen_at)
                "#,
                params![channel_id, user_id, at],
            )?;
            Ok(())
        })
    }

    /// Record bot output produced for `trigger_key` (feeds the channel-wide
    /// cooldown, which ignores outputs for the same trigger).
    pub fn record_bot_output(&self, channel_id: &str, trigger_key: &str, at: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO channel_activity (channel_id, last_message_at, last_bot_at, last_bot_trigger)
                VALUES (?1, ?2, ?2, ?3)
                ON CONFLICT(channel_id) DO UPDATE SET
                    last_message_at = MAX(last_message_at, excluded.last_message_at),
                    last_bot_trigger = CASE
                        WHEN COALESCE(last_bot_at, 0) <= excluded.last_bot_at THEN excluded.last_bot_trigger
                        ELSE last_bot_trigger
                    END,
                    last_bot_at = MAX(COALESCE(last_bot_at, 0), excluded.last_bot_at)
                "#,
                params![channel_id, at, trigger_key],
            )
        })?;
        Ok(())
    }

    /// Replace the topics a channel is currently about.
    pub fn set_channel_topics(&self, channel_id: &str, topics: &BTreeSet<String>, at: i64) -> Result<()> {
        let json = serde_json::to_string(topics)?;
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO channel_topics (channel_id, topics, updated_at)
                VALUES (?1, ?2, ?3)
                ON CONFLICT(channel_id) DO UPDATE SET
                    topics = excluded.topics,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, json, at],
            )
        })?;
        Ok(())
    }

    /// Topics set for a channel; empty when none were set.
    pub fn channel_topics(&self, channel_id: &str) -> Result<BTreeSet<String>> {
        let json: Option<String> = self.store.with_conn(|c| {
            c.query_row(
                "SELECT topics FROM channel_topics WHERE channel_id = ?1",
                [channel_id],
                |row| row.get(0),
            )
            .optional()
        })?;
        match json {
            Some(json) => Ok(serde_json::from_str(&json)?),
            None => Ok(BTreeSet::new()),
        }
    }

    /// Get the activity row for a channel.
    pub fn get(&self, channel_id: &str) -> Result<Option<ChannelActivity>> {
        self.store.with_conn(|c| {
            c.query_row(
                "SELECT channel_id, last_message_at, last_human_at, last_bot_at, last_bot_trigger FROM channel_activity WHERE channel_id = ?1",
                [channel_id],
                |row| {
                    Ok(ChannelActivity {
                        channel_id: row.get(0)?,
                        last_message_at: row.get(1)?,
                        last_human_at: row.get(2)?,
                        last_bot_at: row.get(3)?,
                        last_bot_trigger: row.get(4)?,
                    })
                },
            )
            .optional()
        })
    }

    /// The `limit` most recently active channels, newest first.
    pub fn recent_channels(&self, limit: usize) -> Result<Vec<String>> {
        self.store.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT channel_id FROM channel_activity ORDER BY last_message_at DESC, channel_id ASC LIMIT ?1",
            )?;
            let rows = stmt.query_map([limit as i64], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    /// Distinct human senders seen in a channel at or after `since`.
    pub fn active_humans(&self, channel_id: &str, since: i64) -> Result<usize> {
        let count: i64 = self.store.with_conn(|c| {
            c.query_row(
                "SELECT COUNT(*) FROM human_activity WHERE channel_id = ?1 AND last_seen_at >= ?2",
                params![channel_id, since],
                |row| row.get(0),
            )
        })?;
        Ok(count as usize)
    }

    /// Remember that `avatar_id` sent platform message `message_id`.
    pub fn record_avatar_message(&self, message_id: &str, channel_id: &str, avatar_id: &str, at: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                "INSERT OR REPLACE INTO avatar_messages (message_id, channel_id, avatar_id, sent_at) VALUES (?1, ?2, ?3, ?4)",
                params![message_id, channel_id, avatar_id, at],
            )
        })?;
        Ok(())
    }

    /// Which avatar sent a platform message, if it was one of ours.
    pub fn avatar_for_message(&self, message_id: &str) -> Result<Option<String>> {
        self.store.with_conn(|c| {
            c.query_row(
                "SELECT avatar_id FROM avatar_messages WHERE message_id = ?1",
                [message_id],
                |row| row.get(0),
            )
            .optional()
        })
    }

    /// Forget human senders not seen since `before`.
    pub fn purge_human_activity(&self, before: i64) -> Result<usize> {
        let removed = self
            .store
            .with_conn(|c| c.execute("DELETE FROM human_activity WHERE last_seen_at < ?1", [before]))?;
        Ok(removed)
    }

    /// Drop avatar-message attributions older than `before`.
    pub fn purge_avatar_messages(&self, before: i64) -> Result<usize> {
        let removed = self
            .store
            .with_conn(|c| c.execute("DELETE FROM avatar_messages WHERE sent_at < ?1", [before]))?;
        Ok(removed)
    }
}
