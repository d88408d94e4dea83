//! Multi-turn avatar threads.
//!
//! A mention cascade opens a thread between the speaker and the avatar it
//! named. While the thread has turns left, the next participant after the
//! last speaker (round robin) gets the continuation tier. One open thread per
//! channel: opening a new one replaces the old.

use std::sync::Arc;

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use crate::error::Result;
use crate::id::generate_thread_id;
use crate::store::CoordinationStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationThread {
    /// Also the continuation token handed to the generator.
    pub thread_id: String,
    pub channel_id: String,
    pub participants: Vec<String>,
    pub last_speaker: Option<String>,
    pub turns_remaining: u32,
    pub created_at: i64,
    pub expires_at: i64,
}

impl ConversationThread {
    pub fn is_open(&self, now: i64) -> bool {
        self.turns_remaining > 0 && self.expires_at > now
    }

    /// Participant due to speak next, never the last speaker.
    pub fn next_participant(&self) -> Option<&str> {
        let first = self.participants.first()?;
        let next = match &self.last_speaker {
            None => first,
            Some(last) => match self.participants.iter().position(|p| p == last) {
                Some(i) => &self.participants[(i + 1) % self.participants.len()],
                None => first,
            },
        };
        if self.last_speaker.as_deref() == Some(next.as_str()) {
            return None;
        }
        Some(next)
    }
}

#[derive(Debug, Clone)]
pub struct ThreadRegistry {
    store: Arc<CoordinationStore>,
    turns: u32,
    ttl_ms: i64,
}

const COLUMNS: &str = "thread_id, channel_id, participants, last_speaker, turns_remaining, created_at, expires_at";

impl ThreadRegistry {
    pub fn new(store: Arc<CoordinationStore>, turns: u32, ttl_ms: i64) -> Self {
        Self { store, turns, ttl_ms }
    }

    /// Open a thread, replacing any other thread in the channel.
    pub fn open(
        &self,
        channel_id: &str,
        participants: &[String],
        last_speaker: Option<&str>,
        now: i64,
    ) -> Result<ConversationThread> {
        let thread = ConversationThread {
            thread_id: generate_thread_id(),
            channel_id: channel_id.to_string(),
            participants: participants.to_vec(),
            last_speaker: last_speaker.map(String::from),
            turns_remaining: self.turns,
            created_at: now,
            expires_at: now + self.ttl_ms,
        };
        let participants_json = serde_json::to_string(&thread.participants)?;

        self.store.with_tx(|tx| {
            tx.execute("DELETE FROM conversation_threads WHERE channel_id = ?1", [channel_id])?;
            tx.execute(
                &format!("INSERT INTO conversation_threads ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"),
                params![
                    thread.thread_id,
                    thread.channel_id,
                    participants_json,
                    thread.last_speaker,
                    thread.turns_remaining,
                    thread.created_at,
                    thread.expires_at,
                ],
            )?;
            Ok(())
        })?;

        log::debug!(
            "Opened thread {} in {} for {:?}",
            thread.thread_id,
            channel_id,
            thread.participants
        );
        Ok(thread)
    }

    /// The channel's open thread, if any.
    pub fn active(&self, channel_id: &str, now: i64) -> Result<Option<ConversationThread>> {
        self.store.with_conn(|c| {
            c.query_row(
                &format!(
                    "SELECT {COLUMNS} FROM conversation_threads \
                     WHERE channel_id = ?1 AND turns_remaining > 0 AND expires_at > ?2 \
                     ORDER BY created_at DESC LIMIT 1"
                ),
                params![channel_id, now],
                from_row,
            )
            .optional()
        })
    }

    pub fn get(&self, thread_id: &str) -> Result<Option<ConversationThread>> {
        self.store.with_conn(|c| {
            c.query_row(
                &format!("SELECT {COLUMNS} FROM conversation_threads WHERE thread_id = ?1"),
                [thread_id],
                from_row,
            )
            .optional()
        })
    }

    /// Consume one turn and extend the thread's TTL. Returns false if the
    /// thread is gone or out of turns.
    pub fn record_turn(&self, thread_id: &str, speaker: &str, now: i64) -> Result<bool> {
        let updated = self.store.with_conn(|c| {
            c.execute(
                r#"
                UPDATE conversation_threads
                SET last_speaker = ?2, turns_remaining = turns_remaining - 1, expires_at = ?3
                WHERE thread_id = ?1 AND turns_remaining > 0
                "#,
                params![thread_id, speaker, now + self.ttl_ms],
            )
        })?;
        Ok(updated == 1)
    }

    pub fn close(&self, thread_id: &str) -> Result<()> {
        self.store
            .with_conn(|c| c.execute("DELETE FROM conversation_threads WHERE thread_id = ?1", [thread_id]))?;
        Ok(())
    }

    /// Delete expired and exhausted threads.
    pub fn purge(&self, now: i64) -> Result<usize> {
        let removed = self.store.with_conn(|c| {
            c.execute(
                "DELETE FROM conversation_threads WHERE expires_at <= ?1 OR turns_remaining <= 0",
                [now],
            )
        })?;
        Ok(removed)
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<ConversationThread> {
    let participants: String = row.get(2)?;
    Ok(ConversationThread {
        thread_id: row.get(0)?,
        channel_id: row.get(1)?,
        participants: serde_json::from_str(&participants)
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?,
        last_speaker: row.get(3)?,
        turns_remaining: row.get(4)?,
        created_at: row.get(5)?,
        expires_at: row.get(6)?,
    })
}
