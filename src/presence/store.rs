//! Presence persistence.
//!
//! Records are created lazily (`ensure`) and never deleted. Every mutation is
//! a single upsert or guarded UPDATE so concurrent writers from other
//! processes cannot lose each other's changes.

use std::collections::BTreeSet;
use std::sync::Arc;

use rusqlite::types::Type;
use rusqlite::{OptionalExtension, Row, params};

use crate::error::Result;
use crate::presence::record::{ConversationRole, PresenceRecord, PresenceState};
use crate::store::CoordinationStore;

const COLUMNS: &str = "channel_id, avatar_id, state, last_turn_at, last_mentioned_at, last_summoned_at, \
    new_summon_turns_remaining, priority_pins, topic_tags, conversation_role, cooldown_until, turns_taken, updated_at";

/// Presence rows for all (channel, avatar) pairs.
#[derive(Debug, Clone)]
pub struct PresenceStore {
    store: Arc<CoordinationStore>,
}

impl PresenceStore {
    pub fn new(store: Arc<CoordinationStore>) -> Self {
        Self { store }
    }

    /// Get the record for an avatar in a channel, creating it as present if
    /// this is the first sighting.
    pub fn ensure(&self, channel_id: &str, avatar_id: &str, now: i64) -> Result<PresenceRecord> {
        self.store.with_conn(|c| {
            c.execute(
                "INSERT OR IGNORE INTO presence (channel_id, avatar_id, state, updated_at) VALUES (?1, ?2, 'present', ?3)",
                params![channel_id, avatar_id, now],
            )?;
            c.query_row(
                &format!("SELECT {COLUMNS} FROM presence WHERE channel_id = ?1 AND avatar_id = ?2"),
                params![channel_id, avatar_id],
                from_row,
            )
        })
    }

    /// Get a record without creating it.
    pub fn get(&self, channel_id: &str, avatar_id: &str) -> Result<Option<PresenceRecord>> {
        self.store.with_conn(|c| {
            c.query_row(
                &format!("SELECT {COLUMNS} FROM presence WHERE channel_id = ?1 AND avatar_id = ?2"),
                params![channel_id, avatar_id],
                from_row,
            )
            .optional()
        })
    }

    /// All records for a channel, ordered by avatar id.
    pub fn list_for_channel(&self, channel_id: &str) -> Result<Vec<PresenceRecord>> {
        self.store.with_conn(|c| {
            let mut stmt =
                c.prepare(&format!("SELECT {COLUMNS} FROM presence WHERE channel_id = ?1 ORDER BY avatar_id"))?;
            let rows = stmt.query_map([channel_id], from_row)?;
            rows.collect()
        })
    }

    /// Present records for a channel.
    pub fn list_present(&self, channel_id: &str) -> Result<Vec<PresenceRecord>> {
        Ok(self
            .list_for_channel(channel_id)?
            .into_iter()
            .filter(PresenceRecord::is_present)
            .collect())
    }

    /// Record a completed turn: stamps `last_turn_at`, starts the avatar's
    /// cooldown and bumps its turn count.
    pub fn record_turn(&self, channel_id: &str, avatar_id: &str, at: i64, cooldown_ms: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO presence (channel_id, avatar_id, state, last_turn_at, cooldown_until, turns_taken, updated_at)
                VALUES (?1, ?2, 'present', ?3, ?4, 1, ?3)
                ON CONFLICT(channel_id, avatar_id) DO UPDATE SET
                    state = 'present',
                    last_turn_at = excluded.last_turn_at,
                    cooldown_until = excluded.cooldown_until,
                    turns_taken = turns_taken + 1,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, avatar_id, at, at + cooldown_ms],
            )
        })?;
        Ok(())
    }

    /// Record that the avatar was mentioned.
    pub fn record_mention(&self, channel_id: &str, avatar_id: &str, at: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO presence (channel_id, avatar_id, state, last_mentioned_at, updated_at)
                VALUES (?1, ?2, 'present', ?3, ?3)
                ON CONFLICT(channel_id, avatar_id) DO UPDATE SET
                    last_mentioned_at = excluded.last_mentioned_at,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, avatar_id, at],
            )
        })?;
        Ok(())
    }

    /// Grant `turns` guaranteed turns to a freshly summoned avatar.
    pub fn grant_summon(&self, channel_id: &str, avatar_id: &str, turns: u32, at: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO presence (channel_id, avatar_id, state, last_summoned_at, new_summon_turns_remaining, updated_at)
                VALUES (?1, ?2, 'present', ?3, ?4, ?3)
                ON CONFLICT(channel_id, avatar_id) DO UPDATE SET
                    state = 'present',
                    last_summoned_at = excluded.last_summoned_at,
                    new_summon_turns_remaining = excluded.new_summon_turns_remaining,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, avatar_id, at, turns],
            )
        })?;
        Ok(())
    }

    /// Spend one summon credit. Returns false when none was left, including
    /// when a concurrent caller spent the last one first.
    pub fn consume_summon(&self, channel_id: &str, avatar_id: &str) -> Result<bool> {
        let changed = self.store.with_conn(|c| {
            c.execute(
                r#"
                UPDATE presence SET new_summon_turns_remaining = new_summon_turns_remaining - 1
                WHERE channel_id = ?1 AND avatar_id = ?2 AND new_summon_turns_remaining > 0
                "#,
                params![channel_id, avatar_id],
            )
        })?;
        Ok(changed == 1)
    }

    /// Assign or clear a role. A channel has at most one active speaker.
    pub fn set_role(&self, channel_id: &str, avatar_id: &str, role: Option<ConversationRole>, at: i64) -> Result<()> {
        self.store.with_tx(|tx| {
            if role == Some(ConversationRole::ActiveSpeaker) {
                tx.execute(
                    "UPDATE presence SET conversation_role = NULL WHERE channel_id = ?1 AND conversation_role = 'active_speaker'",
                    [channel_id],
                )?;
            }
            tx.execute(
                r#"
                INSERT INTO presence (channel_id, avatar_id, state, conversation_role, updated_at)
                VALUES (?1, ?2, 'present', ?3, ?4)
                ON CONFLICT(channel_id, avatar_id) DO UPDATE SET
                    conversation_role = excluded.conversation_role,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, avatar_id, role.map(|r| r.as_str()), at],
            )?;
            Ok(())
        })
    }

    /// Add one priority pin.
    pub fn add_pin(&self, channel_id: &str, avatar_id: &str, at: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO presence (channel_id, avatar_id, state, priority_pins, updated_at)
                VALUES (?1, ?2, 'present', 1, ?3)
                ON CONFLICT(channel_id, avatar_id) DO UPDATE SET
                    priority_pins = priority_pins + 1,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, avatar_id, at],
            )
        })?;
        Ok(())
    }

    /// Remove all priority pins.
    pub fn clear_pins(&self, channel_id: &str, avatar_id: &str) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                "UPDATE presence SET priority_pins = 0 WHERE channel_id = ?1 AND avatar_id = ?2",
                params![channel_id, avatar_id],
            )
        })?;
        Ok(())
    }

    /// Replace the avatar's topic tags.
    pub fn set_topics(&self, channel_id: &str, avatar_id: &str, tags: &BTreeSet<String>, at: i64) -> Result<()> {
        let json = serde_json::to_string(tags)?;
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO presence (channel_id, avatar_id, state, topic_tags, updated_at)
                VALUES (?1, ?2, 'present', ?3, ?4)
                ON CONFLICT(channel_id, avatar_id) DO UPDATE SET
                    topic_tags = excluded.topic_tags,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, avatar_id, json, at],
            )
        })?;
        Ok(())
    }

    /// Mark an avatar present or absent.
    pub fn set_state(&self, channel_id: &str, avatar_id: &str, state: PresenceState, at: i64) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                r#"
                INSERT INTO presence (channel_id, avatar_id, state, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(channel_id, avatar_id) DO UPDATE SET
                    state = excluded.state,
                    updated_at = excluded.updated_at
                "#,
                params![channel_id, avatar_id, state.as_str(), at],
            )
        })?;
        Ok(())
    }
}

fn from_row(row: &Row<'_>) -> rusqlite::Result<PresenceRecord> {
    let state: String = row.get(2)?;
    let state = PresenceState::parse(&state)
        .ok_or_else(|| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, format!("bad state {state}").into()))?;

    let tags: String = row.get(8)?;
    let topic_tags: BTreeSet<String> =
        serde_json::from_str(&tags).map_err(|e| rusqlite::Error::FromSqlConversionFailure(8, Type::Text, Box::new(e)))?;

    let role: Option<String> = row.get(9)?;

    Ok(PresenceRecord {
        channel_id: row.get(0)?,
        avatar_id: row.get(1)?,
        state,
        last_turn_at: row.get(3)?,
        last_mentioned_at: row.get(4)?,
        last_summoned_at: row.get(5)?,
        new_summon_turns_remaining: row.get(6)?,
        priority_pins: row.get(7)?,
        topic_tags,
        conversation_role: role.as_deref().and_then(ConversationRole::parse),
        cooldown_until: row.get(10)?,
        turns_taken: row.get::<_, i64>(11)? as u64,
        updated_at: row.get(12)?,
    })
}
