//! Final per-channel admission check before generation.
//!
//! Three checks run in order inside one IMMEDIATE transaction so concurrent
//! processes see each other's admissions:
//! 1. Channel cooldown: minimum gap since the last bot output produced for a
//!    different trigger (skipped when the caller overrides it)
//! 2. Responder cap: distinct avatars already admitted for this trigger
//! 3. Dedup: this avatar has not already been admitted for this trigger
//!
//! Admission inserts the responder row. If the admitted avatar ends up not
//! speaking, the caller revokes the row so it does not count against the cap.

use std::sync::Arc;

use rusqlite::{OptionalExtension, params};

use crate::config::GateConfig;
use crate::coordination::TriggerKind;
use crate::error::Result;
use crate::store::CoordinationStore;

/// Outcome of an admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    ChannelCooldown { remaining_ms: i64 },
    ResponderCap { responders: usize },
    AlreadyResponded,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Self::Admitted)
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Self::Admitted => "admitted",
            Self::ChannelCooldown { .. } => "channel cooldown",
            Self::ResponderCap { .. } => "responder cap",
            Self::AlreadyResponded => "already responded",
        }
    }
}

/// One admission request.
#[derive(Debug, Clone, Copy)]
pub struct GateRequest<'a> {
    pub channel_id: &'a str,
    pub avatar_id: &'a str,
    pub trigger_key: &'a str,
    pub kind: TriggerKind,
    /// Skip the channel cooldown (direct replies).
    pub override_cooldown: bool,
}

#[derive(Debug, Clone)]
pub struct RateLimitGate {
    store: Arc<CoordinationStore>,
    config: GateConfig,
}

impl RateLimitGate {
    pub fn new(store: Arc<CoordinationStore>, config: GateConfig) -> Self {
        Self { store, config }
    }

    fn cooldown_for(&self, kind: TriggerKind) -> i64 {
        match kind {
            TriggerKind::BotMessage => self.config.bot_reply_cooldown_ms,
            _ => self.config.channel_cooldown_ms,
        }
    }

    pub fn admit(&self, req: GateRequest<'_>, now: i64) -> Result<Admission> {
        let cooldown_ms = self.cooldown_for(req.kind);
        let max_responders = self.config.max_responders_per_trigger;

        let admission = self.store.with_tx(|tx| {
            if !req.override_cooldown && cooldown_ms > 0 {
                let last: Option<(Option<i64>, Option<String>)> = tx
                    .query_row(
                        "SELECT last_bot_at, last_bot_trigger FROM channel_activity WHERE channel_id = ?1",
                        [req.channel_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;

                if let Some((Some(last_bot_at), last_trigger)) = last
                    && last_trigger.as_deref() != Some(req.trigger_key)
                {
                    let elapsed = now - last_bot_at;
                    if elapsed < cooldown_ms {
                        return Ok(Admission::ChannelCooldown {
                            remaining_ms: cooldown_ms - elapsed,
                        });
                    }
                }
            }

            let responders: Vec<String> = {
                let mut stmt = tx.prepare("SELECT avatar_id FROM trigger_responders WHERE trigger_key = ?1")?;
                let rows = stmt.query_map([req.trigger_key], |row| row.get::<_, String>(0))?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let already = responders.iter().any(|a| a == req.avatar_id);
            if !already && responders.len() >= max_responders {
                return Ok(Admission::ResponderCap {
                    responders: responders.len(),
                });
            }
            if already {
                return Ok(Admission::AlreadyResponded);
            }

            tx.execute(
                "INSERT INTO trigger_responders (trigger_key, avatar_id, channel_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![req.trigger_key, req.avatar_id, req.channel_id, now],
            )?;
            Ok(Admission::Admitted)
        })?;

        if !admission.is_admitted() {
            tracing::debug!(
                channel_id = req.channel_id,
                avatar_id = req.avatar_id,
                trigger_key = req.trigger_key,
                reason = admission.reason(),
                "Gate rejected responder"
            );
        }
        Ok(admission)
    }

    /// Undo an admission whose generation produced nothing.
    pub fn revoke(&self, trigger_key: &str, avatar_id: &str) -> Result<()> {
        self.store.with_conn(|c| {
            c.execute(
                "DELETE FROM trigger_responders WHERE trigger_key = ?1 AND avatar_id = ?2",
                params![trigger_key, avatar_id],
            )
        })?;
        Ok(())
    }

    /// Avatars admitted for a trigger, ordered by admission time.
    pub fn responders(&self, trigger_key: &str) -> Result<Vec<String>> {
        self.store.with_conn(|c| {
            let mut stmt = c.prepare(
                "SELECT avatar_id FROM trigger_responders WHERE trigger_key = ?1 ORDER BY created_at, avatar_id",
            )?;
            let rows = stmt.query_map([trigger_key], |row| row.get::<_, String>(0))?;
            rows.collect()
        })
    }

    /// Drop responder rows created before `before`.
    pub fn purge(&self, before: i64) -> Result<usize> {
        let removed = self
            .store
            .with_conn(|c| c.execute("DELETE FROM trigger_responders WHERE created_at < ?1", [before]))?;
        Ok(removed)
    }
}
