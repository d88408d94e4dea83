//! One avatar turn: lock, admit, generate, send, record.
//!
//! Shared by the ambient sweep and the coordinator. Leases are the caller's
//! business; the runner only owns the in-flight lock, which is released on
//! every exit path by its guard.

use std::sync::Arc;

use crate::collaborators::{Avatar, ChannelMessage, Collaborators, ResponseOptions};
use crate::coordination::gate::{Admission, GateRequest, RateLimitGate};
use crate::coordination::lock::ResponseLock;
use crate::coordination::speaker_cache::SpeakerCache;
use crate::error::Result;
use crate::id::now_ms;
use crate::presence::PresenceStore;
use crate::scheduler::LeaseGuard;
use crate::store::ActivityLog;

/// A message that made it to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentTurn {
    pub message_id: String,
    pub text: String,
    pub sent_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Responded(SentTurn),
    /// Generator chose not to speak.
    Silent,
    /// Another generation for this avatar is in flight.
    Contended,
    Rejected(Admission),
    Failed(String),
}

impl TurnOutcome {
    pub fn sent(&self) -> Option<&SentTurn> {
        match self {
            Self::Responded(turn) => Some(turn),
            _ => None,
        }
    }

    /// Settle a turn lease from this outcome. Silent turns count as completed.
    pub fn settle_lease(&self, lease: Option<LeaseGuard>) {
        let Some(lease) = lease else {
            return;
        };
        let tick_id = lease.tick_id();
        let settled = match self {
            Self::Responded(_) | Self::Silent => lease.complete(),
            Self::Contended => lease.fail("response lock held"),
            Self::Rejected(admission) => lease.fail(admission.reason()),
            Self::Failed(error) => lease.fail(error),
        };
        if let Err(e) = settled {
            log::warn!("Failed to settle lease for tick {}: {}", tick_id, e);
        }
    }
}

/// Everything needed to run one turn.
pub struct TurnRequest<'a> {
    pub avatar: &'a Avatar,
    pub channel_id: &'a str,
    pub message: Option<&'a ChannelMessage>,
    pub options: &'a ResponseOptions,
    /// Pass the rate-limit gate first. Admission is revoked when the turn
    /// ends without a message.
    pub gate: Option<GateRequest<'a>>,
}

pub struct TurnRunner {
    collaborators: Collaborators,
    lock: ResponseLock,
    gate: RateLimitGate,
    presence: PresenceStore,
    activity: ActivityLog,
    speaker_cache: Arc<SpeakerCache>,
    turn_cooldown_ms: i64,
}

impl TurnRunner {
    pub fn new(
        collaborators: Collaborators,
        lock: ResponseLock,
        gate: RateLimitGate,
        presence: PresenceStore,
        activity: ActivityLog,
        speaker_cache: Arc<SpeakerCache>,
        turn_cooldown_ms: i64,
    ) -> Self {
        Self {
            collaborators,
            lock,
            gate,
            presence,
            activity,
            speaker_cache,
            turn_cooldown_ms,
        }
    }

    pub async fn run(&self, req: TurnRequest<'_>) -> TurnOutcome {
        let avatar_id = req.avatar.id.as_str();

        let _guard = match self.lock.try_guard(req.channel_id, avatar_id, now_ms()) {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                log::debug!("Response lock held for {} in {}", avatar_id, req.channel_id);
                return TurnOutcome::Contended;
            }
            Err(e) => return TurnOutcome::Failed(format!("lock: {}", e)),
        };

        if let Some(gate_req) = req.gate {
            match self.gate.admit(gate_req, now_ms()) {
                Ok(Admission::Admitted) => {}
                Ok(rejected) => return TurnOutcome::Rejected(rejected),
                Err(e) => return TurnOutcome::Failed(format!("gate: {}", e)),
            }
        }

        let outcome = self.generate_and_send(&req).await;

        if req.gate.is_some()
            && outcome.sent().is_none()
            && let Err(e) = self.gate.revoke(&req.options.trigger_key, avatar_id)
        {
            log::warn!("Failed to revoke admission for {}: {}", avatar_id, e);
        }

        if let TurnOutcome::Responded(turn) = &outcome {
            self.record_sent(&req, turn).await;
        }
        outcome
    }

    async fn generate_and_send(&self, req: &TurnRequest<'_>) -> TurnOutcome {
        let generated = match self
            .collaborators
            .generation
            .generate(req.avatar, req.channel_id, req.message, req.options)
            .await
        {
            Ok(Some(generated)) => generated,
            Ok(None) => return TurnOutcome::Silent,
            Err(e) => {
                tracing::warn!(
                    channel_id = req.channel_id,
                    avatar_id = req.avatar.id.as_str(),
                    trigger = req.options.trigger.as_str(),
                    error = %e,
                    "Generation failed"
                );
                return TurnOutcome::Failed(e.to_string());
            }
        };

        let message_id = match generated.message_id {
            Some(id) => id,
            None => match self
                .collaborators
                .transport
                .send_message(req.channel_id, req.avatar, &generated.text)
                .await
            {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("Send failed for {} in {}: {}", req.avatar.id, req.channel_id, e);
                    return TurnOutcome::Failed(e.to_string());
                }
            },
        };

        TurnOutcome::Responded(SentTurn {
            message_id,
            text: generated.text,
            sent_at: now_ms(),
        })
    }

    fn record_rows(&self, req: &TurnRequest<'_>, turn: &SentTurn) -> Result<()> {
        let avatar_id = req.avatar.id.as_str();
        self.presence
            .record_turn(req.channel_id, avatar_id, turn.sent_at, self.turn_cooldown_ms)?;
        self.activity
            .record_avatar_message(&turn.message_id, req.channel_id, avatar_id, turn.sent_at)?;
        self.activity
            .record_bot_output(req.channel_id, &req.options.trigger_key, turn.sent_at)?;
        Ok(())
    }

    /// Post-send bookkeeping. The message is already out, so failures here are
    /// logged and never turn a response into a failure.
    async fn record_sent(&self, req: &TurnRequest<'_>, turn: &SentTurn) {
        let avatar_id = req.avatar.id.as_str();

        if let Err(e) = self.record_rows(req, turn) {
            log::warn!("Failed to record turn for {} in {}: {}", avatar_id, req.channel_id, e);
        }

        self.speaker_cache
            .push(ChannelMessage::from_avatar(
                &turn.message_id,
                req.channel_id,
                avatar_id,
                &turn.text,
                turn.sent_at,
            ))
            .await;

        if let Err(e) = self.collaborators.identity.touch_avatar(avatar_id, turn.sent_at).await {
            log::debug!("Failed to touch avatar {}: {}", avatar_id, e);
        }
    }
}
