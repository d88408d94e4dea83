//! Trigger coordination: classify, select responders, run their turns.
//!
//! Selection is the ordered tier cascade from [`tiers`](crate::coordination::tiers).
//! Each selected avatar then goes through an optional fast-path lease, the
//! response lock and the rate-limit gate before generation. Responses that
//! name other avatars start one nested coordination each (bounded fan-out);
//! nested coordinations never cascade further.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use crate::collaborators::{Avatar, ChannelMessage, Collaborators, ResponseOptions};
use crate::config::CoordinationConfig;
use crate::coordination::diversity::DiversityFilter;
use crate::coordination::gate::GateRequest;
use crate::coordination::mention::mentioned_avatars;
use crate::coordination::runner::{TurnOutcome, TurnRequest, TurnRunner};
use crate::coordination::session::SessionStore;
use crate::coordination::threads::ThreadRegistry;
use crate::coordination::tiers::{
    ActiveSpeakerTier, AffinityTier, LegacyTier, MentionTier, PresenceTier, ReplyTier, Selection, SelectionInput,
    SelectionTier, SummonTier, ThreadTier, TierKind,
};
use crate::coordination::trigger::{Trigger, TriggerKind};
use crate::error::Result;
use crate::id::{ambient_trigger_key, message_trigger_key, now_ms};
use crate::presence::{InitiativeScorer, PresenceStore, RankedAvatar, ScoringContext, rank};
use crate::scheduler::{LeaseGuard, LeaseMeta, LeaseMode, TickCounter, TurnLeaseRegistry};
use crate::store::{ActivityLog, CoordinationStore};

/// Nested coordinations started from mentions never go deeper than this.
pub const MAX_CASCADE_DEPTH: u8 = 1;

/// Per-call coordination options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinationContext {
    /// Lease each selection in this epoch first (message fast path).
    pub lease_tick: Option<u64>,
    /// Mention cascade depth; 0 for external triggers.
    pub depth: u8,
}

impl CoordinationContext {
    pub fn fast_path(tick_id: u64) -> Self {
        Self {
            lease_tick: Some(tick_id),
            depth: 0,
        }
    }
}

/// One response produced for a trigger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatedResponse {
    pub avatar_id: String,
    pub tier: TierKind,
    pub trigger: TriggerKind,
    pub message_id: String,
    pub text: String,
}

/// Avatars in the channel, split for selection.
struct Candidates {
    /// Every avatar in the channel (classification, cascade mentions).
    in_channel: Vec<Avatar>,
    /// Present avatars other than the author.
    eligible: Vec<Avatar>,
    ranked: Vec<RankedAvatar>,
}

enum LeaseDecision {
    Leased(LeaseGuard),
    /// Run without a lease of our own.
    Proceed,
    Skip,
}

pub struct Coordinator {
    collaborators: Collaborators,
    config: CoordinationConfig,
    scorer: Arc<dyn InitiativeScorer>,
    presence: PresenceStore,
    activity: ActivityLog,
    ticks: TickCounter,
    leases: TurnLeaseRegistry,
    threads: ThreadRegistry,
    sessions: SessionStore,
    runner: Arc<TurnRunner>,
    tiers: Vec<Box<dyn SelectionTier>>,
}

impl Coordinator {
    pub fn new(
        store: Arc<CoordinationStore>,
        collaborators: Collaborators,
        config: CoordinationConfig,
        scorer: Arc<dyn InitiativeScorer>,
        runner: Arc<TurnRunner>,
        diversity: Arc<DiversityFilter>,
        lease_ttl_ms: i64,
    ) -> Self {
        let presence = PresenceStore::new(store.clone());
        let threads = ThreadRegistry::new(store.clone(), config.thread_turns, config.thread_ttl_ms);

        let tiers: Vec<Box<dyn SelectionTier>> = vec![
            Box::new(ReplyTier::new(
                ActivityLog::new(store.clone()),
                collaborators.identity.clone(),
                collaborators.transport.clone(),
            )),
            Box::new(ThreadTier::new(threads.clone())),
            Box::new(SummonTier::new(presence.clone(), config.max_responses_per_message)),
            Box::new(AffinityTier::new(
                collaborators.affinity.clone(),
                collaborators.decision.clone(),
                config.sticky_affinity_exclusive,
                config.affinity_ttl_ms,
            )),
            Box::new(MentionTier::new(
                collaborators.affinity.clone(),
                presence.clone(),
                config.affinity_ttl_ms,
            )),
            Box::new(ActiveSpeakerTier::new(
                collaborators.decision.clone(),
                config.turn_based_mode,
            )),
            Box::new(PresenceTier::new(diversity)),
            Box::new(LegacyTier::new(
                collaborators.decision.clone(),
                config.legacy_candidates,
            )),
        ];

        Self {
            collaborators,
            scorer,
            presence,
            activity: ActivityLog::new(store.clone()),
            ticks: TickCounter::new(store.clone()),
            leases: TurnLeaseRegistry::new(store.clone(), lease_ttl_ms),
            threads,
            sessions: SessionStore::new(store),
            runner,
            tiers,
            config,
        }
    }

    pub fn tier_kinds(&self) -> Vec<TierKind> {
        self.tiers.iter().map(|t| t.kind()).collect()
    }

    /// Coordinate responses to one trigger. Returns at most
    /// `max_responses_per_message` responses; cascade responses are not
    /// included.
    pub async fn coordinate_response(
        &self,
        channel_id: &str,
        message: Option<&ChannelMessage>,
        ctx: CoordinationContext,
    ) -> Result<Vec<CoordinatedResponse>> {
        self.coordinate_at_depth(channel_id, message, ctx).await
    }

    fn coordinate_at_depth<'a>(
        &'a self,
        channel_id: &'a str,
        message: Option<&'a ChannelMessage>,
        ctx: CoordinationContext,
    ) -> BoxFuture<'a, Result<Vec<CoordinatedResponse>>> {
        async move {
            let now = now_ms();
            let candidates = self.candidates(channel_id, message, now).await?;
            let trigger = Trigger::classify(message, &candidates.in_channel);
            let trigger_key = match message {
                Some(m) => message_trigger_key(channel_id, &m.id),
                None => ambient_trigger_key(channel_id, self.ticks.peek(channel_id, now)?),
            };

            let input = SelectionInput {
                channel_id,
                message,
                trigger,
                eligible: &candidates.eligible,
                ranked: &candidates.ranked,
                now,
            };
            let selections = self.select_responders(&input).await;

            let mut responses = Vec::new();
            for selection in selections {
                if responses.len() >= self.config.max_responses_per_message {
                    break;
                }
                if let Some(response) = self
                    .respond(channel_id, message, trigger, &trigger_key, selection, ctx)
                    .await
                {
                    responses.push(response);
                }
            }

            if ctx.depth < MAX_CASCADE_DEPTH && !responses.is_empty() {
                self.cascade(channel_id, &responses, &candidates.in_channel, ctx.depth).await;
            }

            Ok(responses)
        }
        .boxed()
    }

    /// Run the tier cascade and return the first non-empty selection.
    pub async fn select_responders(&self, input: &SelectionInput<'_>) -> Vec<Selection> {
        for tier in &self.tiers {
            if !tier.applies_to(input.trigger.kind) {
                continue;
            }
            match tier.select(input).await {
                Ok(Some(selections)) if !selections.is_empty() => {
                    tracing::debug!(
                        channel_id = input.channel_id,
                        tier = tier.kind().as_str(),
                        trigger = input.trigger.kind.as_str(),
                        selected = selections.len(),
                        "Responders selected"
                    );
                    return selections;
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(
                        channel_id = input.channel_id,
                        tier = tier.kind().as_str(),
                        error = %e,
                        "Selection tier failed, continuing cascade"
                    );
                }
            }
        }
        Vec::new()
    }

    async fn candidates(&self, channel_id: &str, message: Option<&ChannelMessage>, now: i64) -> Result<Candidates> {
        let in_channel = match self.collaborators.identity.list_avatars_in_channel(channel_id).await {
            Ok(avatars) => avatars,
            Err(e) => {
                log::warn!("Could not list avatars in {}: {}", channel_id, e);
                Vec::new()
            }
        };

        let author = message.map(|m| m.author_id.as_str());
        let mut eligible = Vec::new();
        let mut records = Vec::new();
        for avatar in &in_channel {
            if author == Some(avatar.id.as_str()) {
                continue;
            }
            let record = self.presence.ensure(channel_id, &avatar.id, now)?;
            if record.is_present() {
                eligible.push(avatar.clone());
                records.push(record);
            }
        }

        let ctx = ScoringContext::at(now).with_topics(self.activity.channel_topics(channel_id)?);
        let ranked = rank(records, self.scorer.as_ref(), &ctx);
        Ok(Candidates {
            in_channel,
            eligible,
            ranked,
        })
    }

    /// Lease (fast path), then run the turn and settle the lease.
    async fn respond(
        &self,
        channel_id: &str,
        message: Option<&ChannelMessage>,
        trigger: Trigger,
        trigger_key: &str,
        selection: Selection,
        ctx: CoordinationContext,
    ) -> Option<CoordinatedResponse> {
        let avatar = &selection.avatar;

        let lease = match (ctx.lease_tick, message) {
            (Some(tick), Some(m)) => match self.lease_for_message(channel_id, avatar, tick, m, selection.tier.lease_mode()) {
                Ok(LeaseDecision::Leased(guard)) => Some(guard),
                Ok(LeaseDecision::Proceed) => None,
                Ok(LeaseDecision::Skip) => return None,
                Err(e) => {
                    log::warn!("Lease failed for {} in {}: {}", avatar.id, channel_id, e);
                    return None;
                }
            },
            _ => None,
        };

        let options = ResponseOptions {
            trigger: trigger.kind,
            tier: Some(selection.tier),
            thread_token: selection.thread_token.clone(),
            depth: ctx.depth,
            trigger_key: trigger_key.to_string(),
        };
        let outcome = self
            .runner
            .run(TurnRequest {
                avatar,
                channel_id,
                message,
                options: &options,
                gate: Some(GateRequest {
                    channel_id,
                    avatar_id: &avatar.id,
                    trigger_key,
                    kind: trigger.kind,
                    override_cooldown: selection.override_cooldown,
                }),
            })
            .await;

        outcome.settle_lease(lease);

        let TurnOutcome::Responded(turn) = outcome else {
            return None;
        };

        if let Some(thread_id) = &selection.thread_token
            && let Err(e) = self.threads.record_turn(thread_id, &avatar.id, turn.sent_at)
        {
            log::warn!("Failed to advance thread {}: {}", thread_id, e);
        }

        if trigger.kind.is_human()
            && let Some(m) = message
            && let Err(e) = self.sessions.upsert(channel_id, &m.author_id, &avatar.id, turn.sent_at)
        {
            log::warn!("Failed to upsert session for {} in {}: {}", m.author_id, channel_id, e);
        }

        Some(CoordinatedResponse {
            avatar_id: avatar.id.clone(),
            tier: selection.tier,
            trigger: trigger.kind,
            message_id: turn.message_id,
            text: turn.text,
        })
    }

    /// Lease this epoch for a message-triggered turn.
    ///
    /// A taken lease only blocks the turn when it belongs to the ambient
    /// sweep or to this same message. Earlier messages in the epoch leave
    /// dedup to the response lock and the gate, so a conversation keeps
    /// flowing between sweeps. Priority turns always proceed.
    fn lease_for_message(
        &self,
        channel_id: &str,
        avatar: &Avatar,
        tick: u64,
        message: &ChannelMessage,
        mode: LeaseMode,
    ) -> Result<LeaseDecision> {
        let meta = LeaseMeta::for_message(mode, &message.id, &message.author_id);
        if let Some(guard) = self.leases.try_acquire(channel_id, &avatar.id, tick, &meta, now_ms())? {
            return Ok(LeaseDecision::Leased(guard));
        }
        if mode == LeaseMode::Priority {
            log::debug!("{} already leased tick {} in {}; priority turn proceeds", avatar.id, tick, channel_id);
            return Ok(LeaseDecision::Proceed);
        }

        let held = self.leases.get(channel_id, &avatar.id, tick)?;
        let blocks = held.is_none_or(|lease| {
            lease.mode == LeaseMode::Ambient || lease.message_id.as_deref() == Some(message.id.as_str())
        });
        if blocks {
            log::debug!("{} already scheduled for tick {} in {}", avatar.id, tick, channel_id);
            Ok(LeaseDecision::Skip)
        } else {
            Ok(LeaseDecision::Proceed)
        }
    }

    /// Start one nested coordination per avatar named in a response, up to
    /// the configured fan-out.
    async fn cascade(&self, channel_id: &str, responses: &[CoordinatedResponse], in_channel: &[Avatar], depth: u8) {
        let mut started = 0;
        for response in responses {
            for named in mentioned_avatars(&response.text, in_channel) {
                if started >= self.config.mention_cascade_fanout {
                    return;
                }
                if named.id == response.avatar_id {
                    continue;
                }
                started += 1;

                let participants = vec![response.avatar_id.clone(), named.id.clone()];
                if let Err(e) = self
                    .threads
                    .open(channel_id, &participants, Some(&response.avatar_id), now_ms())
                {
                    log::warn!("Failed to open thread in {}: {}", channel_id, e);
                }

                let synthetic = ChannelMessage::from_avatar(
                    &response.message_id,
                    channel_id,
                    &response.avatar_id,
                    &response.text,
                    now_ms(),
                );
                let nested = CoordinationContext {
                    lease_tick: None,
                    depth: depth + 1,
                };
                match self.coordinate_at_depth(channel_id, Some(&synthetic), nested).await {
                    Ok(replies) => log::debug!(
                        "Mention cascade {} -> {} produced {} replies",
                        response.avatar_id,
                        named.id,
                        replies.len()
                    ),
                    Err(e) => log::warn!("Mention cascade in {} failed: {}", channel_id, e),
                }
            }
        }
    }
}
