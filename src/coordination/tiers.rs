//! Responder selection tiers.
//!
//! The coordinator evaluates these in order and stops at the first tier that
//! returns `Some`. Each tier is a standalone strategy so it can be tested and
//! replaced on its own:
//!
//! | # | Tier | Picks |
//! |---|------|-------|
//! | 0 | Reply | author of the replied-to message, cooldown ignored |
//! | 1 | Thread | next participant of the open thread |
//! | 2 | Summon | holders of summon credits, most recently summoned first |
//! | 3 | Affinity | the human author's pinned avatar |
//! | 4 | Mention | avatars named in the message |
//! | 5 | Active speaker | flagged or longest-silent avatar (turn-based mode) |
//! | 6 | Presence | best-ranked avatar; diversity filtered when ambient |
//! | 7 | Legacy | first of the top ranked avatars the decision predicate accepts |

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::collaborators::{AffinityStore, Avatar, ChannelMessage, DecisionPredicate, IdentityStore, Transport};
use crate::coordination::diversity::DiversityFilter;
use crate::coordination::mention::mentioned_avatars;
use crate::coordination::threads::ThreadRegistry;
use crate::coordination::trigger::{Trigger, TriggerKind};
use crate::error::Result;
use crate::presence::{PresenceStore, RankedAvatar};
use crate::scheduler::LeaseMode;
use crate::store::ActivityLog;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TierKind {
    Reply,
    Thread,
    Summon,
    Affinity,
    Mention,
    ActiveSpeaker,
    Presence,
    Legacy,
}

impl TierKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reply => "reply",
            Self::Thread => "thread",
            Self::Summon => "summon",
            Self::Affinity => "affinity",
            Self::Mention => "mention",
            Self::ActiveSpeaker => "active_speaker",
            Self::Presence => "presence",
            Self::Legacy => "legacy",
        }
    }

    /// Position in the cascade, 0 first.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Lease mode used when a fast-path selection from this tier is leased.
    pub fn lease_mode(&self) -> LeaseMode {
        match self {
            Self::Reply | Self::Summon => LeaseMode::Priority,
            _ => LeaseMode::Fastlane,
        }
    }
}

impl fmt::Display for TierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One avatar picked by a tier.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    pub avatar: Avatar,
    pub tier: TierKind,
    pub thread_token: Option<String>,
    /// Skip the channel cooldown at the gate.
    pub override_cooldown: bool,
}

impl Selection {
    pub fn new(avatar: Avatar, tier: TierKind) -> Self {
        Self {
            avatar,
            tier,
            thread_token: None,
            override_cooldown: false,
        }
    }
}

/// What every tier sees.
pub struct SelectionInput<'a> {
    pub channel_id: &'a str,
    pub message: Option<&'a ChannelMessage>,
    pub trigger: Trigger,
    /// Present avatars in the channel, excluding the message author.
    pub eligible: &'a [Avatar],
    /// `eligible` ranked by initiative.
    pub ranked: &'a [RankedAvatar],
    pub now: i64,
}

impl SelectionInput<'_> {
    pub fn eligible_avatar(&self, avatar_id: &str) -> Option<&Avatar> {
        self.eligible.iter().find(|a| a.id == avatar_id)
    }

    /// Author of the triggering message, if it is a human.
    pub fn human_author(&self) -> Option<&str> {
        self.message.filter(|m| !m.author_is_bot).map(|m| m.author_id.as_str())
    }

    fn author_id(&self) -> Option<&str> {
        self.message.map(|m| m.author_id.as_str())
    }

    fn select_ranked(&self, ranked: &RankedAvatar, tier: TierKind) -> Option<Selection> {
        self.eligible_avatar(ranked.avatar_id())
            .map(|avatar| Selection::new(avatar.clone(), tier))
    }
}

#[async_trait]
pub trait SelectionTier: Send + Sync {
    fn kind(&self) -> TierKind;

    /// Whether this tier runs for a trigger kind.
    fn applies_to(&self, _trigger: TriggerKind) -> bool {
        true
    }

    /// `Ok(None)` passes to the next tier.
    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>>;
}

/// Tiers that still run for bot-authored triggers.
fn bot_safe(trigger: TriggerKind) -> bool {
    trigger != TriggerKind::BotMessage
}

/// Tier 0: direct reply to an avatar's earlier message.
pub struct ReplyTier {
    activity: ActivityLog,
    identity: Arc<dyn IdentityStore>,
    transport: Arc<dyn Transport>,
}

impl ReplyTier {
    pub fn new(activity: ActivityLog, identity: Arc<dyn IdentityStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            activity,
            identity,
            transport,
        }
    }
}

#[async_trait]
impl SelectionTier for ReplyTier {
    fn kind(&self) -> TierKind {
        TierKind::Reply
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        let Some(reply_to) = input.message.and_then(|m| m.reply_to.as_ref()) else {
            return Ok(None);
        };

        let avatar_id = match self.activity.avatar_for_message(&reply_to.message_id)? {
            Some(id) => id,
            None => match &reply_to.author_id {
                Some(author) => author.clone(),
                None => return Ok(None),
            },
        };
        if input.author_id() == Some(avatar_id.as_str()) {
            return Ok(None);
        }

        let Some(mut avatar) = self.identity.get_avatar(&avatar_id).await? else {
            return Ok(None);
        };

        if !avatar.is_in(input.channel_id) {
            match self.transport.relocate_avatar(&avatar, input.channel_id).await {
                Ok(()) => log::info!("Relocated {} to {} to answer a reply", avatar.id, input.channel_id),
                Err(e) => log::warn!("Failed to relocate {} to {}: {}", avatar.id, input.channel_id, e),
            }
            avatar.channel_id = Some(input.channel_id.to_string());
        }

        Ok(Some(vec![Selection {
            override_cooldown: true,
            ..Selection::new(avatar, TierKind::Reply)
        }]))
    }
}

/// Tier 1: continue the channel's open thread.
pub struct ThreadTier {
    threads: ThreadRegistry,
}

impl ThreadTier {
    pub fn new(threads: ThreadRegistry) -> Self {
        Self { threads }
    }
}

#[async_trait]
impl SelectionTier for ThreadTier {
    fn kind(&self) -> TierKind {
        TierKind::Thread
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        let Some(thread) = self.threads.active(input.channel_id, input.now)? else {
            return Ok(None);
        };
        let Some(next) = thread.next_participant() else {
            return Ok(None);
        };
        if input.author_id() == Some(next) {
            return Ok(None);
        }
        Ok(input.eligible_avatar(next).map(|avatar| {
            vec![Selection {
                thread_token: Some(thread.thread_id.clone()),
                ..Selection::new(avatar.clone(), TierKind::Thread)
            }]
        }))
    }
}

/// Tier 2: guaranteed turns for freshly summoned avatars.
pub struct SummonTier {
    presence: PresenceStore,
    limit: usize,
}

impl SummonTier {
    pub fn new(presence: PresenceStore, limit: usize) -> Self {
        Self { presence, limit }
    }
}

#[async_trait]
impl SelectionTier for SummonTier {
    fn kind(&self) -> TierKind {
        TierKind::Summon
    }

    fn applies_to(&self, trigger: TriggerKind) -> bool {
        bot_safe(trigger)
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        let mut holders: Vec<&RankedAvatar> = input.ranked.iter().filter(|r| r.record.has_summon_credit()).collect();
        holders.sort_by(|a, b| {
            b.record
                .last_summoned_at
                .cmp(&a.record.last_summoned_at)
                .then_with(|| a.avatar_id().cmp(b.avatar_id()))
        });

        let mut picked = Vec::new();
        for holder in holders {
            if picked.len() >= self.limit {
                break;
            }
            if self.presence.consume_summon(input.channel_id, holder.avatar_id())?
                && let Some(selection) = input.select_ranked(holder, TierKind::Summon)
            {
                picked.push(selection);
            }
        }
        Ok((!picked.is_empty()).then_some(picked))
    }
}

/// Tier 3: the human's sticky avatar.
pub struct AffinityTier {
    affinity: Arc<dyn AffinityStore>,
    decision: Arc<dyn DecisionPredicate>,
    exclusive: bool,
    ttl_ms: i64,
}

impl AffinityTier {
    pub fn new(
        affinity: Arc<dyn AffinityStore>,
        decision: Arc<dyn DecisionPredicate>,
        exclusive: bool,
        ttl_ms: i64,
    ) -> Self {
        Self {
            affinity,
            decision,
            exclusive,
            ttl_ms,
        }
    }
}

#[async_trait]
impl SelectionTier for AffinityTier {
    fn kind(&self) -> TierKind {
        TierKind::Affinity
    }

    fn applies_to(&self, trigger: TriggerKind) -> bool {
        trigger.is_human()
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        let Some(user_id) = input.human_author() else {
            return Ok(None);
        };
        let Some(avatar_id) = self.affinity.get(input.channel_id, user_id).await? else {
            return Ok(None);
        };
        let Some(avatar) = input.eligible_avatar(&avatar_id) else {
            return Ok(None);
        };

        if !self.exclusive
            && !self
                .decision
                .should_respond(input.channel_id, avatar, input.message)
                .await?
        {
            return Ok(None);
        }

        if let Err(e) = self.affinity.set(input.channel_id, user_id, &avatar.id, self.ttl_ms).await {
            log::warn!("Failed to refresh affinity {} -> {}: {}", user_id, avatar.id, e);
        }
        Ok(Some(vec![Selection::new(avatar.clone(), TierKind::Affinity)]))
    }
}

/// Tier 4: avatars named in the message.
pub struct MentionTier {
    affinity: Arc<dyn AffinityStore>,
    presence: PresenceStore,
    ttl_ms: i64,
}

impl MentionTier {
    pub fn new(affinity: Arc<dyn AffinityStore>, presence: PresenceStore, ttl_ms: i64) -> Self {
        Self {
            affinity,
            presence,
            ttl_ms,
        }
    }
}

#[async_trait]
impl SelectionTier for MentionTier {
    fn kind(&self) -> TierKind {
        TierKind::Mention
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        let Some(message) = input.message else {
            return Ok(None);
        };
        let named: Vec<&Avatar> = mentioned_avatars(&message.content, input.eligible)
            .into_iter()
            .filter(|a| a.id != message.author_id)
            .collect();
        let Some(first) = named.first() else {
            return Ok(None);
        };

        for avatar in &named {
            if let Err(e) = self.presence.record_mention(input.channel_id, &avatar.id, input.now) {
                log::warn!("Failed to record mention of {}: {}", avatar.id, e);
            }
        }
        if let Some(user_id) = input.human_author()
            && let Err(e) = self.affinity.set(input.channel_id, user_id, &first.id, self.ttl_ms).await
        {
            log::warn!("Failed to record affinity {} -> {}: {}", user_id, first.id, e);
        }

        Ok(Some(
            named
                .into_iter()
                .map(|avatar| Selection::new(avatar.clone(), TierKind::Mention))
                .collect(),
        ))
    }
}

/// Tier 5: turn-based active speaker.
pub struct ActiveSpeakerTier {
    decision: Arc<dyn DecisionPredicate>,
    enabled: bool,
}

impl ActiveSpeakerTier {
    pub fn new(decision: Arc<dyn DecisionPredicate>, enabled: bool) -> Self {
        Self { decision, enabled }
    }
}

#[async_trait]
impl SelectionTier for ActiveSpeakerTier {
    fn kind(&self) -> TierKind {
        TierKind::ActiveSpeaker
    }

    fn applies_to(&self, trigger: TriggerKind) -> bool {
        self.enabled && bot_safe(trigger)
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        let candidate = input.ranked.iter().find(|r| r.record.is_active_speaker()).or_else(|| {
            input
                .ranked
                .iter()
                .min_by(|a, b| {
                    let a_turn = a.record.last_turn_at.unwrap_or(i64::MIN);
                    let b_turn = b.record.last_turn_at.unwrap_or(i64::MIN);
                    a_turn.cmp(&b_turn).then_with(|| a.avatar_id().cmp(b.avatar_id()))
                })
        });
        let Some(selection) = candidate.and_then(|r| input.select_ranked(r, TierKind::ActiveSpeaker)) else {
            return Ok(None);
        };

        if self
            .decision
            .should_respond(input.channel_id, &selection.avatar, input.message)
            .await?
        {
            Ok(Some(vec![selection]))
        } else {
            Ok(None)
        }
    }
}

/// Tier 6: presence-ranked fallback.
///
/// Ambient triggers go through the diversity filter; any other trigger gets
/// the top-ranked eligible avatar.
pub struct PresenceTier {
    diversity: Arc<DiversityFilter>,
}

impl PresenceTier {
    pub fn new(diversity: Arc<DiversityFilter>) -> Self {
        Self { diversity }
    }
}

#[async_trait]
impl SelectionTier for PresenceTier {
    fn kind(&self) -> TierKind {
        TierKind::Presence
    }

    fn applies_to(&self, trigger: TriggerKind) -> bool {
        bot_safe(trigger)
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        let picked = if input.trigger.kind == TriggerKind::Ambient {
            self.diversity
                .apply(input.channel_id, input.ranked, input.now)
                .await
                .first()
                .copied()
        } else {
            input.ranked.first()
        };
        Ok(picked
            .and_then(|r| input.select_ranked(r, TierKind::Presence))
            .map(|selection| vec![selection]))
    }
}

/// Tier 7: ask the decision predicate about the top candidates.
pub struct LegacyTier {
    decision: Arc<dyn DecisionPredicate>,
    candidates: usize,
}

impl LegacyTier {
    pub fn new(decision: Arc<dyn DecisionPredicate>, candidates: usize) -> Self {
        Self { decision, candidates }
    }
}

#[async_trait]
impl SelectionTier for LegacyTier {
    fn kind(&self) -> TierKind {
        TierKind::Legacy
    }

    fn applies_to(&self, trigger: TriggerKind) -> bool {
        bot_safe(trigger)
    }

    async fn select(&self, input: &SelectionInput<'_>) -> Result<Option<Vec<Selection>>> {
        for ranked in input.ranked.iter().take(self.candidates) {
            let Some(avatar) = input.eligible_avatar(ranked.avatar_id()) else {
                continue;
            };
            if self.decision.should_respond(input.channel_id, avatar, input.message).await? {
                return Ok(Some(vec![Selection::new(avatar.clone(), TierKind::Legacy)]));
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mock::{MockDecision, MockIdentity, MockTransport};
    use crate::coordination::affinity::StoreAffinity;
    use crate::id::now_ms;
    use crate::coordination::speaker_cache::SpeakerCache;
    use crate::presence::{DefaultScorer, PresenceRecord};
    use crate::store::CoordinationStore;

    const NOW: i64 = 100_000_000;

    fn store() -> Arc<CoordinationStore> {
        Arc::new(CoordinationStore::open_in_memory().unwrap())
    }

    fn cast() -> Vec<Avatar> {
        vec![
            Avatar::new("ada", "Ada").in_channel("c1"),
            Avatar::new("bob", "Bob").in_channel("c1"),
            Avatar::new("cy", "Cy").in_channel("c1"),
        ]
    }

    fn ranked(entries: &[(&str, f64)]) -> Vec<RankedAvatar> {
        entries
            .iter()
            .map(|(id, score)| RankedAvatar {
                record: PresenceRecord::new("c1", *id, 0),
                score: *score,
            })
            .collect()
    }

    fn input<'a>(
        message: Option<&'a ChannelMessage>,
        eligible: &'a [Avatar],
        ranked: &'a [RankedAvatar],
    ) -> SelectionInput<'a> {
        SelectionInput {
            channel_id: "c1",
            message,
            trigger: Trigger::classify(message, eligible),
            eligible,
            ranked,
            now: NOW,
        }
    }

    fn ids(selections: Option<Vec<Selection>>) -> Vec<String> {
        selections
            .unwrap_or_default()
            .into_iter()
            .map(|s| s.avatar.id)
            .collect()
    }

    #[test]
    fn test_tier_order_and_modes() {
        assert_eq!(TierKind::Reply.index(), 0);
        assert_eq!(TierKind::Legacy.index(), 7);
        assert!(TierKind::Reply < TierKind::Mention);
        assert_eq!(TierKind::Reply.lease_mode(), LeaseMode::Priority);
        assert_eq!(TierKind::Summon.lease_mode(), LeaseMode::Priority);
        assert_eq!(TierKind::Mention.lease_mode(), LeaseMode::Fastlane);
    }

    #[tokio::test]
    async fn test_reply_tier_attributes_and_relocates() {
        let store = store();
        let activity = ActivityLog::new(store.clone());
        activity.record_avatar_message("old-1", "c2", "zed", 0).unwrap();

        let identity = Arc::new(MockIdentity::with_avatars(vec![Avatar::new("zed", "Zed").in_channel("c2")]));
        let transport = Arc::new(MockTransport::new());
        let tier = ReplyTier::new(activity, identity, transport.clone());

        let msg = ChannelMessage::human("m1", "c1", "u1", "what did you mean?", 0).replying_to("old-1", None);
        let eligible = cast();
        let ranked = ranked(&[]);
        let picked = tier.select(&input(Some(&msg), &eligible, &ranked)).await.unwrap().unwrap();

        assert_eq!(picked[0].avatar.id, "zed");
        assert!(picked[0].override_cooldown);
        assert_eq!(transport.relocations(), vec![("zed".to_string(), "c1".to_string())]);
    }

    #[tokio::test]
    async fn test_reply_tier_falls_back_to_reply_author() {
        let store = store();
        let identity = Arc::new(MockIdentity::with_avatars(cast()));
        let tier = ReplyTier::new(ActivityLog::new(store), identity, Arc::new(MockTransport::new()));

        let msg = ChannelMessage::human("m1", "c1", "u1", "hm", 0).replying_to("x", Some("bob".to_string()));
        let eligible = cast();
        let ranked = ranked(&[]);
        assert_eq!(ids(tier.select(&input(Some(&msg), &eligible, &ranked)).await.unwrap()), vec!["bob"]);

        let plain = ChannelMessage::human("m2", "c1", "u1", "hm", 0);
        assert!(tier.select(&input(Some(&plain), &eligible, &ranked)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_thread_tier_picks_next_participant() {
        let threads = ThreadRegistry::new(store(), 4, 60_000);
        threads
            .open("c1", &["ada".to_string(), "bob".to_string()], Some("ada"), NOW)
            .unwrap();
        let tier = ThreadTier::new(threads);

        let eligible = cast();
        let ranked = ranked(&[]);
        let picked = tier.select(&input(None, &eligible, &ranked)).await.unwrap().unwrap();
        assert_eq!(picked[0].avatar.id, "bob");
        assert!(picked[0].thread_token.is_some());

        // The next participant wrote the trigger itself.
        let msg = ChannelMessage::from_avatar("m1", "c1", "bob", "go on", 0);
        let without_bob: Vec<Avatar> = eligible.iter().filter(|a| a.id != "bob").cloned().collect();
        assert!(tier.select(&input(Some(&msg), &without_bob, &ranked)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_summon_tier_consumes_credit() {
        let store = store();
        let presence = PresenceStore::new(store);
        presence.grant_summon("c1", "cy", 1, NOW - 10).unwrap();
        presence.grant_summon("c1", "bob", 1, NOW - 5).unwrap();

        let mut ranked_list = Vec::new();
        for id in ["ada", "bob", "cy"] {
            ranked_list.push(RankedAvatar {
                record: presence.ensure("c1", id, NOW).unwrap(),
                score: 0.5,
            });
        }

        let tier = SummonTier::new(presence.clone(), 1);
        let eligible = cast();
        assert_eq!(
            ids(tier.select(&input(None, &eligible, &ranked_list)).await.unwrap()),
            vec!["bob"]
        );
        assert_eq!(presence.get("c1", "bob").unwrap().unwrap().new_summon_turns_remaining, 0);
        assert_eq!(presence.get("c1", "cy").unwrap().unwrap().new_summon_turns_remaining, 1);
    }

    #[tokio::test]
    async fn test_affinity_tier_respects_predicate() {
        let store = store();
        let affinity = Arc::new(StoreAffinity::new(store));
        affinity.set_at("c1", "u1", "cy", 60_000, now_ms()).unwrap();

        let msg = ChannelMessage::human("m1", "c1", "u1", "so anyway", 0);
        let eligible = cast();
        let ranked = ranked(&[]);

        let rejecting = AffinityTier::new(affinity.clone(), Arc::new(MockDecision::rejecting_all()), false, 60_000);
        assert!(rejecting.select(&input(Some(&msg), &eligible, &ranked)).await.unwrap().is_none());

        let exclusive = AffinityTier::new(affinity.clone(), Arc::new(MockDecision::rejecting_all()), true, 60_000);
        assert_eq!(ids(exclusive.select(&input(Some(&msg), &eligible, &ranked)).await.unwrap()), vec!["cy"]);

        let accepting = AffinityTier::new(affinity, Arc::new(MockDecision::accepting(["cy"])), false, 60_000);
        assert_eq!(ids(accepting.select(&input(Some(&msg), &eligible, &ranked)).await.unwrap()), vec!["cy"]);
    }

    #[tokio::test]
    async fn test_mention_tier_records_affinity_and_mention() {
        let store = store();
        let affinity = Arc::new(StoreAffinity::new(store.clone()));
        let presence = PresenceStore::new(store);
        let tier = MentionTier::new(affinity.clone(), presence.clone(), 60_000);

        let msg = ChannelMessage::human("m1", "c1", "u1", "Bob and ada, thoughts?", 0);
        let eligible = cast();
        let ranked = ranked(&[]);
        let picked = tier.select(&input(Some(&msg), &eligible, &ranked)).await.unwrap();

        assert_eq!(ids(picked), vec!["bob", "ada"]);
        assert_eq!(affinity.get_at("c1", "u1", now_ms()).unwrap().as_deref(), Some("bob"));
        assert_eq!(presence.get("c1", "ada").unwrap().unwrap().last_mentioned_at, Some(NOW));
    }

    #[tokio::test]
    async fn test_active_speaker_tier() {
        let decision = Arc::new(MockDecision::accepting_all());
        let eligible = cast();
        let mut list = ranked(&[("ada", 0.9), ("bob", 0.5), ("cy", 0.1)]);
        list[0].record.last_turn_at = Some(NOW - 10);
        list[1].record.last_turn_at = Some(NOW - 1_000);
        list[2].record.last_turn_at = Some(NOW - 100);

        let disabled = ActiveSpeakerTier::new(decision.clone(), false);
        assert!(!disabled.applies_to(TriggerKind::HumanMessage));

        let tier = ActiveSpeakerTier::new(decision, true);
        assert_eq!(ids(tier.select(&input(None, &eligible, &list)).await.unwrap()), vec!["bob"]);

        list[2].record.conversation_role = Some(crate::presence::ConversationRole::ActiveSpeaker);
        assert_eq!(ids(tier.select(&input(None, &eligible, &list)).await.unwrap()), vec!["cy"]);
    }

    fn presence_tier(transport: Arc<MockTransport>) -> PresenceTier {
        let cache = Arc::new(SpeakerCache::new(transport, 30_000, 10));
        let diversity = DiversityFilter::new(cache, Arc::new(DefaultScorer::new()), 3, vec![0.5, 0.3]);
        PresenceTier::new(Arc::new(diversity))
    }

    #[tokio::test]
    async fn test_presence_tier_ambient_diversity() {
        let transport = Arc::new(MockTransport::new());
        for (i, id) in ["ada", "ada", "ada"].iter().enumerate() {
            transport.seed(ChannelMessage::from_avatar(format!("m{i}"), "c1", *id, "hi", i as i64));
        }
        let tier = presence_tier(transport);

        let eligible = cast();
        let list = ranked(&[("ada", 0.9), ("bob", 0.2)]);
        assert_eq!(ids(tier.select(&input(None, &eligible, &list)).await.unwrap()), vec!["bob"]);
    }

    #[tokio::test]
    async fn test_presence_tier_threshold_fallback() {
        let transport = Arc::new(MockTransport::new());
        transport.seed(ChannelMessage::from_avatar("m1", "c1", "bob", "hi", 1));
        transport.seed(ChannelMessage::from_avatar("m2", "c1", "ada", "hi", 2));
        let tier = presence_tier(transport);
        let eligible = cast();

        // Everyone spoke recently and top-ranked ada spoke last: nobody.
        let list = ranked(&[("ada", 0.9), ("bob", 0.4)]);
        assert!(tier.select(&input(None, &eligible, &list)).await.unwrap().is_none());

        // bob tops the ranking and clears the secondary threshold.
        let bob_first = ranked(&[("bob", 0.4), ("ada", 0.2)]);
        assert_eq!(ids(tier.select(&input(None, &eligible, &bob_first)).await.unwrap()), vec!["bob"]);

        let low = ranked(&[("bob", 0.2), ("ada", 0.1)]);
        assert!(tier.select(&input(None, &eligible, &low)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_presence_tier_human_trigger_takes_top_ranked() {
        let tier = presence_tier(Arc::new(MockTransport::new()));
        let eligible = cast();
        let msg = ChannelMessage::human("m1", "c1", "u1", "hello all", 0);

        let list = ranked(&[("cy", 0.4), ("ada", 0.4)]);
        assert_eq!(ids(tier.select(&input(Some(&msg), &eligible, &list)).await.unwrap()), vec!["cy"]);

        let mut cooling = ranked(&[("bob", 0.1)]);
        cooling[0].record.cooldown_until = Some(NOW + 60_000);
        assert_eq!(ids(tier.select(&input(Some(&msg), &eligible, &cooling)).await.unwrap()), vec!["bob"]);

        let empty = ranked(&[]);
        assert!(tier.select(&input(Some(&msg), &eligible, &empty)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_legacy_tier_asks_top_candidates_in_order() {
        let decision = Arc::new(MockDecision::accepting(["cy"]));
        let tier = LegacyTier::new(decision.clone(), 2);
        let eligible = cast();
        let list = ranked(&[("ada", 0.9), ("bob", 0.5), ("cy", 0.1)]);

        assert!(tier.select(&input(None, &eligible, &list)).await.unwrap().is_none());
        assert_eq!(decision.asked(), vec!["ada", "bob"]);

        let wide = LegacyTier::new(decision, 3);
        assert_eq!(ids(wide.select(&input(None, &eligible, &list)).await.unwrap()), vec!["cy"]);
    }

    #[test]
    fn test_bot_messages_skip_policy_tiers() {
        let decision: Arc<dyn DecisionPredicate> = Arc::new(MockDecision::accepting_all());
        assert!(!LegacyTier::new(decision.clone(), 3).applies_to(TriggerKind::BotMessage));
        assert!(!ActiveSpeakerTier::new(decision, true).applies_to(TriggerKind::BotMessage));
    }
}
