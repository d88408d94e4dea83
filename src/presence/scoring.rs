//! Initiative scoring for presence ranking.
//!
//! Scores only order candidates; they never decide correctness. Avatars are
//! scored by:
//! - Recency: time since last turn, saturating at 30 minutes (never spoken = full)
//! - Mention: linear decay over 10 minutes since the last mention
//! - Pins: +0.1 per priority pin, capped at +0.2
//! - Role: +0.1 for the channel's active speaker
//! - Topic: +0.1 when the avatar's tags overlap the channel topics
//!
//! Cooldown is a separate eligibility gate and does not affect the score.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use crate::presence::record::PresenceRecord;

pub const RECENCY_WEIGHT: f64 = 0.4;
/// Time since last turn at which the recency term saturates.
pub const RECENCY_SATURATION_MS: i64 = 30 * 60_000;

pub const MENTION_WEIGHT: f64 = 0.2;
/// Mentions older than this no longer contribute.
pub const MENTION_DECAY_MS: i64 = 10 * 60_000;

pub const PIN_WEIGHT: f64 = 0.1;
pub const PIN_WEIGHT_MAX: f64 = 0.2;

pub const ACTIVE_SPEAKER_WEIGHT: f64 = 0.1;
pub const TOPIC_WEIGHT: f64 = 0.1;

/// Inputs shared by every score computed in one ranking pass.
#[derive(Debug, Clone, Default)]
pub struct ScoringContext {
    pub now_ms: i64,
    pub channel_topics: BTreeSet<String>,
}

impl ScoringContext {
    pub fn at(now_ms: i64) -> Self {
        Self {
            now_ms,
            channel_topics: BTreeSet::new(),
        }
    }

    pub fn with_topics(mut self, topics: impl IntoIterator<Item = String>) -> Self {
        self.channel_topics = topics.into_iter().collect();
        self
    }
}

/// Replaceable scoring strategy.
pub trait InitiativeScorer: Send + Sync {
    /// Score in `[0, 1]`; higher means more eager to speak.
    fn score(&self, record: &PresenceRecord, ctx: &ScoringContext) -> f64;

    /// Whether the avatar is sitting out unprompted turns.
    fn cooldown_active(&self, record: &PresenceRecord, now_ms: i64) -> bool {
        record.cooldown_until.is_some_and(|until| now_ms < until)
    }
}

/// Weights for [`DefaultScorer`].
#[derive(Debug, Clone)]
pub struct ScoreWeights {
    pub recency: f64,
    pub recency_saturation_ms: i64,
    pub mention: f64,
    pub mention_decay_ms: i64,
    pub pin: f64,
    pub pin_max: f64,
    pub active_speaker: f64,
    pub topic: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            recency: RECENCY_WEIGHT,
            recency_saturation_ms: RECENCY_SATURATION_MS,
            mention: MENTION_WEIGHT,
            mention_decay_ms: MENTION_DECAY_MS,
            pin: PIN_WEIGHT,
            pin_max: PIN_WEIGHT_MAX,
            active_speaker: ACTIVE_SPEAKER_WEIGHT,
            topic: TOPIC_WEIGHT,
        }
    }
}

/// Weighted-sum scorer used unless the embedder supplies its own.
#[derive(Debug, Clone, Default)]
pub struct DefaultScorer {
    weights: ScoreWeights,
}

impl DefaultScorer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_weights(weights: ScoreWeights) -> Self {
        Self { weights }
    }
}

impl InitiativeScorer for DefaultScorer {
    fn score(&self, record: &PresenceRecord, ctx: &ScoringContext) -> f64 {
        let w = &self.weights;
        let mut score = 0.0;

        let recency = match record.last_turn_at {
            None => 1.0,
            Some(at) => fraction(ctx.now_ms - at, w.recency_saturation_ms),
        };
        score += recency * w.recency;

        if let Some(at) = record.last_mentioned_at {
            let freshness = 1.0 - fraction(ctx.now_ms - at, w.mention_decay_ms);
            score += freshness * w.mention;
        }

        score += (record.priority_pins as f64 * w.pin).min(w.pin_max);

        if record.is_active_speaker() {
            score += w.active_speaker;
        }

        if !ctx.channel_topics.is_empty() && !record.topic_tags.is_disjoint(&ctx.channel_topics) {
            score += w.topic;
        }

        score.clamp(0.0, 1.0)
    }
}

/// `elapsed / span` clamped to `[0, 1]`.
fn fraction(elapsed: i64, span: i64) -> f64 {
    if span <= 0 {
        return 1.0;
    }
    (elapsed.max(0) as f64 / span as f64).min(1.0)
}

/// A presence record paired with its score for one ranking pass.
#[derive(Debug, Clone)]
pub struct RankedAvatar {
    pub record: PresenceRecord,
    pub score: f64,
}

impl RankedAvatar {
    pub fn avatar_id(&self) -> &str {
        &self.record.avatar_id
    }
}

/// Total order used everywhere avatars are ranked.
///
/// score desc, pins desc, most recent mention desc, oldest last turn first
/// (never spoken before anyone who has), avatar id asc.
pub fn compare_ranked(a: &RankedAvatar, b: &RankedAvatar) -> Ordering {
    b.score
        .partial_cmp(&a.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| b.record.priority_pins.cmp(&a.record.priority_pins))
        .then_with(|| b.record.last_mentioned_at.cmp(&a.record.last_mentioned_at))
        .then_with(|| {
            let a_turn = a.record.last_turn_at.unwrap_or(i64::MIN);
            let b_turn = b.record.last_turn_at.unwrap_or(i64::MIN);
            a_turn.cmp(&b_turn)
        })
        .then_with(|| a.record.avatar_id.cmp(&b.record.avatar_id))
}

/// Score and sort records with [`compare_ranked`].
pub fn rank(records: Vec<PresenceRecord>, scorer: &dyn InitiativeScorer, ctx: &ScoringContext) -> Vec<RankedAvatar> {
    let mut ranked: Vec<RankedAvatar> = records
        .into_iter()
        .map(|record| {
            let score = scorer.score(&record, ctx);
            RankedAvatar { record, score }
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}
