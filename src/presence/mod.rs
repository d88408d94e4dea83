//! Presence tracking and initiative scoring.
//!
//! This module provides:
//! - **PresenceRecord**: per (channel, avatar) conversational state
//! - **PresenceStore**: lazy creation and atomic mutation of those records
//! - **InitiativeScorer**: replaceable ranking policy with a weighted default
//! - **rank**: the deterministic ordering shared by the ambient sweep and the
//!   coordinator's presence tiers

mod record;
mod scoring;
mod store;

pub use record::{ConversationRole, PresenceRecord, PresenceState};
pub use scoring::{
    ACTIVE_SPEAKER_WEIGHT, DefaultScorer, InitiativeScorer, MENTION_DECAY_MS, MENTION_WEIGHT, PIN_WEIGHT, PIN_WEIGHT_MAX,
    RECENCY_SATURATION_MS, RECENCY_WEIGHT, RankedAvatar, ScoreWeights, ScoringContext, TOPIC_WEIGHT, compare_ranked,
    rank,
};
pub use store::PresenceStore;
