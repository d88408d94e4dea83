//! Presence record types.
//!
//! One `PresenceRecord` per (channel, avatar) pair holds the conversational
//! state the scheduler ranks on: when the avatar last spoke, when it was last
//! mentioned or summoned, outstanding summon credits, pins and cooldown.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Whether an avatar is currently taking part in a channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum PresenceState {
    Present,
    Absent,
}

impl PresenceState {
    /// Get the string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceState::Present => "present",
            PresenceState::Absent => "absent",
        }
    }

    /// Parse the stored representation.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "present" => Some(PresenceState::Present),
            "absent" => Some(PresenceState::Absent),
            _ => None,
        }
    }
}

impl std::fmt::Display for PresenceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Explicit conversational role assigned to an avatar in a channel.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConversationRole {
    /// Holds the floor in turn-based mode
    ActiveSpeaker,
}

impl ConversationRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConversationRole::ActiveSpeaker => "active_speaker",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active_speaker" => Some(ConversationRole::ActiveSpeaker),
            _ => None,
        }
    }
}

/// Conversational state of one avatar in one channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PresenceRecord {
    pub channel_id: String,
    pub avatar_id: String,
    pub state: PresenceState,

    /// Unix ms of the avatar's last completed turn here
    pub last_turn_at: Option<i64>,
    pub last_mentioned_at: Option<i64>,
    pub last_summoned_at: Option<i64>,

    /// Guaranteed turns left from a summon grant
    pub new_summon_turns_remaining: u32,
    pub priority_pins: u32,
    pub topic_tags: BTreeSet<String>,
    pub conversation_role: Option<ConversationRole>,

    /// Avatar is ineligible for unprompted turns until this time
    pub cooldown_until: Option<i64>,
    pub turns_taken: u64,
    pub updated_at: i64,
}

impl PresenceRecord {
    /// A fresh, present record with no history.
    pub fn new(channel_id: impl Into<String>, avatar_id: impl Into<String>, now: i64) -> Self {
        Self {
            channel_id: channel_id.into(),
            avatar_id: avatar_id.into(),
            state: PresenceState::Present,
            last_turn_at: None,
            last_mentioned_at: None,
            last_summoned_at: None,
            new_summon_turns_remaining: 0,
            priority_pins: 0,
            topic_tags: BTreeSet::new(),
            conversation_role: None,
            cooldown_until: None,
            turns_taken: 0,
            updated_at: now,
        }
    }

    pub fn is_present(&self) -> bool {
        self.state == PresenceState::Present
    }

    pub fn is_active_speaker(&self) -> bool {
        self.conversation_role == Some(ConversationRole::ActiveSpeaker)
    }

    pub fn has_summon_credit(&self) -> bool {
        self.new_summon_turns_remaining > 0
    }
}
