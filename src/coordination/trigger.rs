//! Trigger classification.

use std::fmt;

use crate::collaborators::{Avatar, ChannelMessage};
use crate::coordination::mention::mentioned_avatars;

/// What started a coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerKind {
    /// Human message naming an avatar.
    Mention,
    HumanMessage,
    /// Message authored by an avatar or other bot.
    BotMessage,
    /// Periodic tick, no message.
    Ambient,
}

impl TriggerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mention => "mention",
            Self::HumanMessage => "human_message",
            Self::BotMessage => "bot_message",
            Self::Ambient => "ambient",
        }
    }

    /// Higher is more urgent.
    pub fn priority(&self) -> u8 {
        match self {
            Self::Mention => 3,
            Self::HumanMessage => 2,
            Self::BotMessage => 1,
            Self::Ambient => 0,
        }
    }

    /// Triggered by a human (sessions and affinity apply).
    pub fn is_human(&self) -> bool {
        matches!(self, Self::Mention | Self::HumanMessage)
    }
}

impl fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Trigger {
    pub kind: TriggerKind,
    pub priority: u8,
}

impl Trigger {
    pub fn new(kind: TriggerKind) -> Self {
        Self {
            kind,
            priority: kind.priority(),
        }
    }

    /// Classify a trigger from the message (if any) and the channel's avatars.
    pub fn classify(message: Option<&ChannelMessage>, avatars: &[Avatar]) -> Self {
        let kind = match message {
            None => TriggerKind::Ambient,
            Some(m) if m.author_is_bot || avatars.iter().any(|a| a.id == m.author_id) => TriggerKind::BotMessage,
            Some(m) if !mentioned_avatars(&m.content, avatars).is_empty() => TriggerKind::Mention,
            Some(_) => TriggerKind::HumanMessage,
        };
        Self::new(kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn avatars() -> Vec<Avatar> {
        vec![Avatar::new("ada", "Ada"), Avatar::new("bob", "Bob")]
    }

    #[test]
    fn test_priorities() {
        assert!(TriggerKind::Mention.priority() > TriggerKind::HumanMessage.priority());
        assert!(TriggerKind::HumanMessage.priority() > TriggerKind::BotMessage.priority());
        assert!(TriggerKind::BotMessage.priority() > TriggerKind::Ambient.priority());
        assert_eq!(Trigger::new(TriggerKind::Mention).priority, 3);
    }

    #[test]
    fn test_classify() {
        let avatars = avatars();
        assert_eq!(Trigger::classify(None, &avatars).kind, TriggerKind::Ambient);

        let plain = ChannelMessage::human("m1", "c1", "u1", "anyone around?", 0);
        assert_eq!(Trigger::classify(Some(&plain), &avatars).kind, TriggerKind::HumanMessage);

        let named = ChannelMessage::human("m2", "c1", "u1", "hey ada, thoughts?", 0);
        assert_eq!(Trigger::classify(Some(&named), &avatars).kind, TriggerKind::Mention);

        let bot = ChannelMessage::from_avatar("m3", "c1", "bob", "ada, agreed", 0);
        assert_eq!(Trigger::classify(Some(&bot), &avatars).kind, TriggerKind::BotMessage);
    }

    #[test]
    fn test_author_matching_avatar_is_bot_message() {
        let avatars = avatars();
        let msg = ChannelMessage::human("m1", "c1", "ada", "hello", 0);
        assert_eq!(Trigger::classify(Some(&msg), &avatars).kind, TriggerKind::BotMessage);
    }

    #[test]
    fn test_human_kinds() {
        assert!(TriggerKind::Mention.is_human());
        assert!(TriggerKind::HumanMessage.is_human());
        assert!(!TriggerKind::BotMessage.is_human());
        assert!(!TriggerKind::Ambient.is_human());
        assert_eq!(TriggerKind::BotMessage.to_string(), "bot_message");
    }
}
