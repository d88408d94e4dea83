//! Values exchanged with collaborators.

use serde::{Deserialize, Serialize};

use crate::coordination::{TierKind, TriggerKind};

/// An autonomous conversational actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Avatar {
    pub id: String,
    pub name: String,

    #[serde(default)]
    pub emoji: Option<String>,

    /// Extra names the avatar answers to.
    #[serde(default)]
    pub aliases: Vec<String>,

    /// Channel the avatar is currently "in", if any.
    #[serde(default)]
    pub channel_id: Option<String>,
}

impl Avatar {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            emoji: None,
            aliases: Vec::new(),
            channel_id: None,
        }
    }

    pub fn with_emoji(mut self, emoji: impl Into<String>) -> Self {
        self.emoji = Some(emoji.into());
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    pub fn in_channel(mut self, channel_id: impl Into<String>) -> Self {
        self.channel_id = Some(channel_id.into());
        self
    }

    pub fn is_in(&self, channel_id: &str) -> bool {
        self.channel_id.as_deref() == Some(channel_id)
    }
}

/// Pointer to the message a reply answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRef {
    pub message_id: String,

    /// Author of the referenced message, when the transport knows it.
    #[serde(default)]
    pub author_id: Option<String>,
}

/// A platform message seen in a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMessage {
    pub id: String,
    pub channel_id: String,
    pub author_id: String,

    /// Authored by an avatar or another bot rather than a human.
    #[serde(default)]
    pub author_is_bot: bool,

    pub content: String,

    #[serde(default)]
    pub reply_to: Option<MessageRef>,

    pub created_at: i64,
}

impl ChannelMessage {
    /// A human-authored message.
    pub fn human(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        author_id: impl Into<String>,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            id: id.into(),
            channel_id: channel_id.into(),
            author_id: author_id.into(),
            author_is_bot: false,
            content: content.into(),
            reply_to: None,
            created_at,
        }
    }

    /// A message authored by an avatar.
    pub fn from_avatar(
        id: impl Into<String>,
        channel_id: impl Into<String>,
        avatar_id: impl Into<String>,
        content: impl Into<String>,
        created_at: i64,
    ) -> Self {
        Self {
            author_is_bot: true,
            ..Self::human(id, channel_id, avatar_id, content, created_at)
        }
    }

    pub fn replying_to(mut self, message_id: impl Into<String>, author_id: Option<String>) -> Self {
        self.reply_to = Some(MessageRef {
            message_id: message_id.into(),
            author_id,
        });
        self
    }
}

/// Output of the generation service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedMessage {
    /// Platform id when the generator already sent the message itself.
    pub message_id: Option<String>,
    pub text: String,
}

impl GeneratedMessage {
    /// Text the engine still has to send through the transport.
    pub fn unsent(text: impl Into<String>) -> Self {
        Self {
            message_id: None,
            text: text.into(),
        }
    }

    /// Text the generator already posted as `message_id`.
    pub fn sent(message_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            message_id: Some(message_id.into()),
            text: text.into(),
        }
    }
}

/// Per-avatar context handed to the generation service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseOptions {
    pub trigger: TriggerKind,

    /// Tier that selected the avatar; None for ambient sweep turns.
    pub tier: Option<TierKind>,

    /// Continuation token of the thread being answered.
    pub thread_token: Option<String>,

    /// Mention cascade depth (0 for the original trigger).
    pub depth: u8,

    pub trigger_key: String,
}

impl ResponseOptions {
    pub fn is_ambient(&self) -> bool {
        self.trigger == TriggerKind::Ambient
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_avatar_builder() {
        let avatar = Avatar::new("a1", "Ada").with_emoji("🦊").with_alias("countess").in_channel("c1");
        assert_eq!(avatar.emoji.as_deref(), Some("🦊"));
        assert_eq!(avatar.aliases, vec!["countess"]);
        assert!(avatar.is_in("c1"));
        assert!(!avatar.is_in("c2"));
    }

    #[test]
    fn test_message_constructors() {
        let human = ChannelMessage::human("m1", "c1", "u1", "hello", 10);
        assert!(!human.author_is_bot);
        assert!(human.reply_to.is_none());

        let bot = ChannelMessage::from_avatar("m2", "c1", "a1", "hi", 11).replying_to("m1", Some("u1".to_string()));
        assert!(bot.author_is_bot);
        assert_eq!(bot.reply_to.unwrap().message_id, "m1");
    }

    #[test]
    fn test_generated_message() {
        assert_eq!(GeneratedMessage::unsent("x").message_id, None);
        assert_eq!(GeneratedMessage::sent("m1", "x").message_id.as_deref(), Some("m1"));
    }

    #[test]
    fn test_avatar_deserializes_with_defaults() {
        let avatar: Avatar = serde_json::from_str(r#"{"id":"a1","name":"Ada"}"#).unwrap();
        assert!(avatar.aliases.is_empty());
        assert!(avatar.channel_id.is_none());
    }
}
