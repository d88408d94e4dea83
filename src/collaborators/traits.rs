//! Contracts for the services the engine drives but does not own.

use async_trait::async_trait;

use crate::collaborators::types::{Avatar, ChannelMessage, GeneratedMessage, ResponseOptions};
use crate::error::Result;

/// Produces reply text for an avatar. May be slow and may send the message
/// itself, in which case it reports the platform message id.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// `Ok(None)` means the avatar chose to stay silent.
    async fn generate(
        &self,
        avatar: &Avatar,
        channel_id: &str,
        message: Option<&ChannelMessage>,
        options: &ResponseOptions,
    ) -> Result<Option<GeneratedMessage>>;
}

/// Messaging platform access.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Most recent messages in a channel, newest first.
    async fn fetch_recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChannelMessage>>;

    /// Send `text` as `avatar`; returns the platform message id.
    async fn send_message(&self, channel_id: &str, avatar: &Avatar, text: &str) -> Result<String>;

    /// Move an avatar into a channel.
    async fn relocate_avatar(&self, avatar: &Avatar, channel_id: &str) -> Result<()>;
}

/// Avatar persistence.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    async fn get_avatar(&self, avatar_id: &str) -> Result<Option<Avatar>>;

    /// Avatars currently "in" a channel.
    async fn list_avatars_in_channel(&self, channel_id: &str) -> Result<Vec<Avatar>>;

    /// Update the avatar's last-activity timestamp.
    async fn touch_avatar(&self, avatar_id: &str, at: i64) -> Result<()>;
}

/// External "should this avatar answer" judgement.
#[async_trait]
pub trait DecisionPredicate: Send + Sync {
    async fn should_respond(&self, channel_id: &str, avatar: &Avatar, message: Option<&ChannelMessage>) -> Result<bool>;
}

/// (channel, user) -> avatar pins with a TTL.
#[async_trait]
pub trait AffinityStore: Send + Sync {
    /// Live (unexpired) pin for a user.
    async fn get(&self, channel_id: &str, user_id: &str) -> Result<Option<String>>;

    /// Create or refresh a pin.
    async fn set(&self, channel_id: &str, user_id: &str, avatar_id: &str, ttl_ms: i64) -> Result<()>;
}
