//! Short-lived cache of recent avatar-authored messages per channel.
//!
//! Used only for ambient speaker diversity, so it lives in process memory and
//! a transport failure simply yields an empty history. Expired channels are
//! dropped whenever another channel is refreshed.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::collaborators::{ChannelMessage, Transport};

#[derive(Debug, Clone)]
pub struct SpeakerCacheEntry {
    /// Newest first.
    pub messages: Vec<ChannelMessage>,
    pub cached_at: i64,
}

pub struct SpeakerCache {
    transport: Arc<dyn Transport>,
    ttl_ms: i64,
    capacity: usize,
    entries: RwLock<HashMap<String, SpeakerCacheEntry>>,
}

impl SpeakerCache {
    pub fn new(transport: Arc<dyn Transport>, ttl_ms: i64, capacity: usize) -> Self {
        Self {
            transport,
            ttl_ms,
            capacity,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Recent avatar messages in a channel, newest first.
    pub async fn recent(&self, channel_id: &str, now: i64) -> Vec<ChannelMessage> {
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(channel_id)
                && now - entry.cached_at < self.ttl_ms
            {
                return entry.messages.clone();
            }
        }

        let messages = match self.transport.fetch_recent_messages(channel_id, self.capacity).await {
            Ok(messages) => messages
                .into_iter()
                .filter(|m| m.author_is_bot)
                .take(self.capacity)
                .collect::<Vec<_>>(),
            Err(e) => {
                log::warn!("Speaker cache refresh failed for {}: {}", channel_id, e);
                return Vec::new();
            }
        };

        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| now - entry.cached_at < self.ttl_ms);
        entries.insert(
            channel_id.to_string(),
            SpeakerCacheEntry {
                messages: messages.clone(),
                cached_at: now,
            },
        );
        messages
    }

    /// Authors of the `n` most recent avatar messages.
    pub async fn recent_authors(&self, channel_id: &str, n: usize, now: i64) -> Vec<String> {
        self.recent(channel_id, now)
            .await
            .into_iter()
            .take(n)
            .map(|m| m.author_id)
            .collect()
    }

    /// Author of the most recent avatar message.
    pub async fn last_speaker(&self, channel_id: &str, now: i64) -> Option<String> {
        self.recent(channel_id, now).await.into_iter().next().map(|m| m.author_id)
    }

    /// Record a message we just sent. Only updates a cached channel; an
    /// uncached one is fetched in full on next use.
    pub async fn push(&self, message: ChannelMessage) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(&message.channel_id) {
            entry.messages.insert(0, message);
            entry.messages.truncate(self.capacity);
        }
    }

    pub async fn invalidate(&self, channel_id: &str) {
        self.entries.write().await.remove(channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::mock::MockTransport;

    fn seeded() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::new());
        transport.seed(ChannelMessage::from_avatar("m1", "c1", "a", "one", 1));
        transport.seed(ChannelMessage::human("m2", "c1", "u1", "two", 2));
        transport.seed(ChannelMessage::from_avatar("m3", "c1", "b", "three", 3));
        transport
    }

    #[tokio::test]
    async fn test_filters_to_avatar_messages() {
        let transport = seeded();
        let cache = SpeakerCache::new(transport, 30_000, 10);
        assert_eq!(cache.recent_authors("c1", 3, 0).await, vec!["b", "a"]);
        assert_eq!(cache.last_speaker("c1", 0).await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn test_ttl_controls_refetch() {
        let transport = seeded();
        let cache = SpeakerCache::new(transport.clone(), 30_000, 10);

        cache.recent("c1", 0).await;
        cache.recent("c1", 10_000).await;
        assert_eq!(transport.fetch_count(), 1);

        cache.recent("c1", 30_000).await;
        assert_eq!(transport.fetch_count(), 2);
    }

    #[tokio::test]
    async fn test_push_updates_cached_channel() {
        let transport = seeded();
        let cache = SpeakerCache::new(transport, 30_000, 2);
        cache.recent("c1", 0).await;

        cache.push(ChannelMessage::from_avatar("m4", "c1", "c", "four", 4)).await;
        assert_eq!(cache.recent_authors("c1", 10, 1).await, vec!["c", "b"]);
    }

    #[tokio::test]
    async fn test_fetch_failure_degrades_to_empty() {
        let transport = seeded();
        transport.set_fail_fetch(true);
        let cache = SpeakerCache::new(transport, 30_000, 10);
        assert!(cache.recent("c1", 0).await.is_empty());
        assert!(cache.last_speaker("c1", 0).await.is_none());
    }

    #[tokio::test]
    async fn test_refresh_evicts_expired_channels() {
        let transport = seeded();
        transport.seed(ChannelMessage::from_avatar("m5", "c2", "a", "five", 5));
        let cache = SpeakerCache::new(transport, 30_000, 10);

        cache.recent("c1", 0).await;
        cache.recent("c2", 10_000).await;
        assert_eq!(cache.entries.read().await.len(), 2);

        cache.recent("c2", 45_000).await;
        let entries = cache.entries.read().await;
        assert_eq!(entries.len(), 1);
        assert!(entries.contains_key("c2"));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let transport = seeded();
        let cache = SpeakerCache::new(transport.clone(), 30_000, 10);
        cache.recent("c1", 0).await;
        cache.invalidate("c1").await;
        cache.recent("c1", 1).await;
        assert_eq!(transport.fetch_count(), 2);
    }
}
