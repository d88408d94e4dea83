//! In-memory collaborators for tests and local experiments.
//!
//! Each mock records what the engine asked of it so tests can assert on
//! calls, and exposes knobs to make individual avatars fail or stay silent.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::collaborators::traits::{DecisionPredicate, GenerationService, IdentityStore, Transport};
use crate::collaborators::types::{Avatar, ChannelMessage, GeneratedMessage, ResponseOptions};
use crate::error::{ChorusError, Result};
use crate::id::now_ms;

fn guard<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One recorded `generate` call.
#[derive(Debug, Clone)]
pub struct GenerationCall {
    pub avatar_id: String,
    pub channel_id: String,
    pub message_id: Option<String>,
    pub options: ResponseOptions,
}

/// Generation service that answers with canned text.
#[derive(Debug, Default)]
pub struct MockGeneration {
    calls: Mutex<Vec<GenerationCall>>,
    replies: Mutex<HashMap<String, String>>,
    failing: Mutex<HashSet<String>>,
    silent: Mutex<HashSet<String>>,
    delay: Option<Duration>,
}

impl MockGeneration {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call (for overlap tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Use `text` instead of the default reply for an avatar.
    pub fn reply_with(&self, avatar_id: &str, text: &str) {
        guard(&self.replies).insert(avatar_id.to_string(), text.to_string());
    }

    /// Make every call for an avatar return an error.
    pub fn fail_for(&self, avatar_id: &str) {
        guard(&self.failing).insert(avatar_id.to_string());
    }

    /// Make every call for an avatar return no text.
    pub fn silent_for(&self, avatar_id: &str) {
        guard(&self.silent).insert(avatar_id.to_string());
    }

    pub fn calls(&self) -> Vec<GenerationCall> {
        guard(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        guard(&self.calls).len()
    }

    /// Avatar ids in call order.
    pub fn responders(&self) -> Vec<String> {
        guard(&self.calls).iter().map(|c| c.avatar_id.clone()).collect()
    }
}

#[async_trait]
impl GenerationService for MockGeneration {
    async fn generate(
        &self,
        avatar: &Avatar,
        channel_id: &str,
        message: Option<&ChannelMessage>,
        options: &ResponseOptions,
    ) -> Result<Option<GeneratedMessage>> {
        guard(&self.calls).push(GenerationCall {
            avatar_id: avatar.id.clone(),
            channel_id: channel_id.to_string(),
            message_id: message.map(|m| m.id.clone()),
            options: options.clone(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if guard(&self.failing).contains(&avatar.id) {
            return Err(ChorusError::Generation(format!("{} failed to generate", avatar.id)));
        }
        if guard(&self.silent).contains(&avatar.id) {
            return Ok(None);
        }

        let text = guard(&self.replies)
            .get(&avatar.id)
            .cloned()
            .unwrap_or_else(|| format!("{} here", avatar.name));
        Ok(Some(GeneratedMessage::unsent(text)))
    }
}

/// A message sent through [`MockTransport`].
#[derive(Debug, Clone)]
pub struct SentMessage {
    pub message_id: String,
    pub channel_id: String,
    pub avatar_id: String,
    pub text: String,
}

/// Transport backed by per-channel message lists (newest first).
#[derive(Debug, Default)]
pub struct MockTransport {
    history: Mutex<HashMap<String, Vec<ChannelMessage>>>,
    sent: Mutex<Vec<SentMessage>>,
    relocations: Mutex<Vec<(String, String)>>,
    next_id: AtomicU64,
    fetches: AtomicUsize,
    fail_fetch: AtomicBool,
    fail_relocate: AtomicBool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message to a channel's history as the newest entry.
    pub fn seed(&self, message: ChannelMessage) {
        guard(&self.history)
            .entry(message.channel_id.clone())
            .or_default()
            .insert(0, message);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_relocate(&self, fail: bool) {
        self.fail_relocate.store(fail, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentMessage> {
        guard(&self.sent).clone()
    }

    pub fn relocations(&self) -> Vec<(String, String)> {
        guard(&self.relocations).clone()
    }

    /// Number of `fetch_recent_messages` calls so far.
    pub fn fetch_count(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn fetch_recent_messages(&self, channel_id: &str, limit: usize) -> Result<Vec<ChannelMessage>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ChorusError::Transport("fetch unavailable".to_string()));
        }
        Ok(guard(&self.history)
            .get(channel_id)
            .map(|msgs| msgs.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn send_message(&self, channel_id: &str, avatar: &Avatar, text: &str) -> Result<String> {
        let n = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let message_id = format!("sent-{}", n);
        self.seed(ChannelMessage::from_avatar(&message_id, channel_id, &avatar.id, text, now_ms()));
        guard(&self.sent).push(SentMessage {
            message_id: message_id.clone(),
            channel_id: channel_id.to_string(),
            avatar_id: avatar.id.clone(),
            text: text.to_string(),
        });
        Ok(message_id)
    }

    async fn relocate_avatar(&self, avatar: &Avatar, channel_id: &str) -> Result<()> {
        if self.fail_relocate.load(Ordering::SeqCst) {
            return Err(ChorusError::Transport("relocation unavailable".to_string()));
        }
        guard(&self.relocations).push((avatar.id.clone(), channel_id.to_string()));
        Ok(())
    }
}

/// Identity store over an in-memory avatar map.
#[derive(Debug, Default)]
pub struct MockIdentity {
    avatars: Mutex<BTreeMap<String, Avatar>>,
    touches: Mutex<Vec<(String, i64)>>,
    fail_listing: AtomicBool,
}

impl MockIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_avatars(avatars: impl IntoIterator<Item = Avatar>) -> Self {
        let identity = Self::new();
        for avatar in avatars {
            identity.add(avatar);
        }
        identity
    }

    pub fn add(&self, avatar: Avatar) {
        guard(&self.avatars).insert(avatar.id.clone(), avatar);
    }

    /// Move an avatar to a channel.
    pub fn move_to(&self, avatar_id: &str, channel_id: &str) {
        if let Some(avatar) = guard(&self.avatars).get_mut(avatar_id) {
            avatar.channel_id = Some(channel_id.to_string());
        }
    }

    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }

    pub fn touches(&self) -> Vec<(String, i64)> {
        guard(&self.touches).clone()
    }
}

#[async_trait]
impl IdentityStore for MockIdentity {
    async fn get_avatar(&self, avatar_id: &str) -> Result<Option<Avatar>> {
        Ok(guard(&self.avatars).get(avatar_id).cloned())
    }

    async fn list_avatars_in_channel(&self, channel_id: &str) -> Result<Vec<Avatar>> {
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(ChorusError::Identity("identity store unavailable".to_string()));
        }
        Ok(guard(&self.avatars)
            .values()
            .filter(|a| a.is_in(channel_id))
            .cloned()
            .collect())
    }

    async fn touch_avatar(&self, avatar_id: &str, at: i64) -> Result<()> {
        guard(&self.touches).push((avatar_id.to_string(), at));
        Ok(())
    }
}

/// Decision predicate with a fixed answer list.
#[derive(Debug)]
pub struct MockDecision {
    accept_all: bool,
    accepted: Mutex<HashSet<String>>,
    asked: Mutex<Vec<String>>,
}

impl MockDecision {
    pub fn accepting_all() -> Self {
        Self {
            accept_all: true,
            accepted: Mutex::new(HashSet::new()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn rejecting_all() -> Self {
        Self {
            accept_all: false,
            ..Self::accepting_all()
        }
    }

    /// Accept only the listed avatars.
    pub fn accepting<'a>(avatar_ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self {
            accept_all: false,
            accepted: Mutex::new(avatar_ids.into_iter().map(String::from).collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    /// Avatar ids the predicate was asked about, in order.
    pub fn asked(&self) -> Vec<String> {
        guard(&self.asked).clone()
    }
}

#[async_trait]
impl DecisionPredicate for MockDecision {
    async fn should_respond(&self, _channel_id: &str, avatar: &Avatar, _message: Option<&ChannelMessage>) -> Result<bool> {
        guard(&self.asked).push(avatar.id.clone());
        Ok(self.accept_all || guard(&self.accepted).contains(&avatar.id))
    }
}
