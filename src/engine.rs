//! Engine facade: wires the store, collaborators and schedulers together.
//!
//! ```ignore
//! let store = Arc::new(CoordinationStore::open(&config.db_path())?);
//! let engine = Engine::new(config, store, collaborators);
//! let handle = engine.start();
//!
//! // from the platform's message hook
//! engine.on_human_message("channel-1", &message).await;
//!
//! handle.shutdown().await;
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collaborators::{ChannelMessage, Collaborators};
use crate::config::EngineConfig;
use crate::coordination::{
    CoordinatedResponse, CoordinationContext, Coordinator, DiversityFilter, Janitor, JanitorReport, RateLimitGate,
    ResponseLock, SpeakerCache, TurnRunner,
};
use crate::error::Result;
use crate::id::now_ms;
use crate::presence::{DefaultScorer, InitiativeScorer, PresenceStore};
use crate::scheduler::{AmbientScheduler, TickCounter, TurnLeaseRegistry};
use crate::store::{ActivityLog, CoordinationStore};

pub struct Engine {
    activity: ActivityLog,
    presence: PresenceStore,
    ticks: TickCounter,
    coordinator: Arc<Coordinator>,
    ambient: Arc<AmbientScheduler>,
    janitor: Arc<Janitor>,
}

impl Engine {
    pub fn new(config: EngineConfig, store: Arc<CoordinationStore>, collaborators: Collaborators) -> Self {
        Self::with_scorer(config, store, collaborators, Arc::new(DefaultScorer::new()))
    }

    /// Build an engine that ranks avatars with a custom scorer.
    pub fn with_scorer(
        config: EngineConfig,
        store: Arc<CoordinationStore>,
        collaborators: Collaborators,
        scorer: Arc<dyn InitiativeScorer>,
    ) -> Self {
        let activity = ActivityLog::new(store.clone());
        let presence = PresenceStore::new(store.clone());
        let ticks = TickCounter::new(store.clone());
        let leases = TurnLeaseRegistry::new(store.clone(), config.locks.lease_ttl_ms);

        let speaker_cache = Arc::new(SpeakerCache::new(
            collaborators.transport.clone(),
            config.coordination.speaker_cache_ttl_ms,
            config.coordination.speaker_cache_size,
        ));
        let runner = Arc::new(TurnRunner::new(
            collaborators.clone(),
            ResponseLock::new(store.clone(), config.locks.response_lock_ttl_ms),
            RateLimitGate::new(store.clone(), config.gate.clone()),
            presence.clone(),
            activity.clone(),
            speaker_cache.clone(),
            config.coordination.turn_cooldown_ms,
        ));
        let diversity = Arc::new(DiversityFilter::new(
            speaker_cache,
            scorer.clone(),
            config.coordination.diversity_window,
            config.coordination.fallback_score_thresholds.clone(),
        ));

        let coordinator = Coordinator::new(
            store.clone(),
            collaborators.clone(),
            config.coordination.clone(),
            scorer.clone(),
            runner.clone(),
            diversity.clone(),
            config.locks.lease_ttl_ms,
        );
        let ambient = AmbientScheduler::new(
            config.ambient.clone(),
            collaborators.identity.clone(),
            scorer,
            activity.clone(),
            presence.clone(),
            ticks.clone(),
            leases,
            runner,
            diversity,
        );
        let janitor = Janitor::new(store, &config);

        Self {
            activity,
            presence,
            ticks,
            coordinator: Arc::new(coordinator),
            ambient: Arc::new(ambient),
            janitor: Arc::new(janitor),
        }
    }

    /// Handle an incoming channel message on the fast path.
    ///
    /// Records human activity (suppression window, active-human count), then
    /// coordinates responses inside the channel's current epoch. Returns
    /// whether any avatar responded. Failures are logged, never returned.
    pub async fn on_human_message(&self, channel_id: &str, message: &ChannelMessage) -> bool {
        let now = now_ms();
        if !message.author_is_bot
            && let Err(e) = self.activity.record_human_message(channel_id, &message.author_id, now)
        {
            log::warn!("Failed to record human activity in {}: {}", channel_id, e);
        }

        let tick_id = match self.ticks.peek(channel_id, now) {
            Ok(tick_id) => tick_id,
            Err(e) => {
                log::warn!("Failed to read tick for {}: {}", channel_id, e);
                return false;
            }
        };

        match self
            .coordinator
            .coordinate_response(channel_id, Some(message), CoordinationContext::fast_path(tick_id))
            .await
        {
            Ok(responses) => {
                log::debug!("{} responses to {} in {}", responses.len(), message.id, channel_id);
                !responses.is_empty()
            }
            Err(e) => {
                tracing::warn!(channel_id, message_id = message.id.as_str(), error = %e, "Coordination failed");
                false
            }
        }
    }

    /// Run one ambient sweep now.
    pub async fn tick_all(&self) -> usize {
        self.ambient.tick_all().await
    }

    pub async fn on_channel_tick(&self, channel_id: &str, budget: usize) -> usize {
        self.ambient.on_channel_tick(channel_id, budget).await
    }

    pub async fn coordinate_response(
        &self,
        channel_id: &str,
        message: Option<&ChannelMessage>,
        ctx: CoordinationContext,
    ) -> Result<Vec<CoordinatedResponse>> {
        self.coordinator.coordinate_response(channel_id, message, ctx).await
    }

    /// Grant a freshly introduced avatar `turns` guaranteed turns.
    pub fn summon(&self, channel_id: &str, avatar_id: &str, turns: u32) -> Result<()> {
        self.presence.grant_summon(channel_id, avatar_id, turns, now_ms())
    }

    /// Replace the topics a channel is about; avatars tagged with any of
    /// them rank higher there.
    pub fn set_channel_topics(&self, channel_id: &str, topics: &BTreeSet<String>) -> Result<()> {
        self.activity.set_channel_topics(channel_id, topics, now_ms())
    }

    pub fn presence(&self) -> &PresenceStore {
        &self.presence
    }

    pub fn run_janitor(&self) -> Result<JanitorReport> {
        self.janitor.run_once(now_ms())
    }

    /// Spawn the ambient sweep and the janitor as background tasks.
    pub fn start(&self) -> EngineHandle {
        let (shutdown, rx) = watch::channel(false);

        let ambient = self.ambient.clone();
        let ambient_rx = rx.clone();
        let janitor = self.janitor.clone();

        let tasks = vec![
            tokio::spawn(async move { ambient.run(ambient_rx).await }),
            tokio::spawn(async move { janitor.run(rx).await }),
        ];
        EngineHandle { shutdown, tasks }
    }
}

/// Background tasks started by [`Engine::start`].
pub struct EngineHandle {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl EngineHandle {
    /// Signal the background tasks and wait for them to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(e) = task.await {
                log::warn!("Background task ended abnormally: {}", e);
            }
        }
    }
}
