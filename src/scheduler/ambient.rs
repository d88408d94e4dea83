//! Ambient sweep: unprompted turns in the most recently active channels.
//!
//! Each sweep advances the channel's tick, so every ambient turn belongs to a
//! fresh epoch. Message fast paths peek the same counter and lease against the
//! same `(channel, avatar, tick)` keys, which is what stops an avatar from
//! taking both an ambient and a fast-lane turn in one epoch.
//!
//! Ambient turns pass the same rate-limit gate as message-triggered ones,
//! keyed by the tick's ambient trigger key, and skip avatars that spoke in
//! the channel's last few avatar messages.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::watch;

use crate::collaborators::{Avatar, IdentityStore, ResponseOptions};
use crate::config::AmbientConfig;
use crate::coordination::TriggerKind;
use crate::coordination::diversity::DiversityFilter;
use crate::coordination::gate::GateRequest;
use crate::coordination::runner::{TurnOutcome, TurnRequest, TurnRunner};
use crate::error::Result;
use crate::id::{ambient_trigger_key, now_ms};
use crate::presence::{InitiativeScorer, PresenceStore, ScoringContext, rank};
use crate::scheduler::lease::{LeaseMeta, TurnLeaseRegistry};
use crate::scheduler::tick::TickCounter;
use crate::store::ActivityLog;

/// Ambient turns per channel for a sweep.
///
/// One slot per `per_slot` active humans (rounded up), at least one and at
/// most `max_k`.
pub fn ambient_k(active_humans: usize, per_slot: usize, max_k: usize) -> usize {
    active_humans.div_ceil(per_slot.max(1)).clamp(1, max_k.max(1))
}

pub struct AmbientScheduler {
    config: AmbientConfig,
    identity: Arc<dyn IdentityStore>,
    scorer: Arc<dyn InitiativeScorer>,
    activity: ActivityLog,
    presence: PresenceStore,
    ticks: TickCounter,
    leases: TurnLeaseRegistry,
    runner: Arc<TurnRunner>,
    diversity: Arc<DiversityFilter>,
}

impl AmbientScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: AmbientConfig,
        identity: Arc<dyn IdentityStore>,
        scorer: Arc<dyn InitiativeScorer>,
        activity: ActivityLog,
        presence: PresenceStore,
        ticks: TickCounter,
        leases: TurnLeaseRegistry,
        runner: Arc<TurnRunner>,
        diversity: Arc<DiversityFilter>,
    ) -> Self {
        Self {
            config,
            identity,
            scorer,
            activity,
            presence,
            ticks,
            leases,
            runner,
            diversity,
        }
    }

    /// Sweep the most recently active channels within the global budget.
    /// Returns the number of turns taken.
    pub async fn tick_all(&self) -> usize {
        let channels = match self.activity.recent_channels(self.config.channel_limit) {
            Ok(channels) => channels,
            Err(e) => {
                log::warn!("Ambient sweep could not load channels: {}", e);
                return 0;
            }
        };

        let mut remaining = self.config.global_budget;
        let mut taken = 0;
        for channel_id in channels {
            if remaining == 0 {
                tracing::debug!(taken, "Ambient budget exhausted");
                break;
            }
            let turns = self.on_channel_tick(&channel_id, remaining).await;
            remaining = remaining.saturating_sub(turns);
            taken += turns;
        }
        taken
    }

    /// Run ambient turns for one channel, at most `budget`. Errors are logged
    /// and count as zero turns.
    pub async fn on_channel_tick(&self, channel_id: &str, budget: usize) -> usize {
        if budget == 0 {
            return 0;
        }
        match self.channel_tick(channel_id, budget).await {
            Ok(turns) => turns,
            Err(e) => {
                tracing::warn!(channel_id, error = %e, "Ambient tick failed");
                0
            }
        }
    }

    async fn channel_tick(&self, channel_id: &str, budget: usize) -> Result<usize> {
        let now = now_ms();

        if let Some(activity) = self.activity.get(channel_id)?
            && let Some(last_human) = activity.last_human_at
            && now - last_human < self.config.human_suppression_ms
        {
            tracing::debug!(channel_id, "Ambient tick suppressed by recent human message");
            return Ok(0);
        }

        let tick_id = self.ticks.advance(channel_id, now)?;
        let humans = self
            .activity
            .active_humans(channel_id, now - self.config.active_human_window_ms)?;
        let k = ambient_k(humans, self.config.humans_per_slot, self.config.max_k).min(budget);

        let avatars = self.identity.list_avatars_in_channel(channel_id).await?;
        let candidates = self.candidates(channel_id, &avatars, now).await?;

        let options = ResponseOptions {
            trigger: TriggerKind::Ambient,
            tier: None,
            thread_token: None,
            depth: 0,
            trigger_key: ambient_trigger_key(channel_id, tick_id),
        };
        let meta = LeaseMeta::ambient();

        let mut turns = 0;
        for avatar in candidates {
            if turns >= k {
                break;
            }
            let Some(lease) = self.leases.try_acquire(channel_id, &avatar.id, tick_id, &meta, now_ms())? else {
                log::debug!("{} already has a turn in tick {} of {}", avatar.id, tick_id, channel_id);
                continue;
            };

            let outcome = self
                .runner
                .run(TurnRequest {
                    avatar: &avatar,
                    channel_id,
                    message: None,
                    options: &options,
                    gate: Some(GateRequest {
                        channel_id,
                        avatar_id: &avatar.id,
                        trigger_key: &options.trigger_key,
                        kind: TriggerKind::Ambient,
                        override_cooldown: false,
                    }),
                })
                .await;
            if matches!(outcome, TurnOutcome::Responded(_)) {
                turns += 1;
            }
            outcome.settle_lease(Some(lease));
        }

        tracing::debug!(channel_id, tick_id, k, humans, turns, "Ambient tick finished");
        Ok(turns)
    }

    /// Present avatars off cooldown that pass the diversity filter, best
    /// ranked first.
    async fn candidates(&self, channel_id: &str, avatars: &[Avatar], now: i64) -> Result<Vec<Avatar>> {
        let mut records = Vec::new();
        for avatar in avatars {
            let record = self.presence.ensure(channel_id, &avatar.id, now)?;
            if record.is_present() && !self.scorer.cooldown_active(&record, now) {
                records.push(record);
            }
        }

        let ctx = ScoringContext::at(now).with_topics(self.activity.channel_topics(channel_id)?);
        let ranked = rank(records, self.scorer.as_ref(), &ctx);
        let allowed = self.diversity.apply(channel_id, &ranked, now).await;
        Ok(allowed
            .into_iter()
            .filter_map(|r| avatars.iter().find(|a| a.id == r.avatar_id()).cloned())
            .collect())
    }

    /// Delay before the next sweep: the interval plus symmetric jitter.
    pub fn next_delay(&self) -> Duration {
        let interval = self.config.tick_interval_ms as i64;
        let jitter = self.config.tick_jitter_ms as i64;
        let offset = if jitter > 0 {
            rand::rng().random_range(-jitter..=jitter)
        } else {
            0
        };
        Duration::from_millis((interval + offset).max(1) as u64)
    }

    /// Sweep on the jittered interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!(
            "Ambient scheduler started ({}ms ± {}ms)",
            self.config.tick_interval_ms,
            self.config.tick_jitter_ms
        );
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.next_delay()) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let taken = self.tick_all().await;
            if taken > 0 {
                log::info!("Ambient sweep took {} turns", taken);
            }
        }
        log::info!("Ambient scheduler stopped");
    }
}
