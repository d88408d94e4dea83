//! Configuration sections.
//!
//! Each component takes only its own section. All durations are milliseconds.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where the coordination store lives.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// SQLite database file. Defaults to `<data-local-dir>/chorus/chorus.db`.
    pub db_path: Option<PathBuf>,
}

/// Ambient sweep settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AmbientConfig {
    /// Interval between sweeps.
    pub tick_interval_ms: u64,

    /// Symmetric random jitter applied to every interval.
    pub tick_jitter_ms: u64,

    /// Responses allowed across all channels in one sweep.
    pub global_budget: usize,

    /// Responses allowed in one channel per sweep.
    pub max_k: usize,

    /// Most recently active channels considered per sweep.
    pub channel_limit: usize,

    /// Active humans per extra ambient slot.
    pub humans_per_slot: usize,

    /// Window for counting a human as active.
    pub active_human_window_ms: i64,

    /// Ambient stays quiet this long after a human message.
    pub human_suppression_ms: i64,
}

impl Default for AmbientConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 60_000,
            tick_jitter_ms: 10_000,
            global_budget: 10,
            max_k: 3,
            channel_limit: 50,
            humans_per_slot: 5,
            active_human_window_ms: 10 * 60_000,
            human_suppression_ms: 15_000,
        }
    }
}

/// Responder selection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CoordinationConfig {
    /// Responses produced for one trigger.
    pub max_responses_per_message: usize,

    /// Sticky affinity wins without consulting the decision predicate.
    pub sticky_affinity_exclusive: bool,

    /// Lifetime of a user -> avatar affinity pin.
    pub affinity_ttl_ms: i64,

    /// Enables the active-speaker tier.
    pub turn_based_mode: bool,

    /// Presence cooldown started by every completed turn.
    pub turn_cooldown_ms: i64,

    pub speaker_cache_ttl_ms: i64,
    pub speaker_cache_size: usize,

    /// Recent avatar messages whose authors are skipped by ambient selection.
    pub diversity_window: usize,

    /// Score thresholds tried in order when diversity filtering empties the pool.
    pub fallback_score_thresholds: Vec<f64>,

    /// Top-ranked avatars offered to the decision predicate by the last tier.
    pub legacy_candidates: usize,

    /// Nested coordinations a single call may start from mentions.
    pub mention_cascade_fanout: usize,

    /// Turns a cascade-opened thread lasts.
    pub thread_turns: u32,
    pub thread_ttl_ms: i64,
}

impl Default for CoordinationConfig {
    fn default() -> Self {
        Self {
            max_responses_per_message: 2,
            sticky_affinity_exclusive: false,
            affinity_ttl_ms: 30 * 60_000,
            turn_based_mode: false,
            turn_cooldown_ms: 2 * 60_000,
            speaker_cache_ttl_ms: 30_000,
            speaker_cache_size: 10,
            diversity_window: 3,
            fallback_score_thresholds: vec![0.5, 0.3],
            legacy_candidates: 3,
            mention_cascade_fanout: 2,
            thread_turns: 4,
            thread_ttl_ms: 5 * 60_000,
        }
    }
}

/// Rate-limit gate settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GateConfig {
    /// Minimum gap between bot outputs for different triggers.
    pub channel_cooldown_ms: i64,

    /// Same, for triggers that are themselves bot messages.
    pub bot_reply_cooldown_ms: i64,

    /// Distinct avatars admitted for one trigger.
    pub max_responders_per_trigger: usize,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            channel_cooldown_ms: 2_000,
            bot_reply_cooldown_ms: 0,
            max_responders_per_trigger: 2,
        }
    }
}

/// TTLs for locks and leases.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LockConfig {
    pub response_lock_ttl_ms: i64,
    pub lease_ttl_ms: i64,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            response_lock_ttl_ms: 5_000,
            lease_ttl_ms: 10 * 60_000,
        }
    }
}

/// Janitor settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct JanitorConfig {
    pub interval_ms: u64,

    /// Per-trigger responder rows older than this are dropped.
    pub responder_retention_ms: i64,

    /// Reply attribution rows older than this are dropped.
    pub avatar_message_retention_ms: i64,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval_ms: 30_000,
            responder_retention_ms: 60 * 60_000,
            avatar_message_retention_ms: 7 * 24 * 60 * 60_000,
        }
    }
}
