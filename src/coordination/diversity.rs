//! Speaker diversity for unprompted turns.
//!
//! Avatars that wrote any of the channel's last few avatar messages are
//! skipped. When that leaves nobody, only the top-ranked avatar may still
//! speak, and only if its score clears one of the fallback thresholds and it
//! was not the very last speaker.

use std::sync::Arc;

use crate::coordination::speaker_cache::SpeakerCache;
use crate::presence::{InitiativeScorer, RankedAvatar};

pub struct DiversityFilter {
    speaker_cache: Arc<SpeakerCache>,
    scorer: Arc<dyn InitiativeScorer>,
    window: usize,
    thresholds: Vec<f64>,
}

impl DiversityFilter {
    pub fn new(
        speaker_cache: Arc<SpeakerCache>,
        scorer: Arc<dyn InitiativeScorer>,
        window: usize,
        thresholds: Vec<f64>,
    ) -> Self {
        Self {
            speaker_cache,
            scorer,
            window,
            thresholds,
        }
    }

    /// Filter `ranked` (best first) down to the avatars allowed an
    /// unprompted turn, keeping rank order.
    pub async fn apply<'r>(&self, channel_id: &str, ranked: &'r [RankedAvatar], now: i64) -> Vec<&'r RankedAvatar> {
        let recent = self.speaker_cache.recent_authors(channel_id, self.window, now).await;

        let diverse: Vec<&RankedAvatar> = ranked
            .iter()
            .filter(|r| !recent.iter().any(|a| a == r.avatar_id()) && !self.scorer.cooldown_active(&r.record, now))
            .collect();
        if !diverse.is_empty() {
            return diverse;
        }

        let Some(top) = ranked.first() else {
            return Vec::new();
        };
        if recent.first().is_some_and(|last| last == top.avatar_id()) {
            return Vec::new();
        }
        if self.thresholds.iter().any(|threshold| top.score > *threshold) {
            vec![top]
        } else {
            Vec::new()
        }
    }
}
