//! Periodic reconciliation of expired coordination rows.
//!
//! TTLs are never enforced by a timer on the row itself. Anything past its
//! expiry stays until a janitor pass deletes it, so readers must always
//! compare against `now` themselves.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::config::EngineConfig;
use crate::coordination::affinity::StoreAffinity;
use crate::coordination::gate::RateLimitGate;
use crate::coordination::lock::ResponseLock;
use crate::coordination::session::SessionStore;
use crate::coordination::threads::ThreadRegistry;
use crate::error::Result;
use crate::id::now_ms;
use crate::scheduler::TurnLeaseRegistry;
use crate::store::{ActivityLog, CoordinationStore};

/// Rows removed by one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub locks: usize,
    pub leases: usize,
    pub threads: usize,
    pub responders: usize,
    pub affinities: usize,
    pub avatar_messages: usize,
    pub sessions: usize,
    pub human_activity: usize,
}

impl JanitorReport {
    pub fn total(&self) -> usize {
        self.locks
            + self.leases
            + self.threads
            + self.responders
            + self.affinities
            + self.avatar_messages
            + self.sessions
            + self.human_activity
    }
}

pub struct Janitor {
    interval: Duration,
    responder_retention_ms: i64,
    avatar_message_retention_ms: i64,
    session_idle_ms: i64,
    human_window_ms: i64,
    locks: ResponseLock,
    leases: TurnLeaseRegistry,
    threads: ThreadRegistry,
    gate: RateLimitGate,
    affinity: StoreAffinity,
    activity: ActivityLog,
    sessions: SessionStore,
}

impl Janitor {
    pub fn new(store: Arc<CoordinationStore>, config: &EngineConfig) -> Self {
        let coordination = &config.coordination;
        Self {
            interval: Duration::from_millis(config.janitor.interval_ms),
            responder_retention_ms: config.janitor.responder_retention_ms,
            avatar_message_retention_ms: config.janitor.avatar_message_retention_ms,
            session_idle_ms: coordination.affinity_ttl_ms,
            human_window_ms: config.ambient.active_human_window_ms,
            locks: ResponseLock::new(store.clone(), config.locks.response_lock_ttl_ms),
            leases: TurnLeaseRegistry::new(store.clone(), config.locks.lease_ttl_ms),
            threads: ThreadRegistry::new(store.clone(), coordination.thread_turns, coordination.thread_ttl_ms),
            gate: RateLimitGate::new(store.clone(), config.gate.clone()),
            affinity: StoreAffinity::new(store.clone()),
            activity: ActivityLog::new(store.clone()),
            sessions: SessionStore::new(store),
        }
    }

    /// One reconciliation pass at `now`.
    pub fn run_once(&self, now: i64) -> Result<JanitorReport> {
        let report = JanitorReport {
            locks: self.locks.purge_expired(now)?,
            leases: self.leases.purge_expired(now)?,
            threads: self.threads.purge(now)?,
            responders: self.gate.purge(now - self.responder_retention_ms)?,
            affinities: self.affinity.purge_expired(now)?,
            avatar_messages: self
                .activity
                .purge_avatar_messages(now - self.avatar_message_retention_ms)?,
            sessions: self.sessions.purge_idle(now - self.session_idle_ms)?,
            human_activity: self.activity.purge_human_activity(now - self.human_window_ms)?,
        };

        if report.total() > 0 {
            log::info!("Janitor removed {} rows: {:?}", report.total(), report);
        }
        Ok(report)
    }

    /// Run passes every interval until `shutdown` flips to true.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        log::info!("Janitor started (every {:?})", self.interval);
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if let Err(e) = self.run_once(now_ms()) {
                log::warn!("Janitor pass failed: {}", e);
            }
        }
        log::info!("Janitor stopped");
    }
}
