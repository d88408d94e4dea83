//! End-to-end coordination tests
//!
//! Drives the engine with mock collaborators over real SQLite stores. Tests
//! that share a database file between two engines stand in for two processes
//! scheduling the same channels.

use std::sync::Arc;

use chorus::collaborators::mock::{MockDecision, MockGeneration, MockIdentity, MockTransport};
use chorus::collaborators::{Avatar, ChannelMessage, Collaborators};
use chorus::config::EngineConfig;
use chorus::coordination::{CoordinationContext, ResponseLock, StoreAffinity, TierKind};
use chorus::id::now_ms;
use chorus::presence::{InitiativeScorer, PresenceRecord, ScoringContext};
use chorus::scheduler::{LeaseMeta, TurnLeaseRegistry};
use chorus::store::CoordinationStore;
use chorus::Engine;
use tempfile::TempDir;

struct Harness {
    engine: Engine,
    generation: Arc<MockGeneration>,
    transport: Arc<MockTransport>,
}

fn avatars(channel_id: &str, ids: &[&str]) -> Vec<Avatar> {
    ids.iter()
        .map(|id| {
            let mut name = id.to_string();
            name[..1].make_ascii_uppercase();
            Avatar::new(*id, name).in_channel(channel_id)
        })
        .collect()
}

fn harness_with(
    config: EngineConfig,
    store: Arc<CoordinationStore>,
    cast: Vec<Avatar>,
    scorer: Option<Arc<dyn InitiativeScorer>>,
) -> Harness {
    let generation = Arc::new(MockGeneration::new());
    let transport = Arc::new(MockTransport::new());
    let collaborators = Collaborators {
        generation: generation.clone(),
        transport: transport.clone(),
        identity: Arc::new(MockIdentity::with_avatars(cast)),
        decision: Arc::new(MockDecision::rejecting_all()),
        affinity: Arc::new(StoreAffinity::new(store.clone())),
    };
    let engine = match scorer {
        Some(scorer) => Engine::with_scorer(config, store, collaborators, scorer),
        None => Engine::new(config, store, collaborators),
    };
    Harness {
        engine,
        generation,
        transport,
    }
}

fn harness(config: EngineConfig, cast: Vec<Avatar>) -> Harness {
    let store = Arc::new(CoordinationStore::open_in_memory().unwrap());
    harness_with(config, store, cast, None)
}

/// Scores every avatar the same.
struct FlatScorer(f64);

impl InitiativeScorer for FlatScorer {
    fn score(&self, _record: &PresenceRecord, _ctx: &ScoringContext) -> f64 {
        self.0
    }
}

#[test]
fn test_lease_unique_across_store_handles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chorus.db");
    let first = TurnLeaseRegistry::new(Arc::new(CoordinationStore::open(&path).unwrap()), 60_000);
    let second = TurnLeaseRegistry::new(Arc::new(CoordinationStore::open(&path).unwrap()), 60_000);

    let meta = LeaseMeta::ambient();
    assert!(first.try_lease("c1", "ada", 7, &meta, now_ms()).unwrap());
    assert!(!second.try_lease("c1", "ada", 7, &meta, now_ms()).unwrap());
    assert!(second.try_lease("c1", "ada", 8, &meta, now_ms()).unwrap());
}

#[test]
fn test_lock_exclusive_until_release() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chorus.db");
    let first = ResponseLock::new(Arc::new(CoordinationStore::open(&path).unwrap()), 5_000);
    let second = ResponseLock::new(Arc::new(CoordinationStore::open(&path).unwrap()), 5_000);

    assert!(first.acquire("c1", "ada", now_ms()).unwrap());
    assert!(!second.acquire("c1", "ada", now_ms()).unwrap());
    first.release("c1", "ada").unwrap();
    assert!(second.acquire("c1", "ada", now_ms()).unwrap());
}

#[tokio::test]
async fn test_fast_path_shares_ambient_tick() {
    let h = harness(EngineConfig::default(), avatars("c1", &["ada", "bob"]));

    // Ambient sweep opens tick 1 and gives ada the turn.
    assert_eq!(h.engine.on_channel_tick("c1", 5).await, 1);
    assert_eq!(h.generation.responders(), vec!["ada"]);

    // A mention of ada in the same epoch finds the lease taken.
    let msg = ChannelMessage::human("m1", "c1", "u1", "ada, again?", now_ms());
    assert!(!h.engine.on_human_message("c1", &msg).await);
    assert_eq!(h.generation.call_count(), 1);
}

#[tokio::test]
async fn test_second_process_skips_handled_message() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("chorus.db");
    let cast = avatars("c1", &["ada", "bob"]);
    let first = harness_with(
        EngineConfig::default(),
        Arc::new(CoordinationStore::open(&path).unwrap()),
        cast.clone(),
        None,
    );
    let second = harness_with(
        EngineConfig::default(),
        Arc::new(CoordinationStore::open(&path).unwrap()),
        cast,
        None,
    );

    let msg = ChannelMessage::human("m1", "c1", "u1", "ada?", now_ms());
    assert!(first.engine.on_human_message("c1", &msg).await);
    assert!(!second.engine.on_human_message("c1", &msg).await);
    assert_eq!(first.generation.call_count() + second.generation.call_count(), 1);
}

#[tokio::test]
async fn test_reply_beats_mention_and_bypasses_cooldown() {
    let h = harness(EngineConfig::default(), avatars("c1", &["ada", "bob"]));

    let first = ChannelMessage::human("m1", "c1", "u1", "ada?", now_ms());
    assert!(h.engine.on_human_message("c1", &first).await);
    let ada_message = h.transport.sent()[0].message_id.clone();

    // Within the channel cooldown, replying to ada while naming bob.
    let reply = ChannelMessage::human("m2", "c1", "u1", "bob, do you agree?", now_ms()).replying_to(&ada_message, None);
    assert!(h.engine.on_human_message("c1", &reply).await);

    let calls = h.generation.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1].avatar_id, "ada");
    assert_eq!(calls[1].options.tier, Some(TierKind::Reply));
}

#[tokio::test]
async fn test_channel_cooldown_blocks_unprompted_follow_up() {
    let h = harness(EngineConfig::default(), avatars("c1", &["ada", "bob"]));

    let first = ChannelMessage::human("m1", "c1", "u1", "ada?", now_ms());
    assert!(h.engine.on_human_message("c1", &first).await);

    let second = ChannelMessage::human("m2", "c1", "u2", "bob?", now_ms());
    assert!(!h.engine.on_human_message("c1", &second).await);
    assert_eq!(h.generation.call_count(), 1);
}

#[tokio::test]
async fn test_response_cap() {
    let mut config = EngineConfig::default();
    config.coordination.max_responses_per_message = 2;
    config.coordination.mention_cascade_fanout = 0;
    let h = harness(config, avatars("c1", &["ada", "bob", "cy"]));

    let msg = ChannelMessage::human("m1", "c1", "u1", "ada, bob and cy: roll call", now_ms());
    let responses = h
        .engine
        .coordinate_response("c1", Some(&msg), CoordinationContext::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 2);
    assert!(responses.iter().all(|r| r.tier == TierKind::Mention));
}

#[tokio::test]
async fn test_ambient_diversity_prefers_new_voice() {
    let h = harness(EngineConfig::default(), avatars("c1", &["ada", "bob"]));
    let now = now_ms();
    for i in 0..3 {
        h.transport
            .seed(ChannelMessage::from_avatar(format!("old-{i}"), "c1", "ada", "me again", now - 1_000 + i));
    }
    // ada outranks bob on score alone.
    h.engine.presence().add_pin("c1", "ada", now).unwrap();

    let responses = h
        .engine
        .coordinate_response("c1", None, CoordinationContext::default())
        .await
        .unwrap();

    assert_eq!(responses.len(), 1);
    assert_eq!(responses[0].avatar_id, "bob");
    assert_eq!(responses[0].tier, TierKind::Presence);
}

#[tokio::test]
async fn test_tick_all_respects_global_budget() {
    let mut config = EngineConfig::default();
    config.ambient.global_budget = 3;
    let store = Arc::new(CoordinationStore::open_in_memory().unwrap());

    let mut cast = Vec::new();
    let activity = chorus::store::ActivityLog::new(store.clone());
    let long_ago = now_ms() - 3_600_000;
    for i in 0..5 {
        let channel = format!("c{i}");
        let (a, b) = (format!("a{i}"), format!("b{i}"));
        cast.extend(avatars(&channel, &[a.as_str(), b.as_str()]));
        activity.record_human_message(&channel, "u1", long_ago + i).unwrap();
    }
    let h = harness_with(config, store, cast, None);

    assert_eq!(h.engine.tick_all().await, 3);
    assert_eq!(h.generation.call_count(), 3);
}

#[tokio::test]
async fn test_fairness_older_turn_wins_tie() {
    let store = Arc::new(CoordinationStore::open_in_memory().unwrap());
    let h = harness_with(
        EngineConfig::default(),
        store,
        avatars("c1", &["a", "b"]),
        Some(Arc::new(FlatScorer(0.6))),
    );
    let now = now_ms();
    h.engine.presence().record_turn("c1", "a", now - 10 * 60_000, 0).unwrap();
    h.engine.presence().record_turn("c1", "b", now - 60_000, 0).unwrap();

    assert_eq!(h.engine.on_channel_tick("c1", 1).await, 1);
    assert_eq!(h.generation.responders(), vec!["a"]);
}

#[tokio::test]
async fn test_mention_cascade_continues_as_thread() {
    let h = harness(EngineConfig::default(), avatars("c1", &["ada", "bob", "cy"]));
    h.generation.reply_with("ada", "good question for bob");

    let msg = ChannelMessage::human("m1", "c1", "u1", "ada?", now_ms());
    assert!(h.engine.on_human_message("c1", &msg).await);

    let calls = h.generation.calls();
    assert_eq!(h.generation.responders(), vec!["ada", "bob"]);
    assert_eq!(calls[1].options.tier, Some(TierKind::Thread));
    assert_eq!(calls[1].options.depth, 1);
    assert_eq!(h.transport.sent().len(), 2);
}

#[tokio::test]
async fn test_consecutive_mentions_both_answered() {
    let mut config = EngineConfig::default();
    config.gate.channel_cooldown_ms = 0;
    let h = harness(config, avatars("c1", &["ada", "bob"]));

    let first = ChannelMessage::human("m1", "c1", "u1", "ada, hi?", now_ms());
    let second = ChannelMessage::human("m2", "c1", "u1", "ada, tell me more?", now_ms());
    assert!(h.engine.on_human_message("c1", &first).await);
    assert!(h.engine.on_human_message("c1", &second).await);
    assert_eq!(h.generation.responders(), vec!["ada", "ada"]);
}

#[tokio::test]
async fn test_ambient_sweep_respects_channel_cooldown() {
    let mut config = EngineConfig::default();
    config.ambient.human_suppression_ms = 0;
    let h = harness(config, avatars("c1", &["ada", "bob"]));

    let msg = ChannelMessage::human("m1", "c1", "u1", "ada?", now_ms());
    assert!(h.engine.on_human_message("c1", &msg).await);

    assert_eq!(h.engine.on_channel_tick("c1", 5).await, 0);
    assert_eq!(h.generation.responders(), vec!["ada"]);
}

#[tokio::test]
async fn test_ambient_sweep_prefers_new_voice() {
    let mut config = EngineConfig::default();
    config.coordination.turn_cooldown_ms = 0;
    let h = harness(config, avatars("c1", &["ada", "bob"]));
    let now = now_ms();
    for i in 0..3 {
        h.transport
            .seed(ChannelMessage::from_avatar(format!("old-{i}"), "c1", "ada", "me again", now - 1_000 + i));
    }
    h.engine.presence().add_pin("c1", "ada", now).unwrap();

    assert_eq!(h.engine.on_channel_tick("c1", 1).await, 1);
    assert_eq!(h.generation.responders(), vec!["bob"]);
}
