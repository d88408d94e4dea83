//! Response coordination for message triggers.
//!
//! Implements responder selection through an ordered tier cascade, the
//! in-flight response lock, the rate-limit gate, conversation threads and
//! sessions, the mention cascade, and periodic reconciliation of expired rows.

pub mod affinity;
pub mod coordinator;
pub mod diversity;
pub mod gate;
pub mod janitor;
pub mod lock;
pub mod mention;
pub mod runner;
pub mod session;
pub mod speaker_cache;
pub mod threads;
pub mod tiers;
pub mod trigger;

pub use affinity::StoreAffinity;
pub use coordinator::{CoordinatedResponse, CoordinationContext, Coordinator, MAX_CASCADE_DEPTH};
pub use diversity::DiversityFilter;
pub use gate::{Admission, GateRequest, RateLimitGate};
pub use janitor::{Janitor, JanitorReport};
pub use lock::{LockGuard, ResponseLock};
pub use mention::{mentioned_avatars, mentions};
pub use runner::{SentTurn, TurnOutcome, TurnRequest, TurnRunner};
pub use session::{ConversationSession, SessionStore};
pub use speaker_cache::{SpeakerCache, SpeakerCacheEntry};
pub use threads::{ConversationThread, ThreadRegistry};
pub use tiers::{Selection, SelectionInput, SelectionTier, TierKind};
pub use trigger::{Trigger, TriggerKind};
