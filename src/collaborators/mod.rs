//! External collaborators.
//!
//! The engine never generates text, talks to the messaging platform, or owns
//! avatar identities itself. It drives these through the async traits below,
//! bundled into [`Collaborators`]. The `mock` module provides in-memory
//! implementations used by the test suites.

pub mod mock;
mod traits;
mod types;

use std::sync::Arc;

pub use traits::{AffinityStore, DecisionPredicate, GenerationService, IdentityStore, Transport};
pub use types::{Avatar, ChannelMessage, GeneratedMessage, MessageRef, ResponseOptions};

/// Every collaborator the engine needs, shared between tasks.
#[derive(Clone)]
pub struct Collaborators {
    pub generation: Arc<dyn GenerationService>,
    pub transport: Arc<dyn Transport>,
    pub identity: Arc<dyn IdentityStore>,
    pub decision: Arc<dyn DecisionPredicate>,
    pub affinity: Arc<dyn AffinityStore>,
}
