//! Interactive session: one client connection driving one pipeline run.
//!
//! - `listener`: inbound task, client text to the reply channel.
//! - `sender`: outbound task, event channel to the client.
//! - `runner`: one stage run and its clarification round-trips.
//! - `coordinator`: wires the above together and owns the lifecycle.

pub mod coordinator;
pub mod listener;
pub mod runner;
pub mod sender;

use std::sync::Arc;

use crate::agent::StageAgent;
use crate::config::GlobalConfig;
use crate::persistence::DocumentStore;

/// Process-wide state shared by every session.
pub struct AppState {
    /// Loaded configuration.
    pub config: Arc<GlobalConfig>,
    /// Task document storage.
    pub store: DocumentStore,
    /// Agent backend.
    pub agent: Arc<dyn StageAgent>,
}
