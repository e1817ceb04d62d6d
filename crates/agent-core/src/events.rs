//! Event definitions for agent sessions

use serde_json::Value;

use crate::agent::AgentState;
use crate::media::MediaType;

/// Supervisor monitor-tree mutation kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabAction {
    /// Insert or update a node
    Set,
    /// Remove a node
    Drop,
}

impl TabAction {
    pub fn label(&self) -> &'static str {
        match self {
            TabAction::Set => "set",
            TabAction::Drop => "drop",
        }
    }
}

/// Events an agent session pushes to its web gateway
///
/// Delivered to the subscribed gateway in emission order; the gateway
/// buffers them and encodes the client JSON. The liveness `pong` is not
/// here: it is synthesized by the gateway itself.
#[derive(Debug, Clone)]
pub enum AgentEvent {
    /// The state machine changed; carries the new state
    StateChange { state: AgentState },

    /// The agent moved to a new profile
    ProfileChange { profile: String },

    /// Ask the client to open a named viewport on a URL
    UrlPop { url: String, name: String },

    /// Broadcast message from a supervisor
    Blab { text: String },

    /// Instruct the client to fetch media-specific UI data
    MediaLoad { media_type: MediaType, fullpane: bool },

    /// Asynchronous event from the attached media
    MediaEvent { media_type: MediaType, payload: Value },

    /// Monitor tree mutation, delivered to supervisors only
    SupervisorTab {
        action: TabAction,
        kind: String,
        id: String,
        details: Value,
    },
}
