//! # OpenACD Agent Core
//!
//! The agent-side heart of the OpenACD call distribution engine: a
//! per-agent state machine, the cluster directory that locates it, and the
//! contracts it drives media through.
//!
//! ## Overview
//!
//! Agents log in, queues hold contacts, and the matching engine offers
//! queued work to available agents. This crate owns the part in the middle:
//!
//! - **Agent Session**: one task per logged-in agent serializing every
//!   input (client commands, queue offers, media callbacks, timers) into
//!   a totally ordered stream of state transitions
//! - **Agent Registry**: the `login -> session` directory, linearizable per
//!   login, queried by queues, peers, and supervisors
//! - **Media contracts**: the [`MediaDriver`](media::MediaDriver) and
//!   [`OutboundCallFactory`](media::OutboundCallFactory) seams that voice,
//!   email, and chat drivers implement
//! - **Events**: everything a session wants its web client to know, pushed
//!   in emission order to the subscribed gateway
//!
//! The HTTP surface lives in the companion `openacd-web-gateway` crate.
//!
//! ## Quick Start
//!
//! ```
//! use openacd_agent_core::prelude::*;
//! use std::collections::HashSet;
//!
//! # async fn example() -> Result<()> {
//! let settings = SessionSettings::new(AcdConfig::default());
//! let registry = AgentRegistry::new(settings);
//!
//! let agent = Agent {
//!     login: "alice".to_string(),
//!     id: "agent-001".to_string(),
//!     profile: "Default".to_string(),
//!     security_level: SecurityLevel::Agent,
//!     skills: HashSet::from([Skill::atom("english")]),
//!     endpoint: None,
//! };
//!
//! let handle = match registry.start_agent(agent) {
//!     StartResult::Fresh(handle) => handle,
//!     StartResult::Existing(_) => return Err(AcdError::AlreadyLoggedIn("alice".into())),
//! };
//!
//! // A queue offers a call; the agent answers it.
//! handle.ring(Call::dummy("call-42")).await?;
//! handle.set_state(StateRequest::Oncall).await?;
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod media;

pub use agent::{
    Agent, AgentRegistry, AgentSnapshot, AgentState, BlabTarget, CommandMode, ReleaseReason,
    SecurityLevel, SessionHandle, SessionSettings, SetStateOutcome, Skill, StartResult,
    StateRequest,
};
pub use config::AcdConfig;
pub use error::{AcdError, Result};
pub use events::{AgentEvent, TabAction};
pub use media::{Call, Client, Direction, MediaDriver, MediaPath, MediaType, OutboundCallFactory,
                RingPath};

/// Convenient star import for the common types
pub mod prelude {
    pub use crate::agent::{
        Agent, AgentRegistry, AgentSnapshot, AgentState, BlabTarget, CommandMode, ReleaseReason,
        SecurityLevel, SessionHandle, SessionSettings, SetStateOutcome, Skill, StartResult,
        StateRequest,
    };
    pub use crate::auth::{AgentAuth, MemoryAuth};
    pub use crate::config::AcdConfig;
    pub use crate::error::{AcdError, Result};
    pub use crate::events::{AgentEvent, TabAction};
    pub use crate::media::{
        Call, Client, Direction, MediaDriver, MediaPath, MediaType, OutboundCallFactory, RingPath,
    };
}
