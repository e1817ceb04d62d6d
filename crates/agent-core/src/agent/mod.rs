//! Agent session management
//!
//! The state machine, its cluster directory, and the types they share.

pub mod registry;
pub mod session;
pub mod types;

pub use registry::{AgentRegistry, BlabTarget, StartResult};
pub use session::{CommandMode, SessionHandle, SessionSettings, SetStateOutcome, StateRequest};
pub use types::{Agent, AgentSnapshot, AgentState, ReleaseReason, SecurityLevel, Skill};
