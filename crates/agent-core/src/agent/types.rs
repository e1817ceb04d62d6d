//! Core types for agent sessions

use std::collections::HashSet;
use std::fmt;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{AcdError, Result};
use crate::media::Call;

/// Privilege level of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecurityLevel {
    /// Plain agent: may only drive their own session
    Agent,
    /// Supervisor: may additionally blab, spy, and list agents
    Supervisor,
    /// Administrator: full access
    Admin,
}

impl SecurityLevel {
    /// Whether this level grants supervisor operations
    pub fn is_supervisor(&self) -> bool {
        *self >= SecurityLevel::Supervisor
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SecurityLevel::Agent => write!(f, "agent"),
            SecurityLevel::Supervisor => write!(f, "supervisor"),
            SecurityLevel::Admin => write!(f, "admin"),
        }
    }
}

/// Capability token used by the matching engine
///
/// Skills are either atomic (`english`, `tier1`) or parameterized pairs
/// binding a key to a value (`brand` -> `acme`). Parameterized skills let a
/// single routing rule match per-client or per-queue values.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Skill {
    /// Atomic skill token
    Atom(String),
    /// Parameterized `(key, value)` skill
    Magic(String, String),
}

impl Skill {
    /// Atomic skill from anything string-like
    pub fn atom<S: Into<String>>(s: S) -> Self {
        Skill::Atom(s.into())
    }

    /// Parameterized skill
    pub fn magic<K: Into<String>, V: Into<String>>(key: K, value: V) -> Self {
        Skill::Magic(key.into(), value.into())
    }
}

impl fmt::Display for Skill {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Skill::Atom(s) => write!(f, "{}", s),
            Skill::Magic(k, v) => write!(f, "{}:{}", k, v),
        }
    }
}

/// Reason an agent is released (unavailable for routing)
///
/// `Default` is a distinguished sentinel and is preserved as such all the
/// way to the client; an explicit reason carries an id, a label, and a bias
/// marking the pause as productive (`1`), neutral (`0`), or idle (`-1`) for
/// reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReleaseReason {
    /// The sentinel default reason
    Default,
    /// An explicit release reason
    Custom {
        id: String,
        label: String,
        bias: i8,
    },
}

impl ReleaseReason {
    /// Parse the wire form of a release reason
    ///
    /// Accepts the sentinel `"Default"` (case-insensitive) or an
    /// `"id:label:bias"` triple with bias in `{-1, 0, 1}`.
    ///
    /// # Examples
    ///
    /// ```
    /// use openacd_agent_core::agent::ReleaseReason;
    ///
    /// assert_eq!(ReleaseReason::parse("default").unwrap(), ReleaseReason::Default);
    /// let lunch = ReleaseReason::parse("3:Lunch:0").unwrap();
    /// assert_eq!(lunch, ReleaseReason::Custom {
    ///     id: "3".to_string(),
    ///     label: "Lunch".to_string(),
    ///     bias: 0,
    /// });
    /// ```
    pub fn parse(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("default") {
            return Ok(ReleaseReason::Default);
        }
        let mut parts = s.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(id), Some(label), Some(bias)) => {
                let bias: i8 = bias
                    .trim()
                    .parse()
                    .map_err(|_| AcdError::bad_request(format!("bad release bias: {}", bias)))?;
                if !(-1..=1).contains(&bias) {
                    return Err(AcdError::bad_request(format!("bad release bias: {}", bias)));
                }
                Ok(ReleaseReason::Custom {
                    id: id.to_string(),
                    label: label.to_string(),
                    bias,
                })
            }
            _ => Err(AcdError::bad_request(format!("bad release reason: {}", s))),
        }
    }
}

/// Profile, skills, and identity of one agent
///
/// This is the directory-sourced portion of an agent; the live state lives
/// in the session that owns it.
#[derive(Debug, Clone)]
pub struct Agent {
    /// Unique login, the cluster-wide key for this agent
    pub login: String,
    /// Opaque directory identifier
    pub id: String,
    /// Profile the agent currently belongs to
    pub profile: String,
    /// Privilege level
    pub security_level: SecurityLevel,
    /// Skill set used by the matching engine
    pub skills: HashSet<Skill>,
    /// Address the agent is rung at, if configured
    pub endpoint: Option<String>,
}

/// The agent state machine's state, with its attached media
///
/// The call record lives inside the variant, so the invariant that
/// `current_call` is non-null exactly in the active states holds by
/// construction.
#[derive(Debug, Clone)]
pub enum AgentState {
    /// Available for routing
    Idle,
    /// A call is being offered; the ring timer is running
    Ringing(Call),
    /// An outbound call is being prepared
    Precall(Call),
    /// Bridged to a call
    Oncall(Call),
    /// Outbound call in progress, not yet answered
    Outgoing(Call),
    /// Post-call administrative time
    Wrapup(Call),
    /// Unavailable for routing
    Released(ReleaseReason),
    /// Consulting a third party while the original call is on hold
    WarmTransfer {
        /// The customer leg, parked
        onhold: Call,
        /// Destination being consulted
        calling: String,
    },
}

impl AgentState {
    /// Short lowercase label, as shown on the wire
    pub fn label(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Ringing(_) => "ringing",
            AgentState::Precall(_) => "precall",
            AgentState::Oncall(_) => "oncall",
            AgentState::Outgoing(_) => "outgoing",
            AgentState::Wrapup(_) => "wrapup",
            AgentState::Released(_) => "released",
            AgentState::WarmTransfer { .. } => "warmtransfer",
        }
    }

    /// The call this state carries, if any
    pub fn call(&self) -> Option<&Call> {
        match self {
            AgentState::Ringing(c)
            | AgentState::Precall(c)
            | AgentState::Oncall(c)
            | AgentState::Outgoing(c)
            | AgentState::Wrapup(c) => Some(c),
            AgentState::WarmTransfer { onhold, .. } => Some(onhold),
            AgentState::Idle | AgentState::Released(_) => None,
        }
    }

    /// Whether a requested transition to `next` is permitted
    ///
    /// This is the session's transition table. Only transitions listed here
    /// may be requested by clients, queues, or media; everything else is
    /// rejected with `INVALID_STATE_CHANGE`. Queued releases (release while
    /// on a call) are handled before this check and do not appear here.
    pub fn may_transition_to(&self, next: &AgentState) -> bool {
        use AgentState::*;
        match (self, next) {
            (Idle, Released(_)) | (Idle, Ringing(_)) | (Idle, Precall(_)) => true,
            (Released(_), Idle) | (Released(_), Released(_)) | (Released(_), Precall(_)) => true,
            (Ringing(_), Oncall(_)) | (Ringing(_), Idle) => true,
            (Precall(_), Outgoing(_)) | (Precall(_), Idle) | (Precall(_), Released(_)) => true,
            (Outgoing(_), Oncall(_)) | (Outgoing(_), Wrapup(_)) => true,
            (Oncall(_), Wrapup(_)) | (Oncall(_), WarmTransfer { .. }) => true,
            (WarmTransfer { .. }, Oncall(_)) | (WarmTransfer { .. }, Wrapup(_)) => true,
            (Wrapup(_), Idle) | (Wrapup(_), Released(_)) => true,
            _ => false,
        }
    }
}

/// Point-in-time copy of one agent's observable state
///
/// External readers never get handles into a session; they get snapshots.
#[derive(Debug, Clone)]
pub struct AgentSnapshot {
    pub login: String,
    pub id: String,
    pub profile: String,
    pub security_level: SecurityLevel,
    pub skills: HashSet<Skill>,
    pub endpoint: Option<String>,
    pub state: AgentState,
    /// When the state last changed
    pub last_change: DateTime<Utc>,
    /// When the session was created
    pub since: DateTime<Utc>,
}
