//! Media contracts
//!
//! A call is created by an external media driver (voice bridge, mailer,
//! chat server); the session core holds a borrowed reference to it for as
//! long as it owns the interaction. This module defines the call record and
//! the two seams the core drives media through: [`MediaDriver`] for an
//! attached call and [`OutboundCallFactory`] for agent-initiated calls.
//!
//! How media bodies are parsed or telephony is driven is not this crate's
//! concern; drivers implement the traits and keep their machinery behind
//! them. [`DummyMediaDriver`] is the in-process stand-in used by tests and
//! the demo server.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::agent::Skill;
use crate::error::{AcdError, Result};

/// Kind of contact carried by a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    Voice,
    Email,
    Chat,
    Voicemail,
}

impl MediaType {
    /// Parse the wire form of a media type
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "voice" => Ok(MediaType::Voice),
            "email" => Ok(MediaType::Email),
            "chat" => Ok(MediaType::Chat),
            "voicemail" => Ok(MediaType::Voicemail),
            other => Err(AcdError::media_missing(format!("unknown media type: {}", other))),
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaType::Voice => write!(f, "voice"),
            MediaType::Email => write!(f, "email"),
            MediaType::Chat => write!(f, "chat"),
            MediaType::Voicemail => write!(f, "voicemail"),
        }
    }
}

/// Direction of a call relative to the contact center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Inbound,
    Outbound,
}

/// How the ring reaches the agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RingPath {
    Outband,
    Inband,
}

/// Where the media itself flows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaPath {
    Inband,
    Outband,
}

/// Client (brand) a call belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    /// Directory identifier of the client
    pub id: Option<String>,
    /// Display label
    pub label: Option<String>,
}

impl Client {
    /// Label shown to agents, falling back when the client is unlabeled
    pub fn brand_label(&self) -> &str {
        self.label.as_deref().unwrap_or("unknown client")
    }
}

/// A contact being carried through the system
///
/// Created by a media driver; attached to at most one agent session at a
/// time. Cloning a `Call` clones the borrowed reference, not the media.
#[derive(Clone)]
pub struct Call {
    /// Driver-assigned identifier
    pub id: String,
    /// Contact kind
    pub media_type: MediaType,
    /// Handle into the driver that owns the media
    pub source: Arc<dyn MediaDriver>,
    /// Caller id as a `(name, number)` pair
    pub caller_id: (String, String),
    /// Owning client, if known
    pub client: Option<Client>,
    pub direction: Direction,
    pub ring_path: RingPath,
    pub media_path: MediaPath,
    /// Skills the matching engine required for this call
    pub skills: HashSet<Skill>,
}

impl Call {
    /// Brand label for state-data encoding
    pub fn brand_label(&self) -> &str {
        self.client
            .as_ref()
            .map(|c| c.brand_label())
            .unwrap_or("unknown client")
    }

    /// A voice call backed by a [`DummyMediaDriver`]
    ///
    /// Used throughout the test suites and by the demo server.
    pub fn dummy<S: Into<String>>(id: S) -> Call {
        let id = id.into();
        Call {
            id: id.clone(),
            media_type: MediaType::Voice,
            source: Arc::new(DummyMediaDriver::new(id)),
            caller_id: ("Unknown".to_string(), "Unknown".to_string()),
            client: None,
            direction: Direction::Inbound,
            ring_path: RingPath::Outband,
            media_path: MediaPath::Inband,
            skills: HashSet::new(),
        }
    }
}

impl fmt::Debug for Call {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("id", &self.id)
            .field("media_type", &self.media_type)
            .field("caller_id", &self.caller_id)
            .field("direction", &self.direction)
            .finish_non_exhaustive()
    }
}

/// Driver seam for an attached call
///
/// The session invokes these against `Call::source`. Drivers confirm by
/// returning `Ok`; the session applies a state change only after the
/// confirmation, so a failed driver call leaves no half-applied state.
#[async_trait]
pub trait MediaDriver: Send + Sync {
    /// Agent answered the offered or outgoing call
    async fn pickup(&self) -> Result<()>;

    /// Stop offering the call to the agent (ring timeout or abandon)
    async fn unring(&self) -> Result<()>;

    /// Terminate the call; `who` names the terminating party
    async fn hangup(&self, who: &str) -> Result<()>;

    /// Dial the destination of a prepared outbound call
    async fn dial(&self, destination: &str) -> Result<()>;

    /// Ring a peer agent with this call (blind transfer)
    async fn agent_transfer(&self, target_login: &str, target_endpoint: Option<&str>,
                            case_id: Option<&str>) -> Result<()>;

    /// Push vars and skills into the media and requeue it
    async fn queue_transfer(&self, queue: &str, vars: Value, skills: &HashSet<Skill>)
                            -> Result<()>;

    /// Park the caller and start consulting a third party
    async fn warm_transfer_begin(&self, destination: &str) -> Result<()>;

    /// Bridge the parked caller to the consulted party
    async fn warm_transfer_complete(&self) -> Result<()>;

    /// Drop the consult leg and resume the parked caller
    async fn warm_transfer_cancel(&self) -> Result<()>;

    /// Open a read-only leg towards a supervisor
    async fn spy(&self, observer_login: &str, observer_endpoint: Option<&str>) -> Result<()>;

    /// Media-specific command, call mode: the driver's answer is returned
    async fn command(&self, name: &str, args: &[Value]) -> Result<Value>;

    /// Media-specific command, cast mode: fire and forget
    fn cast(&self, name: &str, args: &[Value]);
}

/// Factory seam for agent-initiated outbound calls
///
/// One factory is registered per media type; `init_outbound` fails with
/// `MEDIA_NOEXISTS` when no factory covers the requested type.
#[async_trait]
pub trait OutboundCallFactory: Send + Sync {
    /// Create an outbound call for `agent_login` on behalf of `client`
    async fn create(&self, agent_login: &str, client: &str) -> Result<Call>;
}

/// In-process media driver recording every invocation
///
/// Test double and demo stand-in: confirms everything, remembers what it was
/// asked, and can be primed to fail the next fallible call.
pub struct DummyMediaDriver {
    call_id: String,
    log: Mutex<Vec<String>>,
    fail_next: Mutex<Option<AcdError>>,
}

impl DummyMediaDriver {
    pub fn new<S: Into<String>>(call_id: S) -> Self {
        Self {
            call_id: call_id.into(),
            log: Mutex::new(Vec::new()),
            fail_next: Mutex::new(None),
        }
    }

    /// Every driver invocation so far, in order
    pub fn invocations(&self) -> Vec<String> {
        self.log.lock().unwrap().clone()
    }

    /// Make the next fallible driver call return `err`
    pub fn fail_next(&self, err: AcdError) {
        *self.fail_next.lock().unwrap() = Some(err);
    }

    fn record(&self, entry: String) -> Result<()> {
        self.log.lock().unwrap().push(entry);
        match self.fail_next.lock().unwrap().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl MediaDriver for DummyMediaDriver {
    async fn pickup(&self) -> Result<()> {
        self.record("pickup".to_string())
    }

    async fn unring(&self) -> Result<()> {
        self.record("unring".to_string())
    }

    async fn hangup(&self, who: &str) -> Result<()> {
        self.record(format!("hangup:{}", who))
    }

    async fn dial(&self, destination: &str) -> Result<()> {
        self.record(format!("dial:{}", destination))
    }

    async fn agent_transfer(&self, target_login: &str, _target_endpoint: Option<&str>,
                            case_id: Option<&str>) -> Result<()> {
        self.record(format!("agent_transfer:{}:{}", target_login, case_id.unwrap_or("-")))
    }

    async fn queue_transfer(&self, queue: &str, _vars: Value, skills: &HashSet<Skill>)
                            -> Result<()> {
        self.record(format!("queue_transfer:{}:{}", queue, skills.len()))
    }

    async fn warm_transfer_begin(&self, destination: &str) -> Result<()> {
        self.record(format!("warm_transfer_begin:{}", destination))
    }

    async fn warm_transfer_complete(&self) -> Result<()> {
        self.record("warm_transfer_complete".to_string())
    }

    async fn warm_transfer_cancel(&self) -> Result<()> {
        self.record("warm_transfer_cancel".to_string())
    }

    async fn spy(&self, observer_login: &str, _observer_endpoint: Option<&str>) -> Result<()> {
        self.record(format!("spy:{}", observer_login))
    }

    async fn command(&self, name: &str, args: &[Value]) -> Result<Value> {
        self.record(format!("command:{}", name))?;
        Ok(serde_json::json!({ "call": self.call_id, "command": name, "args": args.len() }))
    }

    fn cast(&self, name: &str, _args: &[Value]) {
        self.log.lock().unwrap().push(format!("cast:{}", name));
    }
}
