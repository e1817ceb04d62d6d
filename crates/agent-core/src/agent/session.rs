//! # Agent Session State Machine
//!
//! One session task owns the authoritative state of one logged-in
//! agent. Every input that can move the state machine (web client commands,
//! queue offers, media callbacks, registry broadcasts, timer fires) is
//! funneled through the session's command channel and handled to completion
//! before the next one, so conflicting transitions are serialized without
//! any shared locks.
//!
//! ## Key Behaviors
//!
//! - **Transition validation**: requested transitions are checked against
//!   [`AgentState::may_transition_to`]; anything else is rejected without
//!   side effects
//! - **Confirm-then-commit**: media-affecting transitions call the driver
//!   first and change state only on its confirmation, so no half-applied
//!   state is ever observable
//! - **Queued release**: a release requested while a call is attached is
//!   remembered and applied when the call ends
//! - **Ring timer**: entering `ringing` arms a one-shot timer; a stale fire
//!   (the call was answered, or a later offer replaced it) is ignored via a
//!   generation counter
//! - **Event emission**: every observable mutation pushes exactly one event
//!   to the subscribed web gateway, in order
//!
//! Interact with a session through its cloneable [`SessionHandle`]; sessions
//! are spawned by the [`AgentRegistry`](crate::agent::AgentRegistry).

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::agent::registry::{AgentRegistry, BlabTarget};
use crate::agent::types::{Agent, AgentSnapshot, AgentState, ReleaseReason, Skill};
use crate::config::AcdConfig;
use crate::error::{AcdError, Result};
use crate::events::AgentEvent;
use crate::media::{Call, Direction, MediaType, OutboundCallFactory};

/// Shared settings handed to every session the registry spawns
#[derive(Clone)]
pub struct SessionSettings {
    /// Engine configuration (ring timeout, collaborator timeout, node name)
    pub config: Arc<AcdConfig>,
    /// Outbound call factories by media type
    pub outbound: Arc<HashMap<MediaType, Arc<dyn OutboundCallFactory>>>,
}

impl SessionSettings {
    pub fn new(config: AcdConfig) -> Self {
        Self {
            config: Arc::new(config),
            outbound: Arc::new(HashMap::new()),
        }
    }

    /// Register an outbound call factory for a media type
    pub fn with_outbound_factory(
        mut self,
        media_type: MediaType,
        factory: Arc<dyn OutboundCallFactory>,
    ) -> Self {
        let mut outbound = (*self.outbound).clone();
        outbound.insert(media_type, factory);
        self.outbound = Arc::new(outbound);
        self
    }
}

/// Client-requestable target states for `set_state`
#[derive(Debug, Clone)]
pub enum StateRequest {
    Idle,
    Released(ReleaseReason),
    /// Answer the currently offered or outgoing call
    Oncall,
    /// Leave the call and enter post-call wrapup
    Wrapup,
}

/// Result of a successful `set_state`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetStateOutcome {
    /// The state changed immediately
    Changed,
    /// A release was recorded and will apply when the current call ends
    Queued,
}

/// Execution mode for media commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    /// Wait for and return the media's answer
    Call,
    /// Fire and forget
    Cast,
}

type Reply<T> = oneshot::Sender<Result<T>>;

enum SessionCommand {
    SetState { request: StateRequest, reply: Reply<SetStateOutcome> },
    SetEndpoint { endpoint: Option<String>, reply: Reply<()> },
    ChangeProfile { profile: String, reply: Reply<()> },
    Dial { number: String, reply: Reply<()> },
    AgentTransfer { target: String, case_id: Option<String>, reply: Reply<()> },
    QueueTransfer { queue: String, vars: Value, skills: HashSet<Skill>, reply: Reply<()> },
    WarmTransfer { destination: String, reply: Reply<()> },
    WarmTransferComplete { reply: Reply<()> },
    WarmTransferCancel { reply: Reply<()> },
    MediaCommand { name: String, mode: CommandMode, args: Vec<Value>, reply: Reply<Value> },
    MediaHangup { reply: Reply<()> },
    InitOutbound { client: String, media_type: MediaType, reply: Reply<()> },
    Ring { call: Call, reply: Reply<()> },
    Spy { target: String, reply: Reply<()> },
    SpyAttach { observer: String, observer_endpoint: Option<String>, reply: Reply<()> },
    AttachExpectedCall { call: Call, reply: Reply<()> },
    Blab { target: BlabTarget, text: String },
    Notify { event: AgentEvent },
    MediaExited,
    RingTimeout { generation: u64 },
    Subscribe { events: mpsc::UnboundedSender<AgentEvent> },
    DumpState { reply: oneshot::Sender<AgentSnapshot> },
    Logout { reply: Reply<()> },
}

/// Cloneable handle to a live agent session
///
/// All operations are serialized by the session task; callers await the
/// session's reply. A handle whose session has terminated answers every
/// operation with `AGENT_NOEXISTS`.
#[derive(Clone)]
pub struct SessionHandle {
    login: Arc<str>,
    session_id: Uuid,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Login of the agent this handle points at
    pub fn login(&self) -> &str {
        &self.login
    }

    /// Unique id of this session incarnation
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    fn send(&self, cmd: SessionCommand) -> Result<()> {
        self.tx
            .send(cmd)
            .map_err(|_| AcdError::agent_missing(self.login.to_string()))
    }

    async fn call<T>(&self, make: impl FnOnce(Reply<T>) -> SessionCommand) -> Result<T> {
        let (reply, rx) = oneshot::channel();
        self.send(make(reply))?;
        rx.await
            .map_err(|_| AcdError::agent_missing(self.login.to_string()))?
    }

    /// Request a state change; see [`StateRequest`]
    pub async fn set_state(&self, request: StateRequest) -> Result<SetStateOutcome> {
        self.call(|reply| SessionCommand::SetState { request, reply }).await
    }

    /// Update the endpoint used for future rings (idle or released only)
    pub async fn set_endpoint(&self, endpoint: Option<String>) -> Result<()> {
        self.call(|reply| SessionCommand::SetEndpoint { endpoint, reply }).await
    }

    /// Move the agent to a new profile
    pub async fn change_profile(&self, profile: String) -> Result<()> {
        self.call(|reply| SessionCommand::ChangeProfile { profile, reply }).await
    }

    /// Dial the destination of a prepared outbound call
    pub async fn dial(&self, number: String) -> Result<()> {
        self.call(|reply| SessionCommand::Dial { number, reply }).await
    }

    /// Blind-transfer the current call to a peer agent
    pub async fn agent_transfer(&self, target: String, case_id: Option<String>) -> Result<()> {
        self.call(|reply| SessionCommand::AgentTransfer { target, case_id, reply }).await
    }

    /// Requeue the current call with fresh vars and skills
    pub async fn queue_transfer(
        &self,
        queue: String,
        vars: Value,
        skills: HashSet<Skill>,
    ) -> Result<()> {
        self.call(|reply| SessionCommand::QueueTransfer { queue, vars, skills, reply }).await
    }

    /// Start a consult transfer to a third party
    pub async fn warm_transfer(&self, destination: String) -> Result<()> {
        self.call(|reply| SessionCommand::WarmTransfer { destination, reply }).await
    }

    /// Bridge the parked caller to the consulted party
    pub async fn warm_transfer_complete(&self) -> Result<()> {
        self.call(|reply| SessionCommand::WarmTransferComplete { reply }).await
    }

    /// Abandon the consult and resume the parked caller
    pub async fn warm_transfer_cancel(&self) -> Result<()> {
        self.call(|reply| SessionCommand::WarmTransferCancel { reply }).await
    }

    /// Forward a media-specific command to the attached call
    pub async fn media_command(
        &self,
        name: String,
        mode: CommandMode,
        args: Vec<Value>,
    ) -> Result<Value> {
        self.call(|reply| SessionCommand::MediaCommand { name, mode, args, reply }).await
    }

    /// Ask the attached media to terminate
    pub async fn media_hangup(&self) -> Result<()> {
        self.call(|reply| SessionCommand::MediaHangup { reply }).await
    }

    /// Create an outbound call via the registered factory and enter precall
    pub async fn init_outbound(&self, client: String, media_type: MediaType) -> Result<()> {
        self.call(|reply| SessionCommand::InitOutbound { client, media_type, reply }).await
    }

    /// Offer a call to the agent (queue side)
    pub async fn ring(&self, call: Call) -> Result<()> {
        self.call(|reply| SessionCommand::Ring { call, reply }).await
    }

    /// Open a read-only observation leg onto `target`'s current call
    ///
    /// Supervisor privilege is enforced at the gateway boundary.
    pub async fn spy(&self, target: String) -> Result<()> {
        self.call(|reply| SessionCommand::Spy { target, reply }).await
    }

    /// Attach the call record a spy requested (media driver side)
    pub async fn attach_expected_call(&self, call: Call) -> Result<()> {
        self.call(|reply| SessionCommand::AttachExpectedCall { call, reply }).await
    }

    /// Release any call and terminate the session
    pub async fn logout(&self) -> Result<()> {
        self.call(|reply| SessionCommand::Logout { reply }).await
    }

    /// Point-in-time copy of the agent's observable state
    pub async fn dump_state(&self) -> Result<AgentSnapshot> {
        let (reply, rx) = oneshot::channel();
        self.send(SessionCommand::DumpState { reply })?;
        rx.await.map_err(|_| AcdError::agent_missing(self.login.to_string()))
    }

    /// Bind a web gateway's event channel; replaces any previous one
    pub fn subscribe(&self, events: mpsc::UnboundedSender<AgentEvent>) -> Result<()> {
        self.send(SessionCommand::Subscribe { events })
    }

    /// Push a client-bound event (media drivers and monitors)
    pub fn notify(&self, event: AgentEvent) -> Result<()> {
        self.send(SessionCommand::Notify { event })
    }

    /// The attached media died; recover per the failure policy
    pub fn media_exited(&self) -> Result<()> {
        self.send(SessionCommand::MediaExited)
    }

    pub(crate) fn blab(&self, target: BlabTarget, text: String) {
        let _ = self.send(SessionCommand::Blab { target, text });
    }

    async fn spy_attach(&self, observer: String, observer_endpoint: Option<String>) -> Result<()> {
        self.call(|reply| SessionCommand::SpyAttach { observer, observer_endpoint, reply }).await
    }

    fn ring_timeout(&self, generation: u64) {
        let _ = self.send(SessionCommand::RingTimeout { generation });
    }
}

/// The per-agent state machine task
///
/// Constructed only by the registry; everything else goes through
/// [`SessionHandle`].
pub(crate) struct AgentSession {
    agent: Agent,
    state: AgentState,
    last_change: DateTime<Utc>,
    since: DateTime<Utc>,
    /// Release recorded while a call was attached
    pending_release: Option<ReleaseReason>,
    /// Spy requested, call record not yet attached
    expecting_call: bool,
    gateway: Option<mpsc::UnboundedSender<AgentEvent>>,
    ring_generation: u64,
    settings: SessionSettings,
    registry: AgentRegistry,
    handle: SessionHandle,
    rx: mpsc::UnboundedReceiver<SessionCommand>,
    alive: bool,
}

impl AgentSession {
    pub(crate) fn spawn(
        agent: Agent,
        settings: SessionSettings,
        registry: AgentRegistry,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = SessionHandle {
            login: Arc::from(agent.login.as_str()),
            session_id: Uuid::new_v4(),
            tx,
        };
        let session = AgentSession {
            agent,
            state: AgentState::Idle,
            last_change: Utc::now(),
            since: Utc::now(),
            pending_release: None,
            expecting_call: false,
            gateway: None,
            ring_generation: 0,
            settings,
            registry,
            handle: handle.clone(),
            rx,
            alive: true,
        };
        tokio::spawn(session.run());
        handle
    }

    async fn run(mut self) {
        info!("👤 Agent session started: {} (profile {})", self.agent.login, self.agent.profile);
        while self.alive {
            match self.rx.recv().await {
                Some(cmd) => self.handle_command(cmd).await,
                None => break,
            }
        }
        self.registry.unregister(&self.agent.login, self.handle.session_id());
        info!("🔌 Agent session ended: {}", self.agent.login);
    }

    async fn handle_command(&mut self, cmd: SessionCommand) {
        match cmd {
            SessionCommand::SetState { request, reply } => {
                let _ = reply.send(self.handle_set_state(request).await);
            }
            SessionCommand::SetEndpoint { endpoint, reply } => {
                let _ = reply.send(self.handle_set_endpoint(endpoint));
            }
            SessionCommand::ChangeProfile { profile, reply } => {
                info!("🔄 Agent {} profile: {} -> {}", self.agent.login, self.agent.profile, profile);
                self.agent.profile = profile.clone();
                self.emit(AgentEvent::ProfileChange { profile });
                let _ = reply.send(Ok(()));
            }
            SessionCommand::Dial { number, reply } => {
                let _ = reply.send(self.handle_dial(number).await);
            }
            SessionCommand::AgentTransfer { target, case_id, reply } => {
                let _ = reply.send(self.handle_agent_transfer(target, case_id).await);
            }
            SessionCommand::QueueTransfer { queue, vars, skills, reply } => {
                let _ = reply.send(self.handle_queue_transfer(queue, vars, skills).await);
            }
            SessionCommand::WarmTransfer { destination, reply } => {
                let _ = reply.send(self.handle_warm_transfer(destination).await);
            }
            SessionCommand::WarmTransferComplete { reply } => {
                let _ = reply.send(self.handle_warm_transfer_complete().await);
            }
            SessionCommand::WarmTransferCancel { reply } => {
                let _ = reply.send(self.handle_warm_transfer_cancel().await);
            }
            SessionCommand::MediaCommand { name, mode, args, reply } => {
                let _ = reply.send(self.handle_media_command(name, mode, args).await);
            }
            SessionCommand::MediaHangup { reply } => {
                let _ = reply.send(self.handle_media_hangup().await);
            }
            SessionCommand::InitOutbound { client, media_type, reply } => {
                let _ = reply.send(self.handle_init_outbound(client, media_type).await);
            }
            SessionCommand::Ring { call, reply } => {
                let _ = reply.send(self.handle_ring(call));
            }
            SessionCommand::Spy { target, reply } => {
                let _ = reply.send(self.handle_spy(target).await);
            }
            SessionCommand::SpyAttach { observer, observer_endpoint, reply } => {
                let _ = reply.send(self.handle_spy_attach(observer, observer_endpoint).await);
            }
            SessionCommand::AttachExpectedCall { call, reply } => {
                let _ = reply.send(self.handle_attach_expected_call(call));
            }
            SessionCommand::Blab { target, text } => {
                if self.blab_matches(&target) {
                    self.emit(AgentEvent::Blab { text });
                }
            }
            SessionCommand::Notify { event } => self.emit(event),
            SessionCommand::MediaExited => self.handle_media_exited(),
            SessionCommand::RingTimeout { generation } => {
                self.handle_ring_timeout(generation).await;
            }
            SessionCommand::Subscribe { events } => {
                self.gateway = Some(events);
            }
            SessionCommand::DumpState { reply } => {
                let _ = reply.send(self.snapshot());
            }
            SessionCommand::Logout { reply } => {
                if let Some(call) = self.state.call().cloned() {
                    if let Err(e) = call.source.hangup("agent_logout").await {
                        warn!("⚠️ Media refused logout hangup for {}: {}", self.agent.login, e);
                    }
                }
                self.alive = false;
                let _ = reply.send(Ok(()));
            }
        }
    }

    // ---- state changes -------------------------------------------------

    async fn handle_set_state(&mut self, request: StateRequest) -> Result<SetStateOutcome> {
        match request {
            StateRequest::Idle => {
                let next = match self.state {
                    AgentState::Released(_) => AgentState::Idle,
                    AgentState::Wrapup(_) => self.after_call_state(),
                    _ => return Err(self.refuse("idle")),
                };
                self.guard(&next)?;
                self.transition(next);
                Ok(SetStateOutcome::Changed)
            }
            StateRequest::Released(reason) => self.handle_release(reason).await,
            StateRequest::Oncall => {
                let call = match self.state.clone() {
                    AgentState::Ringing(call) | AgentState::Outgoing(call) => call,
                    _ => return Err(self.refuse("oncall")),
                };
                let next = AgentState::Oncall(call.clone());
                self.guard(&next)?;
                self.media_confirm(call.source.pickup()).await?;
                self.ring_generation += 1;
                self.transition(next);
                Ok(SetStateOutcome::Changed)
            }
            StateRequest::Wrapup => {
                let call = match self.state.clone() {
                    AgentState::Oncall(call) => call,
                    _ => return Err(self.refuse("wrapup")),
                };
                let next = AgentState::Wrapup(call.clone());
                self.guard(&next)?;
                self.media_confirm(call.source.hangup("agent")).await?;
                self.transition(next);
                Ok(SetStateOutcome::Changed)
            }
        }
    }

    async fn handle_release(&mut self, reason: ReleaseReason) -> Result<SetStateOutcome> {
        match self.state.clone() {
            // Release with a call up is queued and applied when the call ends.
            AgentState::Oncall(_)
            | AgentState::Outgoing(_)
            | AgentState::Ringing(_)
            | AgentState::WarmTransfer { .. } => {
                info!("⏸️ Agent {} release queued until call ends", self.agent.login);
                self.pending_release = Some(reason);
                Ok(SetStateOutcome::Queued)
            }
            AgentState::Precall(call) => {
                let next = AgentState::Released(reason);
                self.guard(&next)?;
                // Abandoning call preparation; the media leg is torn down.
                self.media_confirm(call.source.hangup("agent")).await?;
                self.transition(next);
                Ok(SetStateOutcome::Changed)
            }
            AgentState::Idle | AgentState::Released(_) | AgentState::Wrapup(_) => {
                let next = AgentState::Released(reason);
                self.guard(&next)?;
                if let AgentState::Wrapup(_) = self.state {
                    self.pending_release = None;
                }
                self.transition(next);
                Ok(SetStateOutcome::Changed)
            }
        }
    }

    fn handle_set_endpoint(&mut self, endpoint: Option<String>) -> Result<()> {
        match self.state {
            AgentState::Idle | AgentState::Released(_) => {
                debug!("📍 Agent {} endpoint: {:?}", self.agent.login, endpoint);
                self.agent.endpoint = endpoint;
                Ok(())
            }
            _ => Err(self.refuse("endpoint update")),
        }
    }

    async fn handle_dial(&mut self, number: String) -> Result<()> {
        match self.state.clone() {
            AgentState::Precall(call) => {
                if call.direction != Direction::Outbound {
                    return Err(AcdError::invalid_media_call("call is not outbound"));
                }
                self.media_confirm(call.source.dial(&number)).await?;
                self.transition(AgentState::Outgoing(call));
                Ok(())
            }
            _ => Err(self.refuse("outgoing")),
        }
    }

    async fn handle_agent_transfer(&mut self, target: String, case_id: Option<String>) -> Result<()> {
        let call = match self.state.clone() {
            AgentState::Oncall(call) => call,
            _ => return Err(self.refuse("wrapup")),
        };
        if target == self.agent.login {
            return Err(AcdError::bad_request("cannot transfer a call to yourself"));
        }
        let peer = self
            .registry
            .query(&target)
            .ok_or_else(|| AcdError::agent_missing(target.clone()))?;
        let snap = self.with_timeout(peer.dump_state()).await?;
        match snap.state {
            AgentState::Idle | AgentState::Released(_) => {}
            ref other => return Err(AcdError::invalid_state_change(other.label(), "ringing")),
        }
        self.media_confirm(call.source.agent_transfer(
            &target,
            snap.endpoint.as_deref(),
            case_id.as_deref(),
        ))
        .await?;
        info!("📤 Agent {} transferred call {} to {}", self.agent.login, call.id, target);
        self.transition(AgentState::Wrapup(call));
        Ok(())
    }

    async fn handle_queue_transfer(
        &mut self,
        queue: String,
        vars: Value,
        skills: HashSet<Skill>,
    ) -> Result<()> {
        match self.state.clone() {
            AgentState::Oncall(call) => {
                self.media_confirm(call.source.queue_transfer(&queue, vars, &skills)).await?;
                info!("📤 Agent {} requeued call {} onto {}", self.agent.login, call.id, queue);
                self.transition(AgentState::Wrapup(call));
                Ok(())
            }
            _ => Err(self.refuse("wrapup")),
        }
    }

    async fn handle_warm_transfer(&mut self, destination: String) -> Result<()> {
        match self.state.clone() {
            AgentState::Oncall(call) => {
                self.media_confirm(call.source.warm_transfer_begin(&destination)).await?;
                self.transition(AgentState::WarmTransfer { onhold: call, calling: destination });
                Ok(())
            }
            _ => Err(self.refuse("warmtransfer")),
        }
    }

    async fn handle_warm_transfer_complete(&mut self) -> Result<()> {
        match self.state.clone() {
            AgentState::WarmTransfer { onhold, .. } => {
                self.media_confirm(onhold.source.warm_transfer_complete()).await?;
                self.transition(AgentState::Wrapup(onhold));
                Ok(())
            }
            _ => Err(self.refuse("wrapup")),
        }
    }

    async fn handle_warm_transfer_cancel(&mut self) -> Result<()> {
        match self.state.clone() {
            AgentState::WarmTransfer { onhold, .. } => {
                self.media_confirm(onhold.source.warm_transfer_cancel()).await?;
                self.transition(AgentState::Oncall(onhold));
                Ok(())
            }
            _ => Err(self.refuse("oncall")),
        }
    }

    async fn handle_media_command(
        &mut self,
        name: String,
        mode: CommandMode,
        args: Vec<Value>,
    ) -> Result<Value> {
        let call = self
            .state
            .call()
            .cloned()
            .ok_or_else(|| AcdError::media_missing("no media attached"))?;
        match mode {
            CommandMode::Call => self.with_timeout(call.source.command(&name, &args)).await,
            CommandMode::Cast => {
                call.source.cast(&name, &args);
                Ok(Value::Null)
            }
        }
    }

    async fn handle_media_hangup(&mut self) -> Result<()> {
        match self.state.clone() {
            AgentState::Oncall(call)
            | AgentState::Outgoing(call)
            | AgentState::WarmTransfer { onhold: call, .. } => {
                self.media_confirm(call.source.hangup("agent")).await?;
                self.transition(AgentState::Wrapup(call));
                Ok(())
            }
            AgentState::Ringing(call) => {
                self.media_confirm(call.source.hangup("agent")).await?;
                self.ring_generation += 1;
                let next = self.after_call_state();
                self.transition(next);
                Ok(())
            }
            AgentState::Precall(call) => {
                self.media_confirm(call.source.hangup("agent")).await?;
                let next = self.after_call_state();
                self.transition(next);
                Ok(())
            }
            _ => Err(AcdError::media_missing("no media attached")),
        }
    }

    async fn handle_init_outbound(&mut self, client: String, media_type: MediaType) -> Result<()> {
        match self.state {
            AgentState::Idle | AgentState::Released(_) => {}
            _ => return Err(self.refuse("precall")),
        }
        let factory = self
            .settings
            .outbound
            .get(&media_type)
            .cloned()
            .ok_or_else(|| {
                AcdError::media_missing(format!("no outbound factory for {}", media_type))
            })?;
        let call = self
            .with_timeout(factory.create(&self.agent.login, &client))
            .await?;
        info!("📞 Agent {} prepared outbound {} call {}", self.agent.login, media_type, call.id);
        self.transition(AgentState::Precall(call));
        Ok(())
    }

    fn handle_ring(&mut self, call: Call) -> Result<()> {
        // A call offered during wrapup is refused until wrapup ends.
        self.guard(&AgentState::Ringing(call.clone()))?;
        info!("🔔 Agent {} offered call {}", self.agent.login, call.id);
        self.transition(AgentState::Ringing(call));
        self.arm_ring_timer();
        Ok(())
    }

    async fn handle_spy(&mut self, target: String) -> Result<()> {
        if target == self.agent.login {
            return Err(AcdError::bad_request("cannot spy on yourself"));
        }
        let peer = self
            .registry
            .query(&target)
            .ok_or_else(|| AcdError::agent_missing(target.clone()))?;
        let login = self.agent.login.clone();
        let endpoint = self.agent.endpoint.clone();
        self.with_timeout(peer.spy_attach(login, endpoint)).await?;
        info!("👁️ Agent {} spying on {}", self.agent.login, target);
        self.expecting_call = true;
        Ok(())
    }

    async fn handle_spy_attach(
        &mut self,
        observer: String,
        observer_endpoint: Option<String>,
    ) -> Result<()> {
        match self.state.clone() {
            AgentState::Oncall(call) => {
                self.media_confirm(call.source.spy(&observer, observer_endpoint.as_deref())).await
            }
            ref other => Err(AcdError::invalid_state_change(other.label(), "oncall")),
        }
    }

    fn handle_attach_expected_call(&mut self, call: Call) -> Result<()> {
        if !self.expecting_call {
            return Err(AcdError::invalid_media_call("no call expected"));
        }
        self.expecting_call = false;
        self.transition(AgentState::Oncall(call));
        Ok(())
    }

    fn handle_media_exited(&mut self) {
        warn!("💀 Media died while attached to agent {} ({})", self.agent.login, self.state.label());
        match self.state.clone() {
            AgentState::Oncall(call)
            | AgentState::Outgoing(call)
            | AgentState::WarmTransfer { onhold: call, .. } => {
                self.transition(AgentState::Wrapup(call));
            }
            AgentState::Ringing(_) | AgentState::Precall(_) => {
                self.ring_generation += 1;
                let next = self.after_call_state();
                self.transition(next);
            }
            AgentState::Idle | AgentState::Released(_) | AgentState::Wrapup(_) => {}
        }
    }

    async fn handle_ring_timeout(&mut self, generation: u64) {
        if generation != self.ring_generation {
            return;
        }
        if let AgentState::Ringing(call) = self.state.clone() {
            info!("⏰ Ring timed out for agent {} on call {}", self.agent.login, call.id);
            if let Err(e) = self.with_timeout(call.source.unring()).await {
                warn!("⚠️ Media refused unring for call {}: {}", call.id, e);
            }
            let next = self.after_call_state();
            self.transition(next);
        }
    }

    // ---- internals -----------------------------------------------------

    fn arm_ring_timer(&mut self) {
        self.ring_generation += 1;
        let generation = self.ring_generation;
        let handle = self.handle.clone();
        let ringout = self.settings.config.ringout();
        tokio::spawn(async move {
            tokio::time::sleep(ringout).await;
            handle.ring_timeout(generation);
        });
    }

    /// Where the agent lands when a call detaches without wrapup: a pending
    /// release if one was queued, otherwise idle.
    fn after_call_state(&mut self) -> AgentState {
        match self.pending_release.take() {
            Some(reason) => AgentState::Released(reason),
            None => AgentState::Idle,
        }
    }

    /// Check a requested transition against the transition table
    fn guard(&self, next: &AgentState) -> Result<()> {
        if self.state.may_transition_to(next) {
            Ok(())
        } else {
            Err(AcdError::invalid_state_change(self.state.label(), next.label()))
        }
    }

    fn refuse(&self, requested: &str) -> AcdError {
        AcdError::invalid_state_change(self.state.label(), requested)
    }

    fn blab_matches(&self, target: &BlabTarget) -> bool {
        match target {
            BlabTarget::All => true,
            BlabTarget::Agent(login) => *login == self.agent.login,
            BlabTarget::Profile(profile) => *profile == self.agent.profile,
            BlabTarget::Node(node) => *node == self.settings.config.general.node,
        }
    }

    async fn media_confirm(&mut self, fut: impl Future<Output = Result<()>>) -> Result<()> {
        self.with_timeout(fut).await
    }

    async fn with_timeout<T>(&self, fut: impl Future<Output = Result<T>>) -> Result<T> {
        match timeout(self.settings.config.collaborator_timeout(), fut).await {
            Ok(result) => result,
            Err(_) => Err(AcdError::unknown("collaborator timed out")),
        }
    }

    fn transition(&mut self, next: AgentState) {
        debug!("🔄 Agent {} state: {} -> {}", self.agent.login, self.state.label(), next.label());
        self.state = next;
        self.last_change = Utc::now();
        let event = AgentEvent::StateChange { state: self.state.clone() };
        self.emit(event);
    }

    fn emit(&mut self, event: AgentEvent) {
        if let Some(gateway) = &self.gateway {
            if gateway.send(event).is_err() {
                // The gateway is gone; our client can no longer see us.
                warn!("💀 Web gateway lost for agent {}, terminating session", self.agent.login);
                self.gateway = None;
                self.alive = false;
            }
        }
    }

    fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            login: self.agent.login.clone(),
            id: self.agent.id.clone(),
            profile: self.agent.profile.clone(),
            security_level: self.agent.security_level,
            skills: self.agent.skills.clone(),
            endpoint: self.agent.endpoint.clone(),
            state: self.state.clone(),
            last_change: self.last_change,
            since: self.since,
        }
    }
}
