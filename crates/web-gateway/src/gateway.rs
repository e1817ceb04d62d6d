//! # Web Gateway
//!
//! Per-connection adapter between a stateless HTTP client and a stateful
//! agent session. The gateway buffers session events into an ordered FIFO
//! and delivers them to at most one registered long-poll waiter, with the
//! liveness rules web clients depend on:
//!
//! - a new poll displaces the previous waiter, which is answered with
//!   `POLL_PID_REPLACED` before the newcomer registers
//! - events are coalesced for 500 ms so a burst arrives as one batch
//! - every 11 s a keep-alive check runs: a session that has not polled for
//!   20 s is torn down, and a waiter parked for 20 s with nothing to say is
//!   answered with a synthetic `pong` so the client re-polls
//!
//! The gateway's lifecycle is bound to its session: when the session's
//! event channel closes, any parked waiter is released with a final error
//! and the gateway stops; when the gateway declares the client gone, it
//! logs the agent out.

use std::collections::VecDeque;
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, sleep_until, Duration, Instant};
use tracing::{debug, info, warn};

use openacd_agent_core::{AcdConfig, AgentRegistry, SecurityLevel, SessionHandle};

use crate::encode;

/// How a parked poll was answered
#[derive(Debug)]
pub enum PollOutcome {
    /// Ordered batch of client events
    Events(Vec<Value>),
    /// A newer poll displaced this one
    Replaced,
    /// The session is gone; this is the final answer on this connection
    Closed,
}

enum GatewayMsg {
    Poll { reply: oneshot::Sender<PollOutcome> },
    Stop,
}

/// Handle to a running gateway actor
#[derive(Clone)]
pub struct WebGateway {
    session: SessionHandle,
    registry: AgentRegistry,
    security: SecurityLevel,
    tx: mpsc::UnboundedSender<GatewayMsg>,
}

impl WebGateway {
    /// Subscribe to `session` and start the gateway actor
    pub fn spawn(
        session: SessionHandle,
        security: SecurityLevel,
        registry: AgentRegistry,
        config: &AcdConfig,
    ) -> openacd_agent_core::Result<WebGateway> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        session.subscribe(events_tx)?;
        let (tx, rx) = mpsc::unbounded_channel();
        let actor = GatewayActor {
            login: session.login().to_string(),
            session: session.clone(),
            events: events_rx,
            commands: rx,
            buffer: VecDeque::new(),
            waiter: None,
            waiter_since: Instant::now(),
            last_poll_at: Instant::now(),
            flush_at: None,
            flush_window: Duration::from_millis(config.web.event_flush_millis),
            keepalive_check: Duration::from_secs(config.web.keepalive_check_seconds),
            liveness_window: Duration::from_secs(config.web.poll_liveness_seconds),
        };
        tokio::spawn(actor.run());
        Ok(WebGateway { session, registry, security, tx })
    }

    /// Register the caller as the long-poll waiter and await fulfilment
    pub async fn poll(&self) -> PollOutcome {
        let (reply, rx) = oneshot::channel();
        if self.tx.send(GatewayMsg::Poll { reply }).is_err() {
            return PollOutcome::Closed;
        }
        rx.await.unwrap_or(PollOutcome::Closed)
    }

    /// Stop the actor without touching the session
    pub fn stop(&self) {
        let _ = self.tx.send(GatewayMsg::Stop);
    }

    /// The session this gateway is bound to
    pub fn session(&self) -> &SessionHandle {
        &self.session
    }

    /// The registry, for supervisor operations
    pub fn registry(&self) -> &AgentRegistry {
        &self.registry
    }

    /// Privilege of the logged-in agent
    pub fn security(&self) -> SecurityLevel {
        self.security
    }
}

struct GatewayActor {
    login: String,
    session: SessionHandle,
    events: mpsc::UnboundedReceiver<openacd_agent_core::AgentEvent>,
    commands: mpsc::UnboundedReceiver<GatewayMsg>,
    buffer: VecDeque<Value>,
    waiter: Option<oneshot::Sender<PollOutcome>>,
    waiter_since: Instant,
    last_poll_at: Instant,
    flush_at: Option<Instant>,
    flush_window: Duration,
    keepalive_check: Duration,
    liveness_window: Duration,
}

impl GatewayActor {
    async fn run(mut self) {
        debug!("🌐 Web gateway started for {}", self.login);
        let mut keepalive =
            interval_at(Instant::now() + self.keepalive_check, self.keepalive_check);
        loop {
            let flush_deadline = self.flush_at;
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(event) => self.on_event(encode::event_to_json(&event)),
                    None => {
                        // linkto: the session died, take the connection with it.
                        info!("🔌 Session gone, closing gateway for {}", self.login);
                        if let Some(waiter) = self.waiter.take() {
                            let _ = waiter.send(PollOutcome::Closed);
                        }
                        break;
                    }
                },
                command = self.commands.recv() => match command {
                    Some(GatewayMsg::Poll { reply }) => self.on_poll(reply),
                    Some(GatewayMsg::Stop) | None => {
                        if let Some(waiter) = self.waiter.take() {
                            let _ = waiter.send(PollOutcome::Closed);
                        }
                        break;
                    }
                },
                _ = keepalive.tick() => {
                    if !self.on_keepalive().await {
                        break;
                    }
                },
                _ = async { sleep_until(flush_deadline.unwrap()).await },
                    if flush_deadline.is_some() => self.on_flush(),
            }
        }
        debug!("🌐 Web gateway stopped for {}", self.login);
    }

    fn on_event(&mut self, event: Value) {
        self.buffer.push_back(event);
        if self.flush_at.is_none() {
            self.flush_at = Some(Instant::now() + self.flush_window);
        }
    }

    fn on_poll(&mut self, reply: oneshot::Sender<PollOutcome>) {
        self.last_poll_at = Instant::now();
        if let Some(previous) = self.waiter.take() {
            debug!("↩️ Displacing previous poll for {}", self.login);
            let _ = previous.send(PollOutcome::Replaced);
        }
        if self.buffer.is_empty() {
            self.waiter = Some(reply);
            self.waiter_since = Instant::now();
        } else {
            let _ = reply.send(PollOutcome::Events(self.drain()));
            self.flush_at = None;
        }
    }

    fn on_flush(&mut self) {
        self.flush_at = None;
        if self.buffer.is_empty() {
            return;
        }
        if let Some(waiter) = self.waiter.take() {
            let _ = waiter.send(PollOutcome::Events(self.drain()));
        }
        // With no waiter the batch stays buffered for the next poll.
    }

    /// Returns false when the session was torn down for missed polls
    async fn on_keepalive(&mut self) -> bool {
        if self.waiter.is_none() {
            if self.last_poll_at.elapsed() >= self.liveness_window {
                warn!("💤 Agent {} missed polls for {:?}, logging out", self.login, self.liveness_window);
                if let Err(e) = self.session.logout().await {
                    debug!("Session for {} already gone: {}", self.login, e);
                }
                return false;
            }
        } else if self.waiter_since.elapsed() >= self.liveness_window {
            // Nothing to say for a while; answer with a pong so the client
            // returns and re-polls.
            self.buffer.push_back(encode::pong());
            if let Some(waiter) = self.waiter.take() {
                let _ = waiter.send(PollOutcome::Events(self.drain()));
            }
            self.flush_at = None;
        }
        true
    }

    fn drain(&mut self) -> Vec<Value> {
        self.buffer.drain(..).collect()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use openacd_agent_core::prelude::*;

    fn agent(login: &str) -> Agent {
        Agent {
            login: login.to_string(),
            id: format!("id-{}", login),
            profile: "Default".to_string(),
            security_level: SecurityLevel::Agent,
            skills: HashSet::from([Skill::atom("english")]),
            endpoint: None,
        }
    }

    fn setup() -> (AgentRegistry, SessionHandle, WebGateway) {
        let config = AcdConfig::default();
        let registry = AgentRegistry::new(SessionSettings::new(config.clone()));
        let handle = registry.start_agent(agent("alice")).handle().clone();
        let gateway =
            WebGateway::spawn(handle.clone(), SecurityLevel::Agent, registry.clone(), &config)
                .unwrap();
        (registry, handle, gateway)
    }

    #[tokio::test(start_paused = true)]
    async fn newer_poll_displaces_older_waiter() {
        let (_registry, _handle, gateway) = setup();
        let first = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.poll().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        let second = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.poll().await }
        });
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The older poll terminates before the newer one is answered.
        assert!(matches!(first.await.unwrap(), PollOutcome::Replaced));
        assert!(!second.is_finished());
        second.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn burst_of_events_arrives_as_one_batch() {
        let (_registry, handle, gateway) = setup();
        let waiter = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.poll().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        for text in ["one", "two", "three"] {
            handle.notify(AgentEvent::Blab { text: text.to_string() }).unwrap();
        }
        tokio::time::sleep(Duration::from_millis(600)).await;

        match waiter.await.unwrap() {
            PollOutcome::Events(events) => {
                assert_eq!(events.len(), 3);
                assert!(events.iter().all(|e| e["command"] == "blab"));
            }
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn buffered_events_drain_immediately_on_poll() {
        let (_registry, handle, gateway) = setup();
        handle.notify(AgentEvent::Blab { text: "hello".to_string() }).unwrap();
        // Give the gateway a moment to buffer, then poll before the flush
        // window has elapsed.
        tokio::time::sleep(Duration::from_millis(50)).await;

        match gateway.poll().await {
            PollOutcome::Events(events) => assert_eq!(events.len(), 1),
            other => panic!("expected events, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn idle_waiter_receives_exactly_one_pong() {
        let (_registry, _handle, gateway) = setup();
        let waiter = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.poll().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        tokio::time::advance(Duration::from_secs(22)).await;
        match waiter.await.unwrap() {
            PollOutcome::Events(events) => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0]["command"], "pong");
                assert!(events[0]["timestamp"].is_i64());
            }
            other => panic!("expected pong, got {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn missed_polls_terminate_the_session() {
        let (registry, _handle, gateway) = setup();
        // Let the gateway actor start (and anchor its keepalive interval)
        // before the clock jumps forward.
        tokio::task::yield_now().await;
        // Never poll. Liveness expires after 20 s; checks run every 11 s.
        tokio::time::advance(Duration::from_secs(23)).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(registry.query("alice").is_none());
        assert!(matches!(gateway.poll().await, PollOutcome::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn session_death_releases_waiter_with_final_answer() {
        let (_registry, handle, gateway) = setup();
        let waiter = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.poll().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.logout().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(matches!(waiter.await.unwrap(), PollOutcome::Closed));
    }

    #[tokio::test(start_paused = true)]
    async fn state_events_flow_to_the_waiter() {
        let (_registry, handle, gateway) = setup();
        let waiter = tokio::spawn({
            let gateway = gateway.clone();
            async move { gateway.poll().await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        handle.ring(Call::dummy("call-42")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(600)).await;

        match waiter.await.unwrap() {
            PollOutcome::Events(events) => {
                assert_eq!(events.len(), 1);
                assert_eq!(events[0]["command"], "astate");
                assert_eq!(events[0]["state"], "ringing");
                assert_eq!(events[0]["statedata"]["callid"], "call-42");
            }
            other => panic!("expected astate, got {:?}", other),
        }
    }
}
