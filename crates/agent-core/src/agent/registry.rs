//! # Agent Registry
//!
//! Cluster-wide directory answering one question: is agent X logged in, and
//! where? Queues resolve agents through it to offer calls, sessions resolve
//! peers for transfers and spying, and supervisors enumerate it for
//! dashboards.
//!
//! Operations on one login are linearized by the underlying map's entry
//! locking: when two nodes race to create the same login, one wins and the
//! other observes the existing session. This deployment keeps the directory
//! in process memory; the `start/query/unregister/list/blab` surface is the
//! contract, so a consensus-backed directory can replace the map without
//! touching the sessions.
//!
//! A session that terminates for any reason removes itself from the
//! registry on its way out, guarded by the session id so a newer login for
//! the same agent is never removed by a stale cleanup.

use std::sync::Arc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::agent::session::{AgentSession, SessionHandle, SessionSettings};
use crate::agent::types::{Agent, AgentSnapshot};

/// Addressing for blab broadcasts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlabTarget {
    /// Every logged-in agent
    All,
    /// One agent by login
    Agent(String),
    /// Every agent in a profile
    Profile(String),
    /// Every agent on a node
    Node(String),
}

/// Outcome of `start_agent`
pub enum StartResult {
    /// A new session was created and its presence announced
    Fresh(SessionHandle),
    /// A live session already existed for this login
    Existing(SessionHandle),
}

impl StartResult {
    /// The handle, fresh or not
    pub fn handle(&self) -> &SessionHandle {
        match self {
            StartResult::Fresh(h) | StartResult::Existing(h) => h,
        }
    }
}

/// The login -> live session directory
#[derive(Clone)]
pub struct AgentRegistry {
    settings: SessionSettings,
    sessions: Arc<DashMap<String, SessionHandle>>,
}

impl AgentRegistry {
    pub fn new(settings: SessionSettings) -> Self {
        Self {
            settings,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Start a session for `agent`, or return the live one
    ///
    /// Linearizable per login: of two concurrent callers, exactly one gets
    /// [`StartResult::Fresh`].
    pub fn start_agent(&self, agent: Agent) -> StartResult {
        match self.sessions.entry(agent.login.clone()) {
            Entry::Occupied(entry) => {
                debug!("👥 Login {} already has a live session", entry.key());
                StartResult::Existing(entry.get().clone())
            }
            Entry::Vacant(entry) => {
                let login = agent.login.clone();
                let handle = AgentSession::spawn(agent, self.settings.clone(), self.clone());
                entry.insert(handle.clone());
                info!("📣 Agent {} is now present on {}", login, self.settings.config.general.node);
                StartResult::Fresh(handle)
            }
        }
    }

    /// Look up the live session for a login
    ///
    /// Answers from the live map only; a dead session is never returned
    /// stale because its cleanup removed it.
    pub fn query(&self, login: &str) -> Option<SessionHandle> {
        self.sessions.get(login).map(|entry| entry.value().clone())
    }

    /// Snapshot every logged-in agent
    ///
    /// Sessions that terminate while the listing is being gathered are
    /// skipped rather than reported stale.
    pub async fn list(&self) -> Vec<AgentSnapshot> {
        let handles: Vec<SessionHandle> =
            self.sessions.iter().map(|entry| entry.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(handles.len());
        for handle in handles {
            if let Ok(snapshot) = handle.dump_state().await {
                snapshots.push(snapshot);
            }
        }
        snapshots
    }

    /// Broadcast a blab to every session matching `target`
    ///
    /// Delivery is fire-and-forget; each session filters on its own login,
    /// profile, and node, so no registry-side state can go stale between
    /// the match and the delivery.
    pub fn blab(&self, target: BlabTarget, text: &str) {
        info!("📢 Blab to {:?}: {}", target, text);
        match &target {
            BlabTarget::Agent(login) => {
                if let Some(handle) = self.query(login) {
                    handle.blab(target.clone(), text.to_string());
                }
            }
            _ => {
                for entry in self.sessions.iter() {
                    entry.value().blab(target.clone(), text.to_string());
                }
            }
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove a dead session, but only the exact incarnation that died
    pub(crate) fn unregister(&self, login: &str, session_id: Uuid) {
        let removed = self
            .sessions
            .remove_if(login, |_, handle| handle.session_id() == session_id)
            .is_some();
        if removed {
            debug!("🧹 Removed session for {}", login);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::time::Duration;

    use super::*;
    use crate::agent::types::{Agent, AgentState, SecurityLevel, Skill};
    use crate::config::AcdConfig;
    use crate::events::AgentEvent;
    use tokio::sync::mpsc;

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

    fn registry() -> AgentRegistry {
        AgentRegistry::new(SessionSettings::new(AcdConfig::default()))
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn duplicate_login_observes_existing() {
        let registry = registry();
        let first = registry.start_agent(agent("alice"));
        assert!(matches!(first, StartResult::Fresh(_)));
        let second = registry.start_agent(agent("alice"));
        assert!(matches!(second, StartResult::Existing(_)));
        assert_eq!(registry.len(), 1);
        // The existing session is untouched and still answers.
        let snap = second.handle().dump_state().await.unwrap();
        assert!(matches!(snap.state, AgentState::Idle));
    }

    #[tokio::test]
    async fn logout_removes_session_from_directory() {
        let registry = registry();
        let handle = registry.start_agent(agent("alice")).handle().clone();
        handle.logout().await.unwrap();
        settle().await;
        assert!(registry.query("alice").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn stale_cleanup_does_not_remove_newer_session() {
        let registry = registry();
        let old = registry.start_agent(agent("alice")).handle().clone();
        old.logout().await.unwrap();
        settle().await;
        let fresh = registry.start_agent(agent("alice")).handle().clone();
        // A late cleanup from the dead incarnation must not evict the new one.
        registry.unregister("alice", old.session_id());
        assert!(registry.query("alice").is_some());
        registry.unregister("alice", fresh.session_id());
        assert!(registry.query("alice").is_none());
    }

    #[tokio::test]
    async fn list_snapshots_every_agent() {
        let registry = registry();
        registry.start_agent(agent("alice"));
        registry.start_agent(agent("bob"));
        let listing = registry.list().await;
        let mut logins: Vec<String> = listing.into_iter().map(|s| s.login).collect();
        logins.sort();
        assert_eq!(logins, vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn blab_reaches_only_matching_sessions() {
        let registry = registry();
        let alice = registry.start_agent(agent("alice")).handle().clone();
        let bob = registry.start_agent(agent("bob")).handle().clone();

        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        let (bob_tx, mut bob_rx) = mpsc::unbounded_channel();
        alice.subscribe(alice_tx).unwrap();
        bob.subscribe(bob_tx).unwrap();

        registry.blab(BlabTarget::Agent("alice".to_string()), "see me after shift");
        settle().await;
        assert!(matches!(alice_rx.try_recv(), Ok(AgentEvent::Blab { .. })));
        assert!(bob_rx.try_recv().is_err());

        registry.blab(BlabTarget::All, "good morning");
        settle().await;
        assert!(matches!(alice_rx.try_recv(), Ok(AgentEvent::Blab { .. })));
        assert!(matches!(bob_rx.try_recv(), Ok(AgentEvent::Blab { .. })));
    }

    #[tokio::test]
    async fn blab_by_profile_filters_in_session() {
        let registry = registry();
        let mut supervisor = agent("carol");
        supervisor.profile = "Supervisors".to_string();
        let carol = registry.start_agent(supervisor).handle().clone();
        let alice = registry.start_agent(agent("alice")).handle().clone();

        let (carol_tx, mut carol_rx) = mpsc::unbounded_channel();
        let (alice_tx, mut alice_rx) = mpsc::unbounded_channel();
        carol.subscribe(carol_tx).unwrap();
        alice.subscribe(alice_tx).unwrap();

        registry.blab(BlabTarget::Profile("Supervisors".to_string()), "meeting at 3");
        settle().await;
        assert!(matches!(carol_rx.try_recv(), Ok(AgentEvent::Blab { .. })));
        assert!(alice_rx.try_recv().is_err());
    }
}
