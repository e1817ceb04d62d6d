//! Agent authentication seam
//!
//! The persistent agent directory is an external collaborator; the core
//! only needs a way to turn credentials into an agent profile. Real
//! deployments back this with their directory of choice; [`MemoryAuth`]
//! serves the demo server and the test suites.

use std::collections::HashSet;
use async_trait::async_trait;
use dashmap::DashMap;

use crate::agent::{Agent, SecurityLevel, Skill};
use crate::error::Result;

/// Credential check against the agent directory
#[async_trait]
pub trait AgentAuth: Send + Sync {
    /// `Ok(Some(agent))` on success, `Ok(None)` on bad credentials
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Agent>>;
}

/// In-memory agent directory
pub struct MemoryAuth {
    users: DashMap<String, (String, Agent)>,
}

impl MemoryAuth {
    pub fn new() -> Self {
        Self { users: DashMap::new() }
    }

    /// Add an agent with the given password
    pub fn add_agent(&self, password: &str, agent: Agent) {
        self.users.insert(agent.login.clone(), (password.to_string(), agent));
    }

    /// Convenience for seeding test agents
    pub fn add_simple(&self, login: &str, password: &str, security_level: SecurityLevel) {
        self.add_agent(
            password,
            Agent {
                login: login.to_string(),
                id: format!("id-{}", login),
                profile: "Default".to_string(),
                security_level,
                skills: HashSet::from([Skill::atom("english")]),
                endpoint: None,
            },
        );
    }
}

impl Default for MemoryAuth {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AgentAuth for MemoryAuth {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Option<Agent>> {
        Ok(self.users.get(username).and_then(|entry| {
            let (stored, agent) = entry.value();
            (stored == password).then(|| agent.clone())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn authenticates_known_agent() {
        let auth = MemoryAuth::new();
        auth.add_simple("alice", "secret", SecurityLevel::Agent);
        let agent = auth.authenticate("alice", "secret").await.unwrap().unwrap();
        assert_eq!(agent.login, "alice");
        assert!(auth.authenticate("alice", "wrong").await.unwrap().is_none());
        assert!(auth.authenticate("bob", "secret").await.unwrap().is_none());
    }
}
