use std::net::SocketAddr;
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{AcdError, Result};

/// Top-level configuration for the agent session core
///
/// Groups the tunables of the session engine into sections mirroring the
/// components they govern:
///
/// - [`general`](AcdConfig::general): process-wide settings such as the HTTP
///   bind address and the node name announced to the cluster
/// - [`agents`](AcdConfig::agents): per-session behavior, most importantly
///   the ring timeout
/// - [`web`](AcdConfig::web): long-poll liveness windows and the event flush
///   coalescing interval
///
/// # Examples
///
/// ```
/// use openacd_agent_core::config::AcdConfig;
///
/// let mut config = AcdConfig::default();
/// config.agents.default_ringout_seconds = 45;
/// config.validate().expect("configuration should be valid");
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AcdConfig {
    /// General system settings
    pub general: GeneralConfig,
    /// Agent session behavior
    pub agents: AgentConfig,
    /// Web gateway and long-poll behavior
    pub web: WebConfig,
}

/// General system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Address the HTTP listener binds to
    pub listen_addr: SocketAddr,
    /// Name of this node as reported in registry listings
    pub node: String,
    /// Timeout applied to calls into collaborators (registry, peers)
    pub collaborator_timeout_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:5050".parse().unwrap(),
            node: "openacd@localhost".to_string(),
            collaborator_timeout_seconds: 5,
        }
    }
}

/// Agent session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Seconds a call may ring an agent before it is pulled back
    pub default_ringout_seconds: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            default_ringout_seconds: 30,
        }
    }
}

/// Web gateway configuration
///
/// The liveness numbers come in a pair: the gateway checks every
/// `keepalive_check_seconds` whether a poll has been seen within
/// `poll_liveness_seconds`; a session with no poll inside that window is
/// torn down, and a waiter idle that long is answered with a synthetic
/// `pong` so the client re-polls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    /// Interval between liveness checks
    pub keepalive_check_seconds: u64,
    /// Window without a poll after which the session is considered dead
    pub poll_liveness_seconds: u64,
    /// Coalescing window between the first buffered event and the flush
    pub event_flush_millis: u64,
    /// Name of the session cookie issued to authenticated clients
    pub cookie_name: String,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            keepalive_check_seconds: 11,
            poll_liveness_seconds: 20,
            event_flush_millis: 500,
            cookie_name: "cpx_id".to_string(),
        }
    }
}

impl AcdConfig {
    /// Validate the configuration
    ///
    /// Checks cross-field consistency that serde cannot express. Returns the
    /// first problem found.
    pub fn validate(&self) -> Result<()> {
        if self.general.collaborator_timeout_seconds == 0 {
            return Err(AcdError::bad_request("collaborator timeout must be non-zero"));
        }
        if self.agents.default_ringout_seconds == 0 {
            return Err(AcdError::bad_request("ring timeout must be non-zero"));
        }
        if self.web.event_flush_millis == 0 {
            return Err(AcdError::bad_request("event flush window must be non-zero"));
        }
        if self.web.keepalive_check_seconds >= self.web.poll_liveness_seconds {
            return Err(AcdError::bad_request(
                "keepalive check interval must be shorter than the poll liveness window",
            ));
        }
        if self.web.cookie_name.is_empty() {
            return Err(AcdError::bad_request("cookie name must not be empty"));
        }
        Ok(())
    }

    /// Ring timeout as a [`Duration`]
    pub fn ringout(&self) -> Duration {
        Duration::from_secs(self.agents.default_ringout_seconds)
    }

    /// Collaborator call timeout as a [`Duration`]
    pub fn collaborator_timeout(&self) -> Duration {
        Duration::from_secs(self.general.collaborator_timeout_seconds)
    }
}
