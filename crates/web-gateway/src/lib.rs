//! # OpenACD Web Gateway
//!
//! Bridges stateless HTTP agent clients to stateful
//! [`openacd-agent-core`](openacd_agent_core) sessions via JSON commands
//! and long polling.
//!
//! ## Overview
//!
//! Three layers, outermost first:
//!
//! - [`listener`]: the axum front door that authenticates logins, issues
//!   the session cookie, and routes `/api` and `/poll`
//! - [`dispatch`]: the fixed function table translating
//!   `{"function", "args"}` requests into session operations and folding
//!   every outcome into the success/error envelope
//! - [`gateway`]: the per-connection actor buffering session events for the
//!   single long-poll waiter, with displacement, flush coalescing, and
//!   keep-alive semantics
//!
//! [`encode`] holds the client JSON shapes, including the state-data rules
//! web clients depend on.
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use openacd_agent_core::prelude::*;
//! use openacd_web_gateway::listener::{serve, ListenerState};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AcdConfig::default();
//! let registry = AgentRegistry::new(SessionSettings::new(config.clone()));
//! let auth = MemoryAuth::new();
//! auth.add_simple("alice", "secret", SecurityLevel::Agent);
//!
//! let state = ListenerState::new(registry, Arc::new(auth), config);
//! serve(state).await?;
//! # Ok(())
//! # }
//! ```

pub mod dispatch;
pub mod encode;
pub mod gateway;
pub mod listener;

pub use dispatch::{ApiRequest, ApiResponse};
pub use gateway::{PollOutcome, WebGateway};
pub use listener::{create_router, serve, ListenerState};
