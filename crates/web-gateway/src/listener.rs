//! # HTTP Listener
//!
//! Stateless front door for web agent clients. It authenticates logins
//! against the agent directory, binds one [`WebGateway`] per authenticated
//! agent, and routes the two session endpoints:
//!
//! - `POST /api`: one JSON request in the `request` form field, answered
//!   with the success/error envelope (the envelope, not the HTTP status,
//!   carries business failure)
//! - `POST /poll`: registers the caller as the session's long-poll waiter
//!
//! A session cookie (`cpx_id` by default) ties requests to their gateway;
//! logout answers with the sentinel `dead` cookie. Insufficient privilege
//! answers 403, unknown paths 404, and a displaced poll 408, with the
//! envelope still authoritative in every body.

use std::sync::Arc;
use axum::{
    extract::{Form, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use dashmap::DashMap;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use uuid::Uuid;

use openacd_agent_core::auth::AgentAuth;
use openacd_agent_core::{AcdConfig, AgentRegistry, StartResult};

use crate::dispatch::{ApiRequest, ApiResponse};
use crate::gateway::{PollOutcome, WebGateway};

/// Cookie value marking a terminated session
const DEAD_COOKIE: &str = "dead";

/// Shared listener state
#[derive(Clone)]
pub struct ListenerState {
    pub registry: AgentRegistry,
    pub auth: Arc<dyn AgentAuth>,
    pub config: Arc<AcdConfig>,
    /// cookie value -> bound gateway
    connections: Arc<DashMap<String, WebGateway>>,
}

impl ListenerState {
    pub fn new(registry: AgentRegistry, auth: Arc<dyn AgentAuth>, config: AcdConfig) -> Self {
        Self {
            registry,
            auth,
            config: Arc::new(config),
            connections: Arc::new(DashMap::new()),
        }
    }

    fn gateway_for(&self, headers: &HeaderMap) -> Option<WebGateway> {
        let cookie = self.cookie_value(headers)?;
        self.connections.get(&cookie).map(|entry| entry.value().clone())
    }

    fn cookie_value(&self, headers: &HeaderMap) -> Option<String> {
        let raw = headers.get(header::COOKIE)?.to_str().ok()?;
        raw.split(';')
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.config.web.cookie_name)
            .map(|(_, value)| value.to_string())
            .filter(|value| value != DEAD_COOKIE)
    }

    fn set_cookie(&self, value: &str) -> (header::HeaderName, String) {
        (
            header::SET_COOKIE,
            format!("{}={}; Path=/; HttpOnly", self.config.web.cookie_name, value),
        )
    }
}

/// Bind the configured address and serve until shutdown
pub async fn serve(state: ListenerState) -> std::io::Result<()> {
    let addr = state.config.general.listen_addr;
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("✅ Agent web listener on {}", addr);
    axum::serve(listener, router).await
}

/// Build the listener router
pub fn create_router(state: ListenerState) -> Router {
    Router::new()
        .route("/login", post(login))
        .route("/api", post(api))
        .route("/poll", post(poll))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct LoginForm {
    username: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct ApiForm {
    request: String,
}

async fn login(
    State(state): State<ListenerState>,
    Form(form): Form<LoginForm>,
) -> Response {
    let agent = match state.auth.authenticate(&form.username, &form.password).await {
        Ok(Some(agent)) => agent,
        Ok(None) => {
            return Json(
                ApiResponse::bad_request("invalid credentials").to_json(),
            )
            .into_response()
        }
        Err(e) => return Json(ApiResponse::from_error(&e).to_json()).into_response(),
    };

    let security = agent.security_level;
    let handle = match state.registry.start_agent(agent) {
        StartResult::Fresh(handle) => handle,
        StartResult::Existing(_) => {
            warn!("🚫 Login refused, {} already has a live session", form.username);
            let error = openacd_agent_core::AcdError::AlreadyLoggedIn(form.username);
            return Json(ApiResponse::from_error(&error).to_json()).into_response();
        }
    };

    let gateway = match WebGateway::spawn(handle, security, state.registry.clone(), &state.config) {
        Ok(gateway) => gateway,
        Err(e) => return Json(ApiResponse::from_error(&e).to_json()).into_response(),
    };

    let cookie = Uuid::new_v4().to_string();
    let login = gateway.session().login().to_string();
    state.connections.insert(cookie.clone(), gateway);
    info!("🔑 Agent {} logged in", login);

    let body = json!({
        "success": true,
        "result": { "login": login, "securitylevel": security.to_string() },
    });
    ([state.set_cookie(&cookie)], Json(body)).into_response()
}

async fn api(
    State(state): State<ListenerState>,
    headers: HeaderMap,
    Form(form): Form<ApiForm>,
) -> Response {
    let Some(gateway) = state.gateway_for(&headers) else {
        return Json(ApiResponse::bad_request("no session").to_json()).into_response();
    };
    let request: ApiRequest = match serde_json::from_str(&form.request) {
        Ok(request) => request,
        Err(e) => {
            return Json(
                ApiResponse::bad_request(format!("unparseable request: {}", e)).to_json(),
            )
            .into_response()
        }
    };

    let is_logout = request.function == "logout";
    let response = gateway.handle_api(&request).await;

    if is_logout {
        if let Some(cookie) = state.cookie_value(&headers) {
            state.connections.remove(&cookie);
        }
        gateway.stop();
        return ([state.set_cookie(DEAD_COOKIE)], Json(response.to_json())).into_response();
    }

    match response {
        ApiResponse::Forbidden => {
            (StatusCode::FORBIDDEN, Json(response.to_json())).into_response()
        }
        other => Json(other.to_json()).into_response(),
    }
}

async fn poll(State(state): State<ListenerState>, headers: HeaderMap) -> Response {
    let Some(gateway) = state.gateway_for(&headers) else {
        return Json(ApiResponse::bad_request("no session").to_json()).into_response();
    };
    match gateway.poll().await {
        PollOutcome::Events(events) => {
            Json(json!({ "success": true, "result": events })).into_response()
        }
        PollOutcome::Replaced => (
            StatusCode::REQUEST_TIMEOUT,
            Json(ApiResponse::from_error(&openacd_agent_core::AcdError::PollReplaced).to_json()),
        )
            .into_response(),
        PollOutcome::Closed => Json(
            ApiResponse::from_error(&openacd_agent_core::AcdError::unknown(
                "session terminated",
            ))
            .to_json(),
        )
        .into_response(),
    }
}
