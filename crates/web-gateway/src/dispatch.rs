//! # API Dispatch
//!
//! Requests arrive as `{"function": name, "args": [...]}` against a fixed
//! function table. The table carries each function's arity range and
//! privilege, so malformed or unauthorized requests are refused here and
//! never reach the session. Results are folded into one of exactly three
//! envelope shapes: success, success-with-result, or error.

use std::collections::HashSet;
use serde::Deserialize;
use serde_json::{json, Value};

use openacd_agent_core::{
    AcdError, BlabTarget, CommandMode, MediaType, ReleaseReason, Result, Skill, StateRequest,
    SetStateOutcome,
};

use crate::encode;
use crate::gateway::WebGateway;

/// A parsed client request
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRequest {
    pub function: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

/// The three response shapes, plus the privilege refusal the listener
/// turns into an HTTP 403
#[derive(Debug, Clone, PartialEq)]
pub enum ApiResponse {
    Success,
    SuccessValue(Value),
    Error { errcode: &'static str, message: String },
    Forbidden,
}

impl ApiResponse {
    pub fn from_error(error: &AcdError) -> Self {
        ApiResponse::Error { errcode: errcode(error), message: error.to_string() }
    }

    pub fn bad_request<S: Into<String>>(message: S) -> Self {
        ApiResponse::Error { errcode: "BAD_REQUEST", message: message.into() }
    }

    /// The envelope as sent on the wire
    pub fn to_json(&self) -> Value {
        match self {
            ApiResponse::Success => json!({ "success": true }),
            ApiResponse::SuccessValue(result) => json!({ "success": true, "result": result }),
            ApiResponse::Error { errcode, message } => json!({
                "success": false,
                "errcode": errcode,
                "message": message,
            }),
            ApiResponse::Forbidden => json!({
                "success": false,
                "errcode": "BAD_REQUEST",
                "message": "supervisor privilege required",
            }),
        }
    }
}

/// Wire error code for an error
pub fn errcode(error: &AcdError) -> &'static str {
    match error {
        AcdError::InvalidStateChange { .. } => "INVALID_STATE_CHANGE",
        AcdError::InvalidMediaCall(_) => "INVALID_MEDIA_CALL",
        AcdError::MediaMissing(_) => "MEDIA_NOEXISTS",
        AcdError::AgentMissing(_) => "AGENT_NOEXISTS",
        AcdError::BadRequest(_) => "BAD_REQUEST",
        AcdError::PollReplaced => "POLL_PID_REPLACED",
        AcdError::ClusterUnavailable(_) | AcdError::AlreadyLoggedIn(_) | AcdError::Unknown(_) => {
            "UNKNOWN_ERROR"
        }
    }
}

struct ApiFunction {
    name: &'static str,
    min_args: usize,
    max_args: usize,
    supervisor_only: bool,
}

const FUNCTIONS: &[ApiFunction] = &[
    ApiFunction { name: "set_state", min_args: 1, max_args: 2, supervisor_only: false },
    ApiFunction { name: "set_endpoint", min_args: 1, max_args: 1, supervisor_only: false },
    ApiFunction { name: "change_profile", min_args: 1, max_args: 1, supervisor_only: false },
    ApiFunction { name: "dial", min_args: 1, max_args: 1, supervisor_only: false },
    ApiFunction { name: "agent_transfer", min_args: 1, max_args: 2, supervisor_only: false },
    ApiFunction { name: "queue_transfer", min_args: 1, max_args: 3, supervisor_only: false },
    ApiFunction { name: "warm_transfer", min_args: 1, max_args: 1, supervisor_only: false },
    ApiFunction { name: "warm_transfer_complete", min_args: 0, max_args: 0, supervisor_only: false },
    ApiFunction { name: "warm_transfer_cancel", min_args: 0, max_args: 0, supervisor_only: false },
    ApiFunction { name: "media_command", min_args: 2, max_args: usize::MAX, supervisor_only: false },
    ApiFunction { name: "media_hangup", min_args: 0, max_args: 0, supervisor_only: false },
    ApiFunction { name: "init_outbound", min_args: 2, max_args: 2, supervisor_only: false },
    ApiFunction { name: "dump_state", min_args: 0, max_args: 0, supervisor_only: false },
    ApiFunction { name: "logout", min_args: 0, max_args: 0, supervisor_only: false },
    ApiFunction { name: "blab", min_args: 1, max_args: 3, supervisor_only: true },
    ApiFunction { name: "spy", min_args: 1, max_args: 1, supervisor_only: true },
    ApiFunction { name: "list_agents", min_args: 0, max_args: 0, supervisor_only: true },
];

impl WebGateway {
    /// Validate and execute one API request
    pub async fn handle_api(&self, request: &ApiRequest) -> ApiResponse {
        let function = match FUNCTIONS.iter().find(|f| f.name == request.function) {
            Some(function) => function,
            None => {
                return ApiResponse::bad_request(format!(
                    "unknown function: {}",
                    request.function
                ))
            }
        };
        let arity = request.args.len();
        if arity < function.min_args || arity > function.max_args {
            return ApiResponse::bad_request(format!(
                "{} does not take {} arguments",
                function.name, arity
            ));
        }
        if function.supervisor_only && !self.security().is_supervisor() {
            return ApiResponse::Forbidden;
        }
        match self.execute(function.name, &request.args).await {
            Ok(Value::Null) => ApiResponse::Success,
            Ok(result) => ApiResponse::SuccessValue(result),
            Err(error) => ApiResponse::from_error(&error),
        }
    }

    async fn execute(&self, name: &str, args: &[Value]) -> Result<Value> {
        let session = self.session();
        match name {
            "set_state" => {
                let request = parse_state_request(args)?;
                match session.set_state(request).await? {
                    SetStateOutcome::Changed => Ok(Value::Null),
                    SetStateOutcome::Queued => Ok(json!("queued")),
                }
            }
            "set_endpoint" => {
                let endpoint = str_arg(args, 0)?;
                let endpoint = (!endpoint.is_empty()).then(|| endpoint.to_string());
                session.set_endpoint(endpoint).await.map(|_| Value::Null)
            }
            "change_profile" => {
                session.change_profile(str_arg(args, 0)?.to_string()).await.map(|_| Value::Null)
            }
            "dial" => session.dial(str_arg(args, 0)?.to_string()).await.map(|_| Value::Null),
            "agent_transfer" => {
                let target = str_arg(args, 0)?.to_string();
                let case_id = opt_str_arg(args, 1)?.map(str::to_string);
                session.agent_transfer(target, case_id).await.map(|_| Value::Null)
            }
            "queue_transfer" => {
                let queue = str_arg(args, 0)?.to_string();
                let vars = args.get(1).cloned().unwrap_or_else(|| json!({}));
                if !vars.is_object() {
                    return Err(AcdError::bad_request("queue vars must be an object"));
                }
                let skills = parse_skills(args.get(2))?;
                session.queue_transfer(queue, vars, skills).await.map(|_| Value::Null)
            }
            "warm_transfer" => {
                session.warm_transfer(str_arg(args, 0)?.to_string()).await.map(|_| Value::Null)
            }
            "warm_transfer_complete" => {
                session.warm_transfer_complete().await.map(|_| Value::Null)
            }
            "warm_transfer_cancel" => session.warm_transfer_cancel().await.map(|_| Value::Null),
            "media_command" => {
                let command = str_arg(args, 0)?.to_string();
                let mode = match str_arg(args, 1)? {
                    "call" => CommandMode::Call,
                    "cast" => CommandMode::Cast,
                    other => {
                        return Err(AcdError::bad_request(format!("unknown mode: {}", other)))
                    }
                };
                session.media_command(command, mode, args[2..].to_vec()).await
            }
            "media_hangup" => session.media_hangup().await.map(|_| Value::Null),
            "init_outbound" => {
                let client = str_arg(args, 0)?.to_string();
                let media_type = MediaType::parse(str_arg(args, 1)?)?;
                session.init_outbound(client, media_type).await.map(|_| Value::Null)
            }
            "dump_state" => {
                let snapshot = session.dump_state().await?;
                Ok(encode::snapshot_to_json(&snapshot))
            }
            "logout" => session.logout().await.map(|_| Value::Null),
            "blab" => {
                let text = str_arg(args, 0)?;
                let target = parse_blab_target(args)?;
                self.registry().blab(target, text);
                Ok(Value::Null)
            }
            "spy" => session.spy(str_arg(args, 0)?.to_string()).await.map(|_| Value::Null),
            "list_agents" => {
                let listing = self.registry().list().await;
                Ok(Value::Array(listing.iter().map(encode::snapshot_to_json).collect()))
            }
            // The table and this match are maintained together.
            other => Err(AcdError::bad_request(format!("unknown function: {}", other))),
        }
    }
}

fn parse_state_request(args: &[Value]) -> Result<StateRequest> {
    match str_arg(args, 0)? {
        "idle" => Ok(StateRequest::Idle),
        "oncall" => Ok(StateRequest::Oncall),
        "wrapup" => Ok(StateRequest::Wrapup),
        "released" => {
            let reason = match opt_str_arg(args, 1)? {
                Some(raw) => ReleaseReason::parse(raw)?,
                None => ReleaseReason::Default,
            };
            Ok(StateRequest::Released(reason))
        }
        other => Err(AcdError::bad_request(format!("unknown state: {}", other))),
    }
}

fn parse_blab_target(args: &[Value]) -> Result<BlabTarget> {
    let scope = match opt_str_arg(args, 1)? {
        None => return Ok(BlabTarget::All),
        Some(scope) => scope,
    };
    let value = || -> Result<String> {
        opt_str_arg(args, 2)?
            .map(str::to_string)
            .ok_or_else(|| AcdError::bad_request("blab scope needs a value"))
    };
    match scope {
        "all" => Ok(BlabTarget::All),
        "agent" => Ok(BlabTarget::Agent(value()?)),
        "profile" => Ok(BlabTarget::Profile(value()?)),
        "node" => Ok(BlabTarget::Node(value()?)),
        other => Err(AcdError::bad_request(format!("unknown blab scope: {}", other))),
    }
}

fn parse_skills(arg: Option<&Value>) -> Result<HashSet<Skill>> {
    let Some(arg) = arg else {
        return Ok(HashSet::new());
    };
    let list = arg
        .as_array()
        .ok_or_else(|| AcdError::bad_request("skills must be an array"))?;
    list.iter()
        .map(|entry| {
            let raw = entry
                .as_str()
                .ok_or_else(|| AcdError::bad_request("skills must be strings"))?;
            Ok(match raw.split_once(':') {
                Some((key, value)) => Skill::magic(key, value),
                None => Skill::atom(raw),
            })
        })
        .collect()
}

fn str_arg(args: &[Value], index: usize) -> Result<&str> {
    args.get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| AcdError::bad_request(format!("argument {} must be a string", index)))
}

fn opt_str_arg(args: &[Value], index: usize) -> Result<Option<&str>> {
    match args.get(index) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(Some)
            .ok_or_else(|| AcdError::bad_request(format!("argument {} must be a string", index))),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet as StdHashSet;

    use super::*;
    use crate::gateway::WebGateway;
    use openacd_agent_core::prelude::*;

    fn agent(login: &str, level: SecurityLevel) -> Agent {
        Agent {
            login: login.to_string(),
            id: format!("id-{}", login),
            profile: "Default".to_string(),
            security_level: level,
            skills: StdHashSet::from([Skill::atom("english")]),
            endpoint: None,
        }
    }

    fn gateway_for(level: SecurityLevel) -> (AgentRegistry, WebGateway) {
        let config = AcdConfig::default();
        let registry = AgentRegistry::new(SessionSettings::new(config.clone()));
        let handle = registry.start_agent(agent("alice", level)).handle().clone();
        let gateway = WebGateway::spawn(handle, level, registry.clone(), &config).unwrap();
        (registry, gateway)
    }

    fn request(function: &str, args: Vec<Value>) -> ApiRequest {
        ApiRequest { function: function.to_string(), args }
    }

    #[tokio::test]
    async fn unknown_function_is_bad_request() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        let response = gateway.handle_api(&request("make_coffee", vec![])).await;
        let json = response.to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["errcode"], "BAD_REQUEST");
    }

    #[tokio::test]
    async fn arity_mismatch_is_refused_before_the_session() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        let response = gateway.handle_api(&request("set_state", vec![])).await;
        assert!(matches!(response, ApiResponse::Error { errcode: "BAD_REQUEST", .. }));
    }

    #[tokio::test]
    async fn invalid_transition_maps_to_errcode() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        let response = gateway.handle_api(&request("set_state", vec![json!("wrapup")])).await;
        let json = response.to_json();
        assert_eq!(json["success"], false);
        assert_eq!(json["errcode"], "INVALID_STATE_CHANGE");
    }

    #[tokio::test]
    async fn release_and_idle_round_trip() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        let response = gateway
            .handle_api(&request("set_state", vec![json!("released"), json!("Default")]))
            .await;
        assert_eq!(response, ApiResponse::Success);
        let response = gateway.handle_api(&request("set_state", vec![json!("idle")])).await;
        assert_eq!(response, ApiResponse::Success);
    }

    #[tokio::test]
    async fn queued_release_reports_queued() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        gateway.session().ring(Call::dummy("c1")).await.unwrap();
        gateway.session().set_state(StateRequest::Oncall).await.unwrap();

        let response = gateway
            .handle_api(&request("set_state", vec![json!("released"), json!("2:Break:0")]))
            .await;
        assert_eq!(response.to_json()["result"], "queued");
    }

    #[tokio::test]
    async fn supervisor_functions_refused_for_plain_agents() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        for (function, args) in [
            ("blab", vec![json!("x")]),
            ("spy", vec![json!("bob")]),
            ("list_agents", vec![]),
        ] {
            let response = gateway.handle_api(&request(function, args)).await;
            assert_eq!(response, ApiResponse::Forbidden, "{} should be refused", function);
        }
    }

    #[tokio::test]
    async fn supervisor_can_blab_and_list() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Supervisor);
        let response = gateway
            .handle_api(&request("blab", vec![json!("shift change"), json!("all")]))
            .await;
        assert_eq!(response, ApiResponse::Success);

        let response = gateway.handle_api(&request("list_agents", vec![])).await;
        match response {
            ApiResponse::SuccessValue(Value::Array(listing)) => {
                assert_eq!(listing.len(), 1);
                assert_eq!(listing[0]["login"], "alice");
            }
            other => panic!("expected listing, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn dump_state_returns_snapshot() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        let response = gateway.handle_api(&request("dump_state", vec![])).await;
        match response {
            ApiResponse::SuccessValue(snapshot) => {
                assert_eq!(snapshot["login"], "alice");
                assert_eq!(snapshot["state"], "idle");
            }
            other => panic!("expected snapshot, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn bad_release_reason_is_bad_request() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        let response = gateway
            .handle_api(&request("set_state", vec![json!("released"), json!("not-a-reason")]))
            .await;
        assert!(matches!(response, ApiResponse::Error { errcode: "BAD_REQUEST", .. }));
    }

    #[tokio::test]
    async fn media_command_requires_known_mode() {
        let (_registry, gateway) = gateway_for(SecurityLevel::Agent);
        gateway.session().ring(Call::dummy("c1")).await.unwrap();
        gateway.session().set_state(StateRequest::Oncall).await.unwrap();
        let response = gateway
            .handle_api(&request("media_command", vec![json!("x"), json!("shout")]))
            .await;
        assert!(matches!(response, ApiResponse::Error { errcode: "BAD_REQUEST", .. }));
    }
}
