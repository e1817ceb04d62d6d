//! Client JSON encoding
//!
//! The wire shapes here are load-bearing for client compatibility: every
//! event is an object with a `"command"` field, and the `statedata`
//! companion of an `astate` depends on the state it announces. Calls encode
//! caller id, brand, paths, id, and type; releases encode their reason with
//! the `default` sentinel preserved; warm transfers nest the held call and
//! the consult destination; idle carries no state data at all.

use chrono::Utc;
use serde_json::{json, Value};

use openacd_agent_core::{AgentEvent, AgentSnapshot, AgentState, Call, ReleaseReason};

/// Encode one session event as a client JSON object
pub fn event_to_json(event: &AgentEvent) -> Value {
    match event {
        AgentEvent::StateChange { state } => state_to_json(state),
        AgentEvent::ProfileChange { profile } => json!({
            "command": "aprofile",
            "profile": profile,
        }),
        AgentEvent::UrlPop { url, name } => json!({
            "command": "urlpop",
            "url": url,
            "name": name,
        }),
        AgentEvent::Blab { text } => json!({
            "command": "blab",
            "text": text,
        }),
        AgentEvent::MediaLoad { media_type, fullpane } => json!({
            "command": "mediaload",
            "media": media_type.to_string(),
            "fullpane": fullpane,
        }),
        AgentEvent::MediaEvent { media_type, payload } => json!({
            "command": "mediaevent",
            "media": media_type.to_string(),
            "event": payload,
        }),
        AgentEvent::SupervisorTab { action, kind, id, details } => json!({
            "command": "supervisortab",
            "action": action.label(),
            "type": kind,
            "id": id,
            "details": details,
        }),
    }
}

/// The `astate` announcement for a state
pub fn state_to_json(state: &AgentState) -> Value {
    let mut event = json!({
        "command": "astate",
        "state": state.label(),
    });
    if let Some(data) = statedata(state) {
        event["statedata"] = data;
    }
    event
}

/// The state-dependent companion object, absent for idle
pub fn statedata(state: &AgentState) -> Option<Value> {
    match state {
        AgentState::Idle => None,
        AgentState::Ringing(call)
        | AgentState::Precall(call)
        | AgentState::Oncall(call)
        | AgentState::Outgoing(call)
        | AgentState::Wrapup(call) => Some(call_data(call)),
        AgentState::Released(reason) => Some(json!({ "reason": reason_data(reason) })),
        AgentState::WarmTransfer { onhold, calling } => Some(json!({
            "onhold": call_data(onhold),
            "calling": calling,
        })),
    }
}

fn call_data(call: &Call) -> Value {
    json!({
        "callerid": [call.caller_id.0, call.caller_id.1],
        "brandname": call.brand_label(),
        "ringpath": call.ring_path,
        "mediapath": call.media_path,
        "callid": call.id,
        "type": call.media_type.to_string(),
    })
}

fn reason_data(reason: &ReleaseReason) -> Value {
    match reason {
        ReleaseReason::Default => json!("default"),
        ReleaseReason::Custom { id, label, bias } => json!({
            "id": id,
            "label": label,
            "bias": bias,
        }),
    }
}

/// Liveness heartbeat carrying the current Unix-millisecond timestamp
pub fn pong() -> Value {
    json!({
        "command": "pong",
        "timestamp": Utc::now().timestamp_millis(),
    })
}

/// Listing/dump encoding of a snapshot
pub fn snapshot_to_json(snapshot: &AgentSnapshot) -> Value {
    let mut value = json!({
        "login": snapshot.login,
        "id": snapshot.id,
        "profile": snapshot.profile,
        "securitylevel": snapshot.security_level.to_string(),
        "skills": snapshot.skills.iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        "state": snapshot.state.label(),
        "lastchange": snapshot.last_change.timestamp(),
        "since": snapshot.since.timestamp(),
    });
    if let Some(endpoint) = &snapshot.endpoint {
        value["endpoint"] = json!(endpoint);
    }
    if let Some(data) = statedata(&snapshot.state) {
        value["statedata"] = data;
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use openacd_agent_core::Client;

    #[test]
    fn idle_has_no_statedata() {
        let event = state_to_json(&AgentState::Idle);
        assert_eq!(event["command"], "astate");
        assert_eq!(event["state"], "idle");
        assert!(event.get("statedata").is_none());
    }

    #[test]
    fn call_statedata_carries_brand_and_paths() {
        let mut call = Call::dummy("call-42");
        call.caller_id = ("Ada".to_string(), "5551212".to_string());
        call.client = Some(Client { id: Some("1".into()), label: Some("Acme".into()) });
        let event = state_to_json(&AgentState::Ringing(call));
        let data = &event["statedata"];
        assert_eq!(data["callid"], "call-42");
        assert_eq!(data["brandname"], "Acme");
        assert_eq!(data["callerid"][0], "Ada");
        assert_eq!(data["callerid"][1], "5551212");
        assert_eq!(data["ringpath"], "outband");
        assert_eq!(data["mediapath"], "inband");
        assert_eq!(data["type"], "voice");
    }

    #[test]
    fn unlabeled_client_falls_back_to_unknown() {
        let event = state_to_json(&AgentState::Oncall(Call::dummy("c")));
        assert_eq!(event["statedata"]["brandname"], "unknown client");
    }

    #[test]
    fn release_preserves_default_sentinel() {
        let event = state_to_json(&AgentState::Released(ReleaseReason::Default));
        assert_eq!(event["statedata"]["reason"], "default");

        let event = state_to_json(&AgentState::Released(ReleaseReason::Custom {
            id: "3".into(),
            label: "Lunch".into(),
            bias: -1,
        }));
        assert_eq!(event["statedata"]["reason"]["label"], "Lunch");
        assert_eq!(event["statedata"]["reason"]["bias"], -1);
    }

    #[test]
    fn warm_transfer_nests_held_call_and_destination() {
        let event = state_to_json(&AgentState::WarmTransfer {
            onhold: Call::dummy("call-9"),
            calling: "15551212".to_string(),
        });
        assert_eq!(event["statedata"]["onhold"]["callid"], "call-9");
        assert_eq!(event["statedata"]["calling"], "15551212");
    }

    #[test]
    fn pong_carries_a_timestamp() {
        let pong = pong();
        assert_eq!(pong["command"], "pong");
        assert!(pong["timestamp"].as_i64().unwrap() > 0);
    }

    #[test]
    fn media_and_supervisor_events_carry_their_commands() {
        use openacd_agent_core::{AgentEvent, MediaType, TabAction};

        let event = event_to_json(&AgentEvent::UrlPop {
            url: "https://crm.example/ticket/9".to_string(),
            name: "crm".to_string(),
        });
        assert_eq!(event["command"], "urlpop");
        assert_eq!(event["name"], "crm");

        let event = event_to_json(&AgentEvent::MediaLoad {
            media_type: MediaType::Email,
            fullpane: true,
        });
        assert_eq!(event["command"], "mediaload");
        assert_eq!(event["media"], "email");
        assert_eq!(event["fullpane"], true);

        let event = event_to_json(&AgentEvent::MediaEvent {
            media_type: MediaType::Chat,
            payload: json!({"line": "hello"}),
        });
        assert_eq!(event["command"], "mediaevent");
        assert_eq!(event["event"]["line"], "hello");

        let event = event_to_json(&AgentEvent::SupervisorTab {
            action: TabAction::Set,
            kind: "queue".to_string(),
            id: "support".to_string(),
            details: json!({"depth": 4}),
        });
        assert_eq!(event["command"], "supervisortab");
        assert_eq!(event["action"], "set");
        assert_eq!(event["type"], "queue");
    }
}
