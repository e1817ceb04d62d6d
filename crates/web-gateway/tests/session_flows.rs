//! End-to-end flows through the HTTP surface: login, polling, call
//! lifecycle, transfers, and poll displacement.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, Response, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use openacd_agent_core::auth::MemoryAuth;
use openacd_agent_core::prelude::*;
use openacd_web_gateway::listener::{create_router, ListenerState};

fn listener() -> (ListenerState, Router) {
    let config = AcdConfig::default();
    let registry = AgentRegistry::new(SessionSettings::new(config.clone()));
    let auth = MemoryAuth::new();
    auth.add_simple("alice", "secret", SecurityLevel::Agent);
    let state = ListenerState::new(registry, Arc::new(auth), config);
    let router = create_router(state.clone());
    (state, router)
}

fn form_request(path: &str, body: String, cookie: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/x-www-form-urlencoded");
    if let Some(cookie) = cookie {
        builder = builder.header("cookie", format!("cpx_id={}", cookie));
    }
    builder.body(Body::from(body)).unwrap()
}

fn api_form(function: &str, args: Value) -> String {
    let request = json!({ "function": function, "args": args }).to_string();
    format!("request={}", urlencode(&request))
}

fn urlencode(s: &str) -> String {
    let mut out = String::new();
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            other => out.push_str(&format!("%{:02X}", other)),
        }
    }
    out
}

async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

async fn login(router: &Router) -> String {
    let response = router
        .clone()
        .oneshot(form_request(
            "/login",
            "username=alice&password=secret".to_string(),
            None,
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    cookie.split(';').next().unwrap().split_once('=').unwrap().1.to_string()
}

async fn api_call(router: &Router, cookie: &str, function: &str, args: Value) -> Value {
    let response = router
        .clone()
        .oneshot(form_request("/api", api_form(function, args), Some(cookie)))
        .await
        .unwrap();
    body_json(response).await
}

async fn poll(router: &Router, cookie: &str) -> Response<Body> {
    router
        .clone()
        .oneshot(form_request("/poll", String::new(), Some(cookie)))
        .await
        .unwrap()
}

#[tokio::test(start_paused = true)]
async fn idle_poll_receives_a_pong_within_the_liveness_window() {
    let (_state, router) = listener();
    let cookie = login(&router).await;

    let waiter = tokio::spawn({
        let router = router.clone();
        let cookie = cookie.clone();
        async move { poll(&router, &cookie).await }
    });
    tokio::time::sleep(Duration::from_millis(10)).await;

    tokio::time::advance(Duration::from_secs(22)).await;
    let response = waiter.await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["success"], true);
    let events = body["result"].as_array().unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["command"], "pong");
    assert!(events[0]["timestamp"].is_i64());
}

#[tokio::test]
async fn queue_offer_answer_hangup_and_release() {
    let (state, router) = listener();
    let cookie = login(&router).await;

    // The queue offers a call.
    let handle = state.registry.query("alice").unwrap();
    handle.ring(Call::dummy("call_42")).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let response = poll(&router, &cookie).await;
    let body = body_json(response).await;
    let events = body["result"].as_array().unwrap();
    assert_eq!(events[0]["command"], "astate");
    assert_eq!(events[0]["state"], "ringing");
    assert_eq!(events[0]["statedata"]["callid"], "call_42");

    // The agent answers, hangs up, and goes released.
    let answer = api_call(&router, &cookie, "set_state", json!(["oncall"])).await;
    assert_eq!(answer["success"], true);
    let hangup = api_call(&router, &cookie, "media_hangup", json!([])).await;
    assert_eq!(hangup["success"], true);
    let release = api_call(&router, &cookie, "set_state", json!(["released", "Default"])).await;
    assert_eq!(release["success"], true);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let body = body_json(poll(&router, &cookie).await).await;
    let labels: Vec<&str> = body["result"]
        .as_array()
        .unwrap()
        .iter()
        .map(|e| e["state"].as_str().unwrap())
        .collect();
    assert_eq!(labels, vec!["oncall", "wrapup", "released"]);
    let released = &body["result"].as_array().unwrap()[2];
    assert_eq!(released["statedata"]["reason"], "default");
}

#[tokio::test]
async fn warm_transfer_round_trip_over_http() {
    let (state, router) = listener();
    let cookie = login(&router).await;

    let handle = state.registry.query("alice").unwrap();
    handle.ring(Call::dummy("call_42")).await.unwrap();
    api_call(&router, &cookie, "set_state", json!(["oncall"])).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    body_json(poll(&router, &cookie).await).await; // drain ringing/oncall

    let begin = api_call(&router, &cookie, "warm_transfer", json!(["15551212"])).await;
    assert_eq!(begin["success"], true);
    let cancel = api_call(&router, &cookie, "warm_transfer_cancel", json!([])).await;
    assert_eq!(cancel["success"], true);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let body = body_json(poll(&router, &cookie).await).await;
    let events = body["result"].as_array().unwrap();
    assert_eq!(events[0]["state"], "warmtransfer");
    assert_eq!(events[0]["statedata"]["onhold"]["callid"], "call_42");
    assert_eq!(events[0]["statedata"]["calling"], "15551212");
    assert_eq!(events[1]["state"], "oncall");
    assert_eq!(events[1]["statedata"]["callid"], "call_42");

    // The same call is back on the session.
    let snapshot = handle.dump_state().await.unwrap();
    assert_eq!(snapshot.state.call().unwrap().id, "call_42");
}

#[tokio::test(start_paused = true)]
async fn newer_poll_displaces_older_with_408() {
    let (_state, router) = listener();
    let cookie = login(&router).await;

    let first = tokio::spawn({
        let router = router.clone();
        let cookie = cookie.clone();
        async move { poll(&router, &cookie).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    let second = tokio::spawn({
        let router = router.clone();
        let cookie = cookie.clone();
        async move { poll(&router, &cookie).await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    let response = first.await.unwrap();
    assert_eq!(response.status(), StatusCode::REQUEST_TIMEOUT);
    let body = body_json(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["errcode"], "POLL_PID_REPLACED");

    assert!(!second.is_finished());
    second.abort();
}

#[tokio::test]
async fn invalid_transition_leaves_no_trace() {
    let (state, router) = listener();
    let cookie = login(&router).await;

    let body = api_call(&router, &cookie, "set_state", json!(["wrapup"])).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["errcode"], "INVALID_STATE_CHANGE");

    // State unchanged and no event was emitted for the refusal.
    let snapshot = state.registry.query("alice").unwrap().dump_state().await.unwrap();
    assert_eq!(snapshot.state.label(), "idle");
    tokio::time::sleep(Duration::from_millis(50)).await;
    let dump = api_call(&router, &cookie, "dump_state", json!([])).await;
    assert_eq!(dump["result"]["state"], "idle");
}
