//! API integration tests.
//!
//! These exercise the session endpoints through axum's tower service
//! interface (no TCP for the agent itself); the router the agent talks to
//! is a scripted mock served on an ephemeral port.

mod support;

use std::sync::Arc;

use axum::body::Body;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use cellmeter_agent::api;
use cellmeter_agent::sink::MemorySink;
use cellmeter_agent::state::AgentState;

use support::{spawn_router, test_config, test_state, MockRouter};

async fn test_app() -> (Router, Arc<AgentState>) {
    let mock = Arc::new(MockRouter::default());
    let addr = spawn_router(mock).await;
    let state = test_state(addr, test_config(), Arc::new(MemorySink::new()));
    let app = Router::new()
        .nest("/api", api::router())
        .with_state(state.clone());
    (app, state)
}

/// Helper: parse JSON response body.
async fn json_body(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        let text = String::from_utf8_lossy(&bytes);
        panic!("not valid JSON: {text}");
    })
}

/// Helper: build a JSON POST request.
fn json_post(uri: &str, body: serde_json::Value) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .uri(uri)
        .method("POST")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> axum::http::Request<Body> {
    axum::http::Request::builder()
        .uri(uri)
        .method("GET")
        .body(Body::empty())
        .unwrap()
}

// ── Session lifecycle ───────────────────────────────────────────────

#[tokio::test]
async fn start_creates_session() {
    let (app, _state) = test_app().await;

    let resp = app
        .oneshot(json_post(
            "/api/session/start",
            serde_json::json!({
                "session_id": "flight-A",
                "iccid": "8944100000000000001",
                "auto_benchmarks": false
            }),
        ))
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    let body = json_body(resp).await;
    assert_eq!(body["session_id"], "flight-A");
    assert_eq!(body["iccid"], "8944100000000000001");
}

#[tokio::test]
async fn second_start_conflicts() {
    let (app, _state) = test_app().await;

    let resp = app
        .clone()
        .oneshot(json_post(
            "/api/session/start",
            serde_json::json!({ "session_id": "flight-A", "iccid": "8944001", "auto_benchmarks": false }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = app
        .oneshot(json_post(
            "/api/session/start",
            serde_json::json!({ "session_id": "flight-B", "iccid": "8944002", "auto_benchmarks": false }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
    let body = json_body(resp).await;
    assert!(!body["error"].as_str().unwrap().is_empty());
}

#[tokio::test]
async fn end_returns_prior_record_then_not_found() {
    let (app, _state) = test_app().await;

    let resp = app
        .clone()
        .oneshot(json_post(
            "/api/session/start",
            serde_json::json!({ "session_id": "flight-A", "iccid": "8944001", "auto_benchmarks": false }),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), 201);

    let resp = app
        .clone()
        .oneshot(json_post("/api/session/end", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body = json_body(resp).await;
    assert_eq!(body["session_id"], "flight-A");
    assert_eq!(body["iccid"], "8944001");

    let resp = app
        .oneshot(json_post("/api/session/end", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn end_without_session_is_not_found() {
    let (app, _state) = test_app().await;

    let resp = app
        .oneshot(json_post("/api/session/end", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn start_with_empty_body_generates_id_and_reads_iccid() {
    let (app, _state) = test_app().await;

    let resp = app
        .oneshot(json_post("/api/session/start", serde_json::json!({})))
        .await
        .unwrap();

    assert_eq!(resp.status(), 201);
    let body = json_body(resp).await;
    assert!(body["session_id"].as_str().unwrap().starts_with("ses_"));
    // ICCID comes from the mock router's modem status.
    assert_eq!(body["iccid"], "8944100000000000001");
}

// ── Status ──────────────────────────────────────────────────────────

#[tokio::test]
async fn status_reflects_session_lifecycle() {
    let (app, _state) = test_app().await;

    let resp = app.clone().oneshot(get("/api/status")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body = json_body(resp).await;
    assert_eq!(body["session_active"], false);
    assert!(body.get("session_id").is_none());

    let _ = app
        .clone()
        .oneshot(json_post(
            "/api/session/start",
            serde_json::json!({ "session_id": "flight-A", "iccid": "8944001", "auto_benchmarks": false }),
        ))
        .await
        .unwrap();

    let resp = app.clone().oneshot(get("/api/status")).await.unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["session_active"], true);
    assert_eq!(body["session_id"], "flight-A");
    assert_eq!(body["benchmark_in_progress"], false);
    assert_eq!(body["device"], "test-device");

    let _ = app
        .clone()
        .oneshot(json_post("/api/session/end", serde_json::json!({})))
        .await
        .unwrap();

    let resp = app.oneshot(get("/api/status")).await.unwrap();
    let body = json_body(resp).await;
    assert_eq!(body["session_active"], false);
}

// ── Manual benchmark ────────────────────────────────────────────────

#[tokio::test]
async fn benchmark_without_session_is_not_found() {
    let (app, _state) = test_app().await;

    let resp = app
        .oneshot(json_post("/api/benchmark/run", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn benchmark_conflicts_while_lock_is_held() {
    let (app, state) = test_app().await;

    let _ = app
        .clone()
        .oneshot(json_post(
            "/api/session/start",
            serde_json::json!({ "session_id": "flight-A", "iccid": "8944001", "auto_benchmarks": false }),
        ))
        .await
        .unwrap();

    // Simulate a run already holding the lock.
    assert!(state.sessions.acquire_benchmark_lock());

    let resp = app
        .clone()
        .oneshot(json_post("/api/benchmark/run", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    state.sessions.release_benchmark_lock();

    let resp = app
        .oneshot(json_post("/api/benchmark/run", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body = json_body(resp).await;
    assert_eq!(body["session_id"], "flight-A");
}
