//! Session API endpoints.
//!
//! POST /api/session/start  — start a measurement session (409 if active)
//! POST /api/session/end    — end the session (404 if none)
//! GET  /api/status         — agent and session status
//! POST /api/benchmark/run  — trigger a manual benchmark run

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use cellmeter_common::ids;

use crate::session::{EndError, StartError};
use crate::state::AgentState;
use crate::{bench, tasks};

pub fn router() -> Router<Arc<AgentState>> {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/end", post(end_session))
        .route("/status", get(status))
        .route("/benchmark/run", post(run_benchmark))
}

// ── Start session ───────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct StartSessionRequest {
    /// Explicit session ID; generated (`ses_<uuid7>`) when omitted.
    pub session_id: Option<String>,
    /// SIM ICCID; read from the router when omitted.
    pub iccid: Option<String>,
    #[serde(default)]
    pub auto_benchmarks: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionResponse {
    pub message: String,
    pub session_id: String,
    pub iccid: String,
}

async fn start_session(
    State(state): State<Arc<AgentState>>,
    Json(body): Json<StartSessionRequest>,
) -> Result<(StatusCode, Json<SessionResponse>), ApiError> {
    let session_id = body.session_id.unwrap_or_else(ids::session_id);
    let iccid = match body.iccid {
        Some(iccid) => iccid,
        // Starting a session must not fail on a flaky router read.
        None => state
            .modem
            .sim_iccid()
            .await
            .unwrap_or_else(|| "unknown".to_string()),
    };

    let record = state
        .sessions
        .start(&session_id, &iccid, body.auto_benchmarks)
        .map_err(|_: StartError| ApiError::conflict("a session is already active"))?;

    tasks::start_session_tasks(&state, &record);

    Ok((
        StatusCode::CREATED,
        Json(SessionResponse {
            message: "measurement session started".into(),
            session_id: record.session_id,
            iccid: record.iccid,
        }),
    ))
}

// ── End session ─────────────────────────────────────────────────────

async fn end_session(
    State(state): State<Arc<AgentState>>,
) -> Result<Json<SessionResponse>, ApiError> {
    let record = state
        .sessions
        .end()
        .map_err(|_: EndError| ApiError::not_found("no active session to end"))?;

    state.tasks.cancel_all();

    Ok(Json(SessionResponse {
        message: "measurement session ended".into(),
        session_id: record.session_id,
        iccid: record.iccid,
    }))
}

// ── Status ──────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub session_active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iccid: Option<String>,
    pub benchmark_in_progress: bool,
    pub device: String,
    pub agent_version: String,
}

async fn status(State(state): State<Arc<AgentState>>) -> Json<StatusResponse> {
    let record = state.sessions.state();
    Json(StatusResponse {
        session_active: record.is_some(),
        session_id: record.as_ref().map(|r| r.session_id.clone()),
        iccid: record.as_ref().map(|r| r.iccid.clone()),
        benchmark_in_progress: record
            .as_ref()
            .map(|r| r.benchmark_in_progress)
            .unwrap_or(false),
        device: state.device_id.clone(),
        agent_version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ── Manual benchmark ────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct BenchmarkResponse {
    pub message: String,
    pub session_id: String,
}

async fn run_benchmark(
    State(state): State<Arc<AgentState>>,
) -> Result<(StatusCode, Json<BenchmarkResponse>), ApiError> {
    let record = state
        .sessions
        .state()
        .ok_or_else(|| ApiError::not_found("no active session"))?;

    let guard = state
        .sessions
        .try_begin_benchmark()
        .ok_or_else(|| ApiError::conflict("a benchmark run is already in progress"))?;

    let task_state = state.clone();
    let session_id = record.session_id.clone();
    state.tasks.spawn(tasks::BENCHMARK, move |_cancel| async move {
        // The guard travels into the task so the lock is released on every
        // exit path of the run.
        let _guard = guard;
        bench::run_suite(&task_state, &record).await;
    });

    tracing::info!(session_id = %session_id, "manual benchmark run started");

    Ok((
        StatusCode::ACCEPTED,
        Json(BenchmarkResponse {
            message: "benchmark run started".into(),
            session_id,
        }),
    ))
}

// ── Error type ──────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: msg.into(),
        }
    }
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self {
            status: StatusCode::CONFLICT,
            message: msg.into(),
        }
    }
}

impl axum::response::IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
