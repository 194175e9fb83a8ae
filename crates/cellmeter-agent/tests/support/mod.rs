//! Shared test support — a scripted mock router and agent-state builder.
#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use cellmeter_agent::modem::ModemSession;
use cellmeter_agent::sensors::SimulatedSensorReader;
use cellmeter_agent::session::SessionStore;
use cellmeter_agent::shell::RemoteShell;
use cellmeter_agent::sink::{MemorySink, MetricsSink};
use cellmeter_agent::state::AgentState;
use cellmeter_agent::tasks::TaskOrchestrator;
use cellmeter_common::config::AgentConfig;

/// Scripted behavior and call counters for the mock router API.
///
/// Login `n` hands out the token `tok-<n>`; the modem-status endpoint only
/// accepts tokens numbered `valid_from` or later, which lets tests force a
/// 401 on the first token and observe the renewal flow.
pub struct MockRouter {
    pub logins: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub speedtest_starts: AtomicUsize,
    pub speedtest_status_calls: AtomicUsize,
    pub valid_from: AtomicUsize,
    /// When set, the modem-status endpoint answers 401 for every token.
    pub always_reject: AtomicBool,
    /// Speed-test status payloads returned in order; the last one repeats.
    pub speedtest_states: Mutex<Vec<Value>>,
}

impl Default for MockRouter {
    fn default() -> Self {
        MockRouter {
            logins: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            speedtest_starts: AtomicUsize::new(0),
            speedtest_status_calls: AtomicUsize::new(0),
            valid_from: AtomicUsize::new(1),
            always_reject: AtomicBool::new(false),
            speedtest_states: Mutex::new(vec![speedtest_state("NOT_RUNNING", 0, 0)]),
        }
    }
}

impl MockRouter {
    /// Token number carried by the request, if any.
    fn token_number(headers: &HeaderMap) -> Option<usize> {
        headers
            .get("authorization")?
            .to_str()
            .ok()?
            .strip_prefix("Bearer tok-")?
            .parse()
            .ok()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        if self.always_reject.load(Ordering::SeqCst) {
            return false;
        }
        match Self::token_number(headers) {
            Some(n) => n >= self.valid_from.load(Ordering::SeqCst),
            None => false,
        }
    }
}

/// Build a speed-test status payload in the router's shape.
pub fn speedtest_state(state: &str, download_bps: u64, upload_bps: u64) -> Value {
    json!({
        "data": {
            "state": state,
            "avgDownloadSpeed": download_bps,
            "avgUploadSpeed": upload_bps,
        }
    })
}

/// Serve the mock router on an ephemeral port.
pub async fn spawn_router(mock: Arc<MockRouter>) -> SocketAddr {
    async fn login(State(mock): State<Arc<MockRouter>>) -> Json<Value> {
        let n = mock.logins.fetch_add(1, Ordering::SeqCst) + 1;
        Json(json!({
            "success": true,
            "data": { "token": format!("tok-{n}") }
        }))
    }

    async fn modem_status(
        State(mock): State<Arc<MockRouter>>,
        headers: HeaderMap,
    ) -> Result<Json<Value>, StatusCode> {
        mock.status_calls.fetch_add(1, Ordering::SeqCst);
        if !mock.authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(json!({
            "success": true,
            "data": [{
                "rsrp": "-97",
                "rsrq": "-10",
                "sinr": "15",
                "cellid": "27447297",
                "tac": "2910",
                "ntype": "5G-NSA",
                "operator": "Example Net",
                "temperature": 41.0,
                "iccid": "8944100000000000001",
                "cell_info": [{ "bandwidth": "20 MHz", "earfcn": "1849", "pcid": "261" }]
            }]
        })))
    }

    async fn speedtest_start(
        State(mock): State<Arc<MockRouter>>,
        headers: HeaderMap,
    ) -> Result<Json<Value>, StatusCode> {
        mock.speedtest_starts.fetch_add(1, Ordering::SeqCst);
        if !mock.authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        Ok(Json(json!({ "success": true })))
    }

    async fn speedtest_status(
        State(mock): State<Arc<MockRouter>>,
        headers: HeaderMap,
    ) -> Result<Json<Value>, StatusCode> {
        let call = mock.speedtest_status_calls.fetch_add(1, Ordering::SeqCst);
        if !mock.authorized(&headers) {
            return Err(StatusCode::UNAUTHORIZED);
        }
        let states = mock.speedtest_states.lock().unwrap();
        let payload = states
            .get(call)
            .or_else(|| states.last())
            .cloned()
            .unwrap_or(Value::Null);
        Ok(Json(payload))
    }

    let app = Router::new()
        .route("/api/login", post(login))
        .route("/api/v1/modems/status", get(modem_status))
        .route("/api/speedtest/actions/start", post(speedtest_start))
        .route("/api/speedtest/status", get(speedtest_status))
        .with_state(mock);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

/// Agent configuration tuned for fast tests: quick polls, an SSH target
/// that refuses connections immediately, no durable state file.
pub fn test_config() -> AgentConfig {
    let mut config = AgentConfig::default();
    config.router.host = "127.0.0.1".into();
    config.router.ssh_port = 1;
    config.router.ssh_connect_timeout_s = 1;
    config.polling.interval_ms = 50;
    config.benchmark.interval_s = 3600;
    config.benchmark.ping_timeout_s = 2;
    config.benchmark.speedtest_poll_interval_ms = 5;
    config
}

/// Modem session pointed at the mock router.
pub fn test_modem(addr: SocketAddr) -> Arc<ModemSession> {
    Arc::new(ModemSession::with_base_url(
        format!("http://{addr}"),
        "admin",
        "test-password",
        Duration::from_secs(2),
    ))
}

/// Full agent state wired to the mock router and an in-memory sink.
pub fn test_state(
    addr: SocketAddr,
    config: AgentConfig,
    sink: Arc<MemorySink>,
) -> Arc<AgentState> {
    let shell = Arc::new(RemoteShell::new(&config.router));
    let sink: Arc<dyn MetricsSink> = sink;
    Arc::new(AgentState {
        modem: test_modem(addr),
        device_id: "test-device".into(),
        sessions: Arc::new(SessionStore::new()),
        tasks: TaskOrchestrator::new(),
        shell,
        sink,
        sensors: Some(Arc::new(SimulatedSensorReader::new())),
        config,
    })
}
