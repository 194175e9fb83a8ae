//! Authenticated HTTP access to the router's API.
//!
//! The router hands out a bearer token at `/api/login`; every other call
//! carries it. The session is a two-state machine — Unauthenticated (no
//! token) and Authenticated — with lazy transitions: requests log in on
//! demand, and a 401 triggers exactly one re-login and one retry, never a
//! loop. Transport failures are logged and surface as "no data this cycle".

use std::time::Duration;

use reqwest::Method;
use serde_json::Value;
use tokio::sync::Mutex;

use cellmeter_common::config::RouterConfig;
use cellmeter_common::models::RadioStatus;

/// Router API path serving modem radio state.
const MODEM_STATUS_PATH: &str = "/api/v1/modems/status";

pub struct ModemSession {
    http: reqwest::Client,
    base_url: String,
    username: String,
    password: String,
    /// Bearer token; `None` means Unauthenticated.
    token: Mutex<Option<String>>,
}

impl ModemSession {
    pub fn new(cfg: &RouterConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.request_timeout())
            .danger_accept_invalid_certs(!cfg.verify_tls)
            .build()?;
        Ok(ModemSession {
            http,
            base_url: cfg.base_url(),
            username: cfg.api_user.clone(),
            password: cfg.api_password.clone(),
            token: Mutex::new(None),
        })
    }

    /// Session against an explicit base URL (plain HTTP allowed); used by
    /// the integration tests' mock router.
    pub fn with_base_url(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("default reqwest client");
        ModemSession {
            http,
            base_url: base_url.into(),
            username: username.into(),
            password: password.into(),
            token: Mutex::new(None),
        }
    }

    /// Submit credentials and store the returned token.
    ///
    /// Returns whether the session is now Authenticated. Failures are
    /// logged; the caller retries on a later cycle.
    pub async fn login(&self) -> bool {
        let url = format!("{}/api/login", self.base_url);
        let body = serde_json::json!({
            "username": self.username,
            "password": self.password,
        });
        let response = match self.http.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "router login request failed");
                return false;
            }
        };
        let payload: Value = match response.json().await {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!(error = %e, "router login response was not JSON");
                return false;
            }
        };
        let accepted = payload
            .get("success")
            .and_then(Value::as_bool)
            .unwrap_or(true);
        match payload.pointer("/data/token").and_then(Value::as_str) {
            Some(token) if accepted => {
                *self.token.lock().await = Some(token.to_string());
                tracing::info!("authenticated with router API");
                true
            }
            _ => {
                tracing::warn!("router login response carried no token");
                false
            }
        }
    }

    /// Current token, logging in first when Unauthenticated.
    async fn bearer(&self) -> Option<String> {
        if let Some(token) = self.token.lock().await.clone() {
            return Some(token);
        }
        tracing::debug!("no auth token, logging in");
        if self.login().await {
            self.token.lock().await.clone()
        } else {
            None
        }
    }

    /// Authenticated request returning the status code and JSON payload.
    ///
    /// A 401 clears the token, re-logs-in once, and retries the request
    /// once; a second 401 fails the call. `None` means the caller should
    /// treat this cycle as "no data".
    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Option<(u16, Value)> {
        let response = self.send(method.clone(), path, body).await?;
        if response.status() != reqwest::StatusCode::UNAUTHORIZED {
            return Self::read_json(response).await;
        }

        // Token expired or revoked — exactly one re-login and one retry.
        tracing::info!("router token rejected, re-authenticating");
        *self.token.lock().await = None;
        if !self.login().await {
            return None;
        }
        let retry = self.send(method, path, body).await?;
        if retry.status() == reqwest::StatusCode::UNAUTHORIZED {
            tracing::warn!(path, "router rejected the renewed token");
            return None;
        }
        Self::read_json(retry).await
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Option<reqwest::Response> {
        let token = self.bearer().await?;
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.http.request(method, &url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }
        match request.send().await {
            Ok(response) => Some(response),
            Err(e) => {
                tracing::warn!(path, error = %e, "router request failed");
                None
            }
        }
    }

    async fn read_json(response: reqwest::Response) -> Option<(u16, Value)> {
        let status = response.status().as_u16();
        match response.json().await {
            Ok(payload) => Some((status, payload)),
            Err(e) => {
                tracing::warn!(error = %e, "router response was not JSON");
                Some((status, Value::Null))
            }
        }
    }

    /// Authenticated GET; `None` unless the router answered 2xx with JSON.
    pub async fn get_json(&self, path: &str) -> Option<Value> {
        let (status, payload) = self.request(Method::GET, path, None).await?;
        if (200..300).contains(&status) {
            Some(payload)
        } else {
            tracing::warn!(path, status, "router request rejected");
            None
        }
    }

    /// Authenticated POST returning the status code alongside the payload,
    /// for callers that branch on specific codes (the speed-test start
    /// action answers 409 when a run is already active).
    pub async fn post_json(&self, path: &str, body: Value) -> Option<(u16, Value)> {
        self.request(Method::POST, path, Some(&body)).await
    }

    /// Fetch and parse the current radio state.
    pub async fn radio_status(&self) -> Option<RadioStatus> {
        let payload = self.get_json(MODEM_STATUS_PATH).await?;
        Some(parse_radio_status(&payload))
    }

    /// Best-effort read of the active SIM's ICCID from the modem status.
    pub async fn sim_iccid(&self) -> Option<String> {
        let payload = self.get_json(MODEM_STATUS_PATH).await?;
        str_field(payload.pointer("/data/0").unwrap_or(&Value::Null), "iccid")
    }
}

/// Parse the router's nested modem-status payload.
///
/// The payload is `{"data": [{...modem..., "cell_info": [{...cell...}]}]}`;
/// the first modem and its first cell entry are the active ones. Numeric
/// values arrive as strings on some firmware revisions, so both shapes are
/// accepted.
pub fn parse_radio_status(payload: &Value) -> RadioStatus {
    let modem = payload.pointer("/data/0").unwrap_or(&Value::Null);
    let cell = modem.pointer("/cell_info/0").unwrap_or(&Value::Null);

    // Channel number, highest-priority radio access technology first.
    let frequency_channel = ["nr-arfcn", "earfcn", "uarfcn", "arfcn"]
        .iter()
        .find_map(|key| str_field(cell, key));

    RadioStatus {
        rsrp: num_field(modem, "rsrp"),
        rsrq: num_field(modem, "rsrq"),
        sinr: num_field(modem, "sinr"),
        cell_id: str_field(modem, "cellid"),
        tracking_area_code: str_field(modem, "tac"),
        network_type: str_field(modem, "ntype"),
        frequency_band: str_field(cell, "bandwidth"),
        frequency_channel,
        physical_cell_id: str_field(cell, "pcid"),
        operator: str_field(modem, "operator"),
        modem_temperature: num_field(modem, "temperature"),
    }
}

fn str_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    }
}

fn num_field(value: &Value, key: &str) -> Option<f64> {
    match value.get(key) {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}
