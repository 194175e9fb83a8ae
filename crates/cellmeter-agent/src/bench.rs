//! Benchmark pipeline — latency, throughput, and vendor speed-test probes.
//!
//! The suite runs the three probes sequentially, each independently
//! best-effort: a failed probe logs and yields nothing, it never cancels
//! the others. Results are forwarded to the metrics sink tagged with the
//! session, the device, and the probe name — but only when at least one
//! field was actually measured.

use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use cellmeter_common::models::{FieldValue, PingProbe, SessionRecord, SpeedtestProbe, ThroughputProbe};

use crate::state::AgentState;

/// Run the full suite and forward every non-empty result.
pub async fn run_suite(state: &AgentState, record: &SessionRecord) {
    tracing::info!(session_id = %record.session_id, "benchmark suite starting");

    if let Some(probe) = ping_probe(state).await {
        forward(state, record, "ping", probe.fields()).await;
    }
    if let Some(probe) = iperf3_probe(state).await {
        forward(state, record, "iperf3", probe.fields()).await;
    }
    if let Some(probe) = speedtest_probe(state).await {
        forward(state, record, "speedtest", probe.fields()).await;
    }

    tracing::info!(session_id = %record.session_id, "benchmark suite finished");
}

async fn forward(
    state: &AgentState,
    record: &SessionRecord,
    probe: &str,
    fields: Vec<(String, FieldValue)>,
) {
    let tags = vec![
        ("session_id".to_string(), record.session_id.clone()),
        ("iccid".to_string(), record.iccid.clone()),
        ("device".to_string(), state.device_id.clone()),
        ("probe".to_string(), probe.to_string()),
    ];
    state.sink.write("benchmark", &tags, &fields).await;
}

// ── Latency probe ───────────────────────────────────────────────────

/// Remote ping through the router's own radio link.
pub async fn ping_probe(state: &AgentState) -> Option<PingProbe> {
    let cfg = &state.config.benchmark;
    let command = format!("ping -c {} {}", cfg.ping_count, cfg.ping_target);
    tracing::info!(target = %cfg.ping_target, "running latency probe");

    let output = state
        .shell
        .execute(&command, Duration::from_secs(cfg.ping_timeout_s))
        .await?;
    let probe = parse_ping_output(&output);
    if probe.is_empty() {
        tracing::warn!("ping output yielded no metrics");
        None
    } else {
        Some(probe)
    }
}

static RTT_RE: Lazy<Regex> = Lazy::new(|| {
    // GNU ping reports "rtt min/avg/max/mdev", BusyBox "round-trip min/avg/max".
    Regex::new(r"(?:rtt|round-trip) min/avg/max(?:/mdev)? = [\d.]+/([\d.]+)/").unwrap()
});
static LOSS_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"([\d.]+)% packet loss").unwrap());

fn parse_ping_output(output: &str) -> PingProbe {
    PingProbe {
        rtt_avg_ms: RTT_RE
            .captures(output)
            .and_then(|caps| caps[1].parse().ok()),
        packet_loss_pct: LOSS_RE
            .captures(output)
            .and_then(|caps| caps[1].parse().ok()),
    }
}

// ── Throughput probe ────────────────────────────────────────────────

/// Three independent iperf3 invocations: upload, download, UDP jitter.
/// Skipped entirely when no iperf3 server is configured.
pub async fn iperf3_probe(state: &AgentState) -> Option<ThroughputProbe> {
    let cfg = &state.config.benchmark;
    let server = cfg.iperf3_server.as_deref()?;
    let timeout = Duration::from_secs(cfg.iperf3_timeout_s);
    tracing::info!(server, "running throughput probe");

    let upload = state
        .shell
        .execute(&format!("iperf3 -c {server} -f m --json"), timeout)
        .await;
    let download = state
        .shell
        .execute(&format!("iperf3 -c {server} -f m -R --json"), timeout)
        .await;
    let jitter = state
        .shell
        .execute(&format!("iperf3 -c {server} -u -b 10M --json"), timeout)
        .await;

    let probe = ThroughputProbe {
        upload_mbps: upload.as_deref().and_then(parse_iperf3_upload),
        download_mbps: download.as_deref().and_then(parse_iperf3_download),
        jitter_ms: jitter.as_deref().and_then(parse_iperf3_jitter),
    };
    if probe.is_empty() {
        tracing::warn!("all iperf3 invocations yielded nothing");
        None
    } else {
        Some(probe)
    }
}

fn parse_iperf3_json(output: &str) -> Option<Value> {
    match serde_json::from_str(output) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(error = %e, "iperf3 output was not valid JSON");
            None
        }
    }
}

fn parse_iperf3_upload(output: &str) -> Option<f64> {
    parse_iperf3_json(output)?
        .pointer("/end/sum_sent/bits_per_second")
        .and_then(Value::as_f64)
        .map(|bps| bps / 1e6)
}

fn parse_iperf3_download(output: &str) -> Option<f64> {
    parse_iperf3_json(output)?
        .pointer("/end/sum_received/bits_per_second")
        .and_then(Value::as_f64)
        .map(|bps| bps / 1e6)
}

fn parse_iperf3_jitter(output: &str) -> Option<f64> {
    parse_iperf3_json(output)?
        .pointer("/end/sum/jitter_ms")
        .and_then(Value::as_f64)
}

// ── Vendor speed test ───────────────────────────────────────────────

/// Drive the router's built-in speed-test job over its JSON API.
///
/// Start the job, then poll the status endpoint on a fixed cadence for a
/// bounded number of iterations. The transitional states retain the last
/// nonzero throughput as a fallback, since some firmware omits the final
/// numbers from the terminal payload. An exhausted poll budget abandons
/// the probe with no result.
pub async fn speedtest_probe(state: &AgentState) -> Option<SpeedtestProbe> {
    let cfg = &state.config.benchmark;
    let url = cfg.speedtest_url.as_deref()?;
    tracing::info!("starting vendor speed test");

    let body = serde_json::json!({ "data": { "url": url } });
    match state.modem.post_json("/api/speedtest/actions/start", body).await {
        Some((409, _)) => {
            tracing::warn!("speed test already running, monitoring for results");
        }
        Some((status, _)) if (200..300).contains(&status) => {}
        Some((status, payload)) => {
            tracing::warn!(status, payload = %payload, "failed to start speed test");
            return None;
        }
        None => return None,
    }

    let mut download_mbps: Option<f64> = None;
    let mut upload_mbps: Option<f64> = None;
    let mut finished = false;

    for _ in 0..cfg.speedtest_max_polls {
        tokio::time::sleep(cfg.speedtest_poll_interval()).await;

        let Some(payload) = state.modem.get_json("/api/speedtest/status").await else {
            continue;
        };
        let job_state = payload
            .pointer("/data/state")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_ascii_uppercase();

        match job_state.as_str() {
            "TESTING_DOWNLOAD" => {
                if let Some(current) = speed_mbps(&payload, "avgDownloadSpeed") {
                    download_mbps = Some(current);
                }
                tracing::debug!(mbps = download_mbps, "speed test: download phase");
            }
            "TESTING_UPLOAD" => {
                if let Some(current) = speed_mbps(&payload, "avgUploadSpeed") {
                    upload_mbps = Some(current);
                }
                tracing::debug!(mbps = upload_mbps, "speed test: upload phase");
            }
            "FINISHED" => {
                // Prefer the final numbers, keep the fallback when absent.
                if let Some(current) = speed_mbps(&payload, "avgDownloadSpeed") {
                    download_mbps = Some(current);
                }
                if let Some(current) = speed_mbps(&payload, "avgUploadSpeed") {
                    upload_mbps = Some(current);
                }
                finished = true;
                tracing::info!("speed test finished");
                break;
            }
            "NOT_RUNNING" => {
                finished = true;
                tracing::info!("speed test ended without running");
                break;
            }
            other => {
                tracing::debug!(state = other, "speed test state, continuing to poll");
            }
        }
    }

    if !finished {
        tracing::warn!(
            polls = cfg.speedtest_max_polls,
            "speed test never reached a terminal state, abandoning"
        );
        return None;
    }

    let probe = SpeedtestProbe {
        download_mbps,
        upload_mbps,
    };
    if probe.is_empty() {
        tracing::warn!("speed test finished without capturing any results");
        None
    } else {
        Some(probe)
    }
}

/// Nonzero throughput from the status payload, converted to Mbps.
fn speed_mbps(payload: &Value, key: &str) -> Option<f64> {
    let raw = payload.pointer(&format!("/data/{key}"))?;
    let bps = raw
        .as_f64()
        .or_else(|| raw.as_str().and_then(|s| s.parse().ok()))?;
    if bps > 0.0 {
        Some(bps / 1e6)
    } else {
        None
    }
}
