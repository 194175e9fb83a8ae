//! Cellmeter Edge Agent
//!
//! Daemon running on a field device next to a cellular router under test.
//!
//! - Manages one measurement session at a time over a small HTTP API
//! - Samples the router's radio state at high frequency during a session
//! - Periodically benchmarks the link (ping, iperf3, vendor speed test)
//! - Ships every measurement to the time-series store

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use cellmeter_agent::api;
use cellmeter_agent::sensors::{SensorReader, SimulatedSensorReader};
use cellmeter_agent::sink::{InfluxSink, MetricsSink};
use cellmeter_agent::state::AgentState;
use cellmeter_common::config::AgentConfig;

/// Cellmeter edge agent daemon.
#[derive(Parser, Debug)]
#[command(name = "cellmeter-agent", about = "Cellmeter field measurement agent")]
struct Cli {
    /// Path to the agent configuration file.
    #[arg(long, default_value = "/etc/cellmeter/agent.toml")]
    config: PathBuf,

    /// Session API listen address override.
    #[arg(long)]
    api_addr: Option<String>,

    /// Router address override.
    #[arg(long)]
    router_host: Option<String>,

    /// Generate simulated GPS/baro fixes instead of reading real sensors.
    #[arg(long, default_value_t = false)]
    simulate_sensors: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = if cli.config.exists() {
        AgentConfig::load(&cli.config)?
    } else {
        tracing::warn!(path = %cli.config.display(), "config file not found, using defaults");
        AgentConfig::default()
    };
    if let Some(addr) = cli.api_addr {
        config.api_addr = Some(addr);
    }
    if let Some(host) = cli.router_host {
        config.router.host = host;
    }

    let device_id = gethostname().unwrap_or_else(|| "cellmeter-agent".into());
    tracing::info!(
        device = %device_id,
        router = %config.router.host,
        "cellmeter-agent starting"
    );

    let sink: Arc<dyn MetricsSink> = Arc::new(InfluxSink::new(&config.influx)?);
    let sensors: Option<Arc<dyn SensorReader>> = if cli.simulate_sensors {
        tracing::info!("sensor simulation enabled");
        Some(Arc::new(SimulatedSensorReader::new()))
    } else {
        None
    };

    let state = Arc::new(AgentState::new(config, device_id, sink, sensors)?);

    // A record left behind by an unclean shutdown has no live background
    // tasks — discard it rather than resume it.
    state.sessions.recover_stale();

    // Prime the router token so the first sample doesn't pay the login cost.
    if !state.modem.login().await {
        tracing::warn!("initial router authentication failed, will retry lazily");
    }

    // ── Session API ─────────────────────────────────────────────
    let app = axum::Router::new()
        .nest("/api", api::router())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state.clone());

    let addr: SocketAddr = state.config.api_addr().parse()?;
    tracing::info!("session API listening on {addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    // ── Shutdown handling ───────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = server => {
            match result {
                Ok(Err(e)) => tracing::error!(error = %e, "session API failed"),
                Err(e) => tracing::error!(error = %e, "session API task failed"),
                Ok(Ok(())) => {}
            }
        }
    }

    state.tasks.shutdown().await;
    state.shell.disconnect().await;

    tracing::info!("cellmeter-agent stopped");
    Ok(())
}

fn gethostname() -> Option<String> {
    std::fs::read_to_string("/etc/hostname")
        .ok()
        .map(|s| s.trim().to_string())
}
