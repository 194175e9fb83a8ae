//! Agent configuration.
//!
//! Loaded once at startup from a TOML file; every field has a serde default
//! so a minimal deployment only needs to set the router address and
//! credentials. Nothing here is mutated at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level agent configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Listen address for the session API.
    pub api_addr: Option<String>,
    /// Path of the durable session marker file.
    pub state_file: Option<PathBuf>,
    pub router: RouterConfig,
    pub influx: InfluxConfig,
    pub polling: PollingConfig,
    pub benchmark: BenchmarkConfig,
}

impl AgentConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn api_addr(&self) -> &str {
        self.api_addr.as_deref().unwrap_or("0.0.0.0:8080")
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from("/var/lib/cellmeter/session.json"))
    }
}

/// Router API and shell access.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Router address (IP or hostname, no scheme).
    pub host: String,
    pub api_user: String,
    pub api_password: String,
    /// Verify the router's TLS certificate. Field units usually ship with a
    /// self-signed one, so this defaults to off.
    pub verify_tls: bool,
    /// Per-request timeout for router API calls, in seconds.
    pub request_timeout_s: u64,
    pub ssh_user: String,
    pub ssh_port: u16,
    /// Identity file for key-based SSH authentication.
    pub ssh_key: Option<PathBuf>,
    /// SSH connection establishment timeout, in seconds.
    pub ssh_connect_timeout_s: u64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            host: "192.168.1.1".into(),
            api_user: "admin".into(),
            api_password: String::new(),
            verify_tls: false,
            request_timeout_s: 5,
            ssh_user: "root".into(),
            ssh_port: 22,
            ssh_key: None,
            ssh_connect_timeout_s: 5,
        }
    }
}

impl RouterConfig {
    pub fn base_url(&self) -> String {
        format!("https://{}", self.host)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_s)
    }
}

/// Time-series storage (InfluxDB v2).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InfluxConfig {
    pub url: String,
    pub token: String,
    pub org: String,
    pub bucket: String,
    pub timeout_s: u64,
}

impl Default for InfluxConfig {
    fn default() -> Self {
        InfluxConfig {
            url: "http://localhost:8086".into(),
            token: String::new(),
            org: "cellmeter".into(),
            bucket: "metrics".into(),
            timeout_s: 5,
        }
    }
}

/// High-frequency radio-state polling.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Inter-sample delay, in milliseconds.
    pub interval_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        PollingConfig { interval_ms: 1000 }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Benchmark suite parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Delay between automatic benchmark cycles, in seconds.
    pub interval_s: u64,
    pub ping_target: String,
    pub ping_count: u32,
    pub ping_timeout_s: u64,
    /// iperf3 server to test against; the throughput probe is skipped
    /// when unset.
    pub iperf3_server: Option<String>,
    pub iperf3_timeout_s: u64,
    /// Upload URL handed to the router's speed-test job; the vendor probe
    /// is skipped when unset.
    pub speedtest_url: Option<String>,
    pub speedtest_poll_interval_ms: u64,
    /// Poll budget for the speed-test status loop.
    pub speedtest_max_polls: u32,
    pub speedtest_start_timeout_s: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        BenchmarkConfig {
            interval_s: 60,
            ping_target: "8.8.8.8".into(),
            ping_count: 10,
            ping_timeout_s: 15,
            iperf3_server: None,
            iperf3_timeout_s: 30,
            speedtest_url: None,
            speedtest_poll_interval_ms: 1000,
            speedtest_max_polls: 120,
            speedtest_start_timeout_s: 10,
        }
    }
}

impl BenchmarkConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_s)
    }

    pub fn speedtest_poll_interval(&self) -> Duration {
        Duration::from_millis(self.speedtest_poll_interval_ms)
    }
}
