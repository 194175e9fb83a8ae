//! Metrics sink — fire-and-forget delivery of measurement points.
//!
//! The production sink speaks the InfluxDB v2 write API (line protocol).
//! Writes never block session progress beyond their own timeout and never
//! propagate errors; a dropped point only shows up in logs and as a gap in
//! the series.

use async_trait::async_trait;

use cellmeter_common::config::InfluxConfig;
use cellmeter_common::models::FieldValue;

#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn write(
        &self,
        measurement: &str,
        tags: &[(String, String)],
        fields: &[(String, FieldValue)],
    );
}

// ── InfluxDB ────────────────────────────────────────────────────────

pub struct InfluxSink {
    http: reqwest::Client,
    write_url: String,
    token: String,
}

impl InfluxSink {
    pub fn new(cfg: &InfluxConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_s))
            .build()?;
        let write_url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ns",
            cfg.url.trim_end_matches('/'),
            cfg.org,
            cfg.bucket,
        );
        Ok(InfluxSink {
            http,
            write_url,
            token: cfg.token.clone(),
        })
    }
}

#[async_trait]
impl MetricsSink for InfluxSink {
    async fn write(
        &self,
        measurement: &str,
        tags: &[(String, String)],
        fields: &[(String, FieldValue)],
    ) {
        // A point without fields is invalid in line protocol.
        if fields.is_empty() {
            return;
        }
        let timestamp_ns = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let line = encode_line(measurement, tags, fields, timestamp_ns);
        let result = self
            .http
            .post(&self.write_url)
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(line)
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => {}
            Ok(response) => {
                tracing::warn!(measurement, status = %response.status(), "metrics write rejected");
            }
            Err(e) => tracing::warn!(measurement, error = %e, "metrics write failed"),
        }
    }
}

/// Render one line-protocol point: `measurement,tags fields timestamp`.
fn encode_line(
    measurement: &str,
    tags: &[(String, String)],
    fields: &[(String, FieldValue)],
    timestamp_ns: i64,
) -> String {
    let mut line = escape_part(measurement);
    for (key, value) in tags {
        line.push(',');
        line.push_str(&escape_part(key));
        line.push('=');
        line.push_str(&escape_part(value));
    }
    line.push(' ');
    let rendered: Vec<String> = fields
        .iter()
        .map(|(key, value)| format!("{}={}", escape_part(key), render_field(value)))
        .collect();
    line.push_str(&rendered.join(","));
    line.push(' ');
    line.push_str(&timestamp_ns.to_string());
    line
}

/// Escape measurement names, tag keys/values, and field keys.
fn escape_part(part: &str) -> String {
    part.replace('\\', "\\\\")
        .replace(',', "\\,")
        .replace(' ', "\\ ")
        .replace('=', "\\=")
}

fn render_field(value: &FieldValue) -> String {
    match value {
        FieldValue::Float(f) => format!("{f}"),
        FieldValue::Int(i) => format!("{i}i"),
        FieldValue::Str(s) => format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\"")),
        FieldValue::Bool(b) => b.to_string(),
    }
}

// ── In-memory sink (tests, dry runs) ────────────────────────────────

/// A recorded measurement point.
#[derive(Debug, Clone)]
pub struct Point {
    pub measurement: String,
    pub tags: Vec<(String, String)>,
    pub fields: Vec<(String, FieldValue)>,
}

/// Sink that records points in memory instead of shipping them.
#[derive(Default)]
pub struct MemorySink {
    points: std::sync::Mutex<Vec<Point>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn points(&self) -> Vec<Point> {
        self.points.lock().unwrap().clone()
    }

    pub fn count_for(&self, measurement: &str) -> usize {
        self.points
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.measurement == measurement)
            .count()
    }
}

#[async_trait]
impl MetricsSink for MemorySink {
    async fn write(
        &self,
        measurement: &str,
        tags: &[(String, String)],
        fields: &[(String, FieldValue)],
    ) {
        if fields.is_empty() {
            return;
        }
        self.points.lock().unwrap().push(Point {
            measurement: measurement.to_string(),
            tags: tags.to_vec(),
            fields: fields.to_vec(),
        });
    }
}
