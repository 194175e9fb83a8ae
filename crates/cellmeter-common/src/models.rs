//! Data models for the Cellmeter edge agent.
//!
//! These types represent the measurement-domain records shared between the
//! agent's background loops, the HTTP API, and the metrics sink.

use serde::{Deserialize, Serialize};

// ── Session ─────────────────────────────────────────────────────────

/// The singleton record of an active measurement session.
///
/// At most one instance exists system-wide at any time. Created by
/// `SessionStore::start`, destroyed by `SessionStore::end`; only
/// `benchmark_in_progress` is ever mutated in place.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    /// ICCID of the SIM card in use during this session.
    pub iccid: String,
    /// Whether the periodic benchmark loop runs for this session.
    pub auto_benchmarks: bool,
    /// Exclusivity flag: true while a benchmark suite is running.
    pub benchmark_in_progress: bool,
}

// ── Radio state ─────────────────────────────────────────────────────

/// One high-frequency sample of the router's radio state.
///
/// Parsed from the router's nested modem-status payload; every field is
/// optional because the router omits whatever the current network mode
/// doesn't provide.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RadioStatus {
    pub rsrp: Option<f64>,
    pub rsrq: Option<f64>,
    pub sinr: Option<f64>,
    pub cell_id: Option<String>,
    pub tracking_area_code: Option<String>,
    pub network_type: Option<String>,
    pub frequency_band: Option<String>,
    /// Absolute radio-frequency channel number, whichever the radio
    /// reports: NR-ARFCN, then EARFCN, then UARFCN, then ARFCN.
    pub frequency_channel: Option<String>,
    pub physical_cell_id: Option<String>,
    pub operator: Option<String>,
    pub modem_temperature: Option<f64>,
}

impl RadioStatus {
    /// True when the router reported nothing usable at all.
    pub fn is_empty(&self) -> bool {
        self.rsrp.is_none()
            && self.rsrq.is_none()
            && self.sinr.is_none()
            && self.cell_id.is_none()
            && self.tracking_area_code.is_none()
            && self.network_type.is_none()
            && self.frequency_band.is_none()
            && self.frequency_channel.is_none()
            && self.physical_cell_id.is_none()
            && self.operator.is_none()
            && self.modem_temperature.is_none()
    }

    /// Identity-like attributes written as metric tags.
    pub fn tags(&self) -> Vec<(String, String)> {
        let mut tags = Vec::new();
        if let Some(ref op) = self.operator {
            tags.push(("operator".into(), op.clone()));
        }
        if let Some(ref nt) = self.network_type {
            tags.push(("network_type".into(), nt.clone()));
        }
        if let Some(ref cid) = self.cell_id {
            tags.push(("cell_id".into(), cid.clone()));
        }
        tags
    }

    /// Signal measurements written as metric fields.
    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let mut fields = Vec::new();
        push_float(&mut fields, "rsrp", self.rsrp);
        push_float(&mut fields, "rsrq", self.rsrq);
        push_float(&mut fields, "sinr", self.sinr);
        push_float(&mut fields, "modem_temperature", self.modem_temperature);
        push_str(&mut fields, "tracking_area_code", &self.tracking_area_code);
        push_str(&mut fields, "frequency_band", &self.frequency_band);
        push_str(&mut fields, "frequency_channel", &self.frequency_channel);
        push_str(&mut fields, "physical_cell_id", &self.physical_cell_id);
        fields
    }
}

// ── Probe results ───────────────────────────────────────────────────

/// Result of the remote ping probe.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PingProbe {
    pub rtt_avg_ms: Option<f64>,
    pub packet_loss_pct: Option<f64>,
}

impl PingProbe {
    pub fn is_empty(&self) -> bool {
        self.rtt_avg_ms.is_none() && self.packet_loss_pct.is_none()
    }

    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let mut fields = Vec::new();
        push_float(&mut fields, "rtt_avg_ms", self.rtt_avg_ms);
        push_float(&mut fields, "packet_loss_pct", self.packet_loss_pct);
        fields
    }
}

/// Result of the remote iperf3 probe (three sub-invocations).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThroughputProbe {
    pub upload_mbps: Option<f64>,
    pub download_mbps: Option<f64>,
    pub jitter_ms: Option<f64>,
}

impl ThroughputProbe {
    pub fn is_empty(&self) -> bool {
        self.upload_mbps.is_none() && self.download_mbps.is_none() && self.jitter_ms.is_none()
    }

    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let mut fields = Vec::new();
        push_float(&mut fields, "upload_mbps", self.upload_mbps);
        push_float(&mut fields, "download_mbps", self.download_mbps);
        push_float(&mut fields, "jitter_ms", self.jitter_ms);
        fields
    }
}

/// Result of the router's own speed-test job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpeedtestProbe {
    pub download_mbps: Option<f64>,
    pub upload_mbps: Option<f64>,
}

impl SpeedtestProbe {
    pub fn is_empty(&self) -> bool {
        self.download_mbps.is_none() && self.upload_mbps.is_none()
    }

    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let mut fields = Vec::new();
        push_float(&mut fields, "download_mbps", self.download_mbps);
        push_float(&mut fields, "upload_mbps", self.upload_mbps);
        fields
    }
}

// ── Sensors ─────────────────────────────────────────────────────────

/// A position/altitude fix from the co-located sensor package.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SensorFix {
    pub latitude: f64,
    pub longitude: f64,
    pub altitude_m: f64,
    pub ground_speed_kmh: Option<f64>,
}

impl SensorFix {
    pub fn fields(&self) -> Vec<(String, FieldValue)> {
        let mut fields = vec![
            ("latitude".into(), FieldValue::Float(self.latitude)),
            ("longitude".into(), FieldValue::Float(self.longitude)),
            ("altitude".into(), FieldValue::Float(self.altitude_m)),
        ];
        push_float(&mut fields, "ground_speed_kmh", self.ground_speed_kmh);
        fields
    }
}

// ── Field values ────────────────────────────────────────────────────

/// A single value written to the metrics sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    Float(f64),
    Int(i64),
    Str(String),
    Bool(bool),
}

fn push_float(fields: &mut Vec<(String, FieldValue)>, name: &str, value: Option<f64>) {
    if let Some(v) = value {
        fields.push((name.to_string(), FieldValue::Float(v)));
    }
}

fn push_str(fields: &mut Vec<(String, FieldValue)>, name: &str, value: &Option<String>) {
    if let Some(v) = value {
        fields.push((name.to_string(), FieldValue::Str(v.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_radio_status_has_no_fields() {
        let status = RadioStatus::default();
        assert!(status.is_empty());
        assert!(status.fields().is_empty());
        assert!(status.tags().is_empty());
    }

    #[test]
    fn partial_probe_emits_only_present_fields() {
        let probe = ThroughputProbe {
            upload_mbps: Some(12.3),
            download_mbps: None,
            jitter_ms: None,
        };
        assert!(!probe.is_empty());
        let fields = probe.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "upload_mbps");
        assert_eq!(fields[0].1, FieldValue::Float(12.3));
    }

    #[test]
    fn wholly_null_probe_is_empty() {
        let probe = ThroughputProbe::default();
        assert!(probe.is_empty());
        assert!(probe.fields().is_empty());
    }

    #[test]
    fn radio_status_splits_tags_and_fields() {
        let status = RadioStatus {
            rsrp: Some(-98.0),
            operator: Some("Example Net".into()),
            cell_id: Some("12345".into()),
            ..Default::default()
        };
        let tags = status.tags();
        assert!(tags.iter().any(|(k, v)| k == "operator" && v == "Example Net"));
        assert!(tags.iter().any(|(k, v)| k == "cell_id" && v == "12345"));
        let fields = status.fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields[0].0, "rsrp");
    }
}
