//! QA report model and exporters
//!
//! A run always produces one [`DownmixQaReport`]. Failures are issues inside
//! it, never `Err`. Exporters:
//! - JSON - `{"downmix_qa": {...}}`, keys sorted, 2-space indent
//! - CSV - summary, measurements and issues sections in a stable order
//! - Text - short human-readable summary

use serde::{Serialize, Serializer};
use std::cmp::Reverse;
use std::fmt;
use std::io::Write;
use std::path::Path;
use std::str::FromStr;

/// Severity at and above which an issue blocks (CLI exits non-zero)
pub const BLOCKING_SEVERITY: u8 = 80;

/// Setup, validation and decode failures
pub const SEVERITY_FATAL: u8 = 90;

/// Tolerance violations
pub const SEVERITY_MISMATCH: u8 = 60;

/// Stable issue, evidence and unit ids
pub mod ids {
    pub const ISSUE_DECODE_FAILED: &str = "ISSUE.DOWNMIX.QA.DECODE_FAILED";
    pub const ISSUE_MATRIX_UNRESOLVED: &str = "ISSUE.DOWNMIX.QA.MATRIX_UNRESOLVED";
    pub const ISSUE_CHANNELS_INVALID: &str = "ISSUE.DOWNMIX.QA.CHANNELS_INVALID";
    pub const ISSUE_SAMPLE_RATE_MISMATCH: &str = "ISSUE.DOWNMIX.QA.SAMPLE_RATE_MISMATCH";
    pub const ISSUE_LUFS_MISMATCH: &str = "ISSUE.DOWNMIX.QA.LUFS_MISMATCH";
    pub const ISSUE_TRUE_PEAK_MISMATCH: &str = "ISSUE.DOWNMIX.QA.TRUE_PEAK_MISMATCH";
    pub const ISSUE_CORRELATION_MISMATCH: &str = "ISSUE.DOWNMIX.QA.CORRELATION_MISMATCH";

    pub const EVID_SRC_PATH: &str = "EVID.DOWNMIX.QA.SRC_PATH";
    pub const EVID_REF_PATH: &str = "EVID.DOWNMIX.QA.REF_PATH";
    pub const EVID_FILE_PATH: &str = "EVID.FILE.PATH";
    pub const EVID_POLICY_ID: &str = "EVID.DOWNMIX.POLICY_ID";
    pub const EVID_MATRIX_ID: &str = "EVID.DOWNMIX.MATRIX_ID";
    pub const EVID_SOURCE_LAYOUT_ID: &str = "EVID.DOWNMIX.SOURCE_LAYOUT_ID";
    pub const EVID_TARGET_LAYOUT_ID: &str = "EVID.DOWNMIX.TARGET_LAYOUT_ID";
    pub const EVID_MISSING_DEP: &str = "EVID.VALIDATION.MISSING_OPTIONAL_DEP";
    pub const EVID_MISSING_DEP_HINT: &str = "EVID.VALIDATION.MISSING_OPTIONAL_DEP_HINT";
    pub const EVID_CHANNEL_COUNT: &str = "EVID.SESSION.CHANNEL_COUNT";
    pub const EVID_SAMPLE_RATE_HZ: &str = "EVID.SESSION.SAMPLE_RATE_HZ";

    pub const EVID_LUFS_FOLD: &str = "EVID.DOWNMIX.QA.LUFS_FOLD";
    pub const EVID_LUFS_REF: &str = "EVID.DOWNMIX.QA.LUFS_REF";
    pub const EVID_LUFS_DELTA: &str = "EVID.DOWNMIX.QA.LUFS_DELTA";
    pub const EVID_TRUE_PEAK_FOLD: &str = "EVID.DOWNMIX.QA.TRUE_PEAK_FOLD";
    pub const EVID_TRUE_PEAK_REF: &str = "EVID.DOWNMIX.QA.TRUE_PEAK_REF";
    pub const EVID_TRUE_PEAK_DELTA: &str = "EVID.DOWNMIX.QA.TRUE_PEAK_DELTA";
    pub const EVID_CORR_FOLD: &str = "EVID.DOWNMIX.QA.CORR_FOLD";
    pub const EVID_CORR_REF: &str = "EVID.DOWNMIX.QA.CORR_REF";
    pub const EVID_CORR_DELTA: &str = "EVID.DOWNMIX.QA.CORR_DELTA";
    pub const EVID_LOG: &str = "EVID.DOWNMIX.QA.LOG";

    pub const UNIT_LUFS: &str = "UNIT.LUFS";
    pub const UNIT_DBTP: &str = "UNIT.DBTP";
    pub const UNIT_CORRELATION: &str = "UNIT.CORRELATION";
    pub const UNIT_COUNT: &str = "UNIT.COUNT";
    pub const UNIT_HZ: &str = "UNIT.HZ";
    pub const UNIT_NONE: &str = "UNIT.NONE";
}

// ═══════════════════════════════════════════════════════════════════════════════
// MODEL
// ═══════════════════════════════════════════════════════════════════════════════

/// Evidence payload; non-finite numbers serialise as `null`
#[derive(Debug, Clone, PartialEq)]
pub enum EvidenceValue {
    Text(String),
    Int(i64),
    Number(f64),
}

impl Serialize for EvidenceValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            EvidenceValue::Text(s) => serializer.serialize_str(s),
            EvidenceValue::Int(v) => serializer.serialize_i64(*v),
            EvidenceValue::Number(v) if v.is_finite() => serializer.serialize_f64(*v),
            EvidenceValue::Number(_) => serializer.serialize_none(),
        }
    }
}

impl fmt::Display for EvidenceValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvidenceValue::Text(s) => f.write_str(s),
            EvidenceValue::Int(v) => write!(f, "{v}"),
            EvidenceValue::Number(v) => write!(f, "{v:?}"),
        }
    }
}

impl EvidenceValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EvidenceValue::Number(v) => Some(*v),
            EvidenceValue::Int(v) => Some(*v as f64),
            EvidenceValue::Text(_) => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EvidenceValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// One flat, replayable fact
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evidence {
    pub evidence_id: String,
    pub value: EvidenceValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit_id: Option<String>,
}

impl Evidence {
    pub fn text(evidence_id: &str, value: impl Into<String>) -> Self {
        Self {
            evidence_id: evidence_id.to_string(),
            value: EvidenceValue::Text(value.into()),
            unit_id: None,
        }
    }

    pub fn int(evidence_id: &str, value: i64, unit_id: &str) -> Self {
        Self {
            evidence_id: evidence_id.to_string(),
            value: EvidenceValue::Int(value),
            unit_id: Some(unit_id.to_string()),
        }
    }

    pub fn number(evidence_id: &str, value: f64, unit_id: &str) -> Self {
        Self {
            evidence_id: evidence_id.to_string(),
            value: EvidenceValue::Number(value),
            unit_id: Some(unit_id.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IssueTarget {
    pub scope: String,
}

impl IssueTarget {
    pub fn session() -> Self {
        Self {
            scope: "session".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QaIssue {
    pub issue_id: String,
    pub severity: u8,
    pub confidence: f64,
    pub target: IssueTarget,
    pub evidence: Vec<Evidence>,
    pub message: String,
}

impl QaIssue {
    /// Session-scoped issue with full confidence
    pub fn new(issue_id: &str, severity: u8, message: impl Into<String>, evidence: Vec<Evidence>) -> Self {
        Self {
            issue_id: issue_id.to_string(),
            severity,
            confidence: 1.0,
            target: IssueTarget::session(),
            evidence,
            message: message.into(),
        }
    }

    pub fn is_blocking(&self) -> bool {
        self.severity >= BLOCKING_SEVERITY
    }

    pub fn evidence(&self, evidence_id: &str) -> impl Iterator<Item = &Evidence> {
        self.evidence.iter().filter(move |e| e.evidence_id == evidence_id)
    }
}

/// Outcome of one downmix QA run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownmixQaReport {
    pub src_path: String,
    pub ref_path: String,
    pub policy_id: Option<String>,
    pub matrix_id: Option<String>,
    pub sample_rate_hz: Option<u32>,
    pub issues: Vec<QaIssue>,
    pub measurements: Vec<Evidence>,
    /// Key-sorted compact JSON of the run parameters
    pub log: String,
}

#[derive(Serialize)]
struct Envelope<'a> {
    downmix_qa: &'a DownmixQaReport,
}

impl DownmixQaReport {
    pub fn has_blocking_issues(&self) -> bool {
        self.issues.iter().any(QaIssue::is_blocking)
    }

    pub fn max_severity(&self) -> Option<u8> {
        self.issues.iter().map(|i| i.severity).max()
    }

    pub fn issues_with_id<'a>(&'a self, issue_id: &'a str) -> impl Iterator<Item = &'a QaIssue> {
        self.issues.iter().filter(move |i| i.issue_id == issue_id)
    }

    pub fn measurement(&self, evidence_id: &str) -> Option<&Evidence> {
        self.measurements.iter().find(|m| m.evidence_id == evidence_id)
    }

    /// Parsed run log
    pub fn log_value(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.log)
    }

    /// Generate report in specified format
    pub fn generate(&self, format: ReportFormat) -> serde_json::Result<String> {
        match format {
            ReportFormat::Json => self.to_json(),
            ReportFormat::Csv => Ok(self.to_csv()),
            ReportFormat::Text => Ok(self.to_text()),
        }
    }

    /// Save report to file, creating parent directories
    pub fn save(&self, path: &Path, format: ReportFormat) -> std::io::Result<()> {
        let content = self
            .generate(format)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(path)?;
        file.write_all(content.as_bytes())
    }

    /// `{"downmix_qa": ...}` with sorted keys and a trailing newline
    pub fn to_json(&self) -> serde_json::Result<String> {
        let value = serde_json::to_value(Envelope { downmix_qa: self })?;
        Ok(serde_json::to_string_pretty(&value)? + "\n")
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        let opt = |v: &Option<String>| v.clone().unwrap_or_default();

        csv_row(&mut out, &["section", "key", "value"]);
        csv_row(&mut out, &["summary", "src_path", &self.src_path]);
        csv_row(&mut out, &["summary", "ref_path", &self.ref_path]);
        csv_row(&mut out, &["summary", "policy_id", &opt(&self.policy_id)]);
        csv_row(&mut out, &["summary", "matrix_id", &opt(&self.matrix_id)]);
        let rate = self.sample_rate_hz.map(|r| r.to_string()).unwrap_or_default();
        csv_row(&mut out, &["summary", "sample_rate_hz", &rate]);

        out.push('\n');
        csv_row(&mut out, &["section", "evidence_id", "value", "unit_id"]);
        let mut measurements: Vec<(&str, String, &str)> = self
            .measurements
            .iter()
            .map(|m| {
                (
                    m.evidence_id.as_str(),
                    m.value.to_string(),
                    m.unit_id.as_deref().unwrap_or(""),
                )
            })
            .collect();
        measurements.sort_by(|a, b| (a.0, &a.1).cmp(&(b.0, &b.1)));
        for (id, value, unit) in &measurements {
            csv_row(&mut out, &["measurement", id, value, unit]);
        }

        out.push('\n');
        csv_row(&mut out, &["section", "issue_id", "severity", "confidence", "message"]);
        let mut issues: Vec<&QaIssue> = self.issues.iter().collect();
        issues.sort_by(|a, b| {
            (Reverse(a.severity), &a.issue_id, &a.message).cmp(&(Reverse(b.severity), &b.issue_id, &b.message))
        });
        for issue in issues {
            csv_row(
                &mut out,
                &[
                    "issue",
                    &issue.issue_id,
                    &issue.severity.to_string(),
                    &format!("{:?}", issue.confidence),
                    &issue.message,
                ],
            );
        }

        out
    }

    pub fn to_text(&self) -> String {
        let mut out = String::new();
        let status = if self.has_blocking_issues() {
            "FAIL"
        } else if self.issues.is_empty() {
            "PASS"
        } else {
            "WARN"
        };

        out.push_str("Downmix QA\n");
        out.push_str(&format!("{}\n\n", "=".repeat(10)));
        out.push_str(&format!("Status:      {status}\n"));
        out.push_str(&format!("Source:      {}\n", self.src_path));
        out.push_str(&format!("Reference:   {}\n", self.ref_path));
        out.push_str(&format!("Policy:      {}\n", self.policy_id.as_deref().unwrap_or("-")));
        out.push_str(&format!("Matrix:      {}\n", self.matrix_id.as_deref().unwrap_or("-")));
        match self.sample_rate_hz {
            Some(rate) => out.push_str(&format!("Sample rate: {rate} Hz\n")),
            None => out.push_str("Sample rate: -\n"),
        }

        let metrics: Vec<&Evidence> = self
            .measurements
            .iter()
            .filter(|m| m.evidence_id != ids::EVID_LOG)
            .collect();
        if !metrics.is_empty() {
            out.push_str("\nMeasurements:\n");
            for m in metrics {
                let value = match m.value {
                    EvidenceValue::Number(v) => format!("{v:.3}"),
                    ref other => other.to_string(),
                };
                out.push_str(&format!(
                    "  {:<34} {:>10} {}\n",
                    m.evidence_id,
                    value,
                    m.unit_id.as_deref().unwrap_or("")
                ));
            }
        }

        out.push_str(&format!("\nIssues: {}\n", self.issues.len()));
        for issue in &self.issues {
            out.push_str(&format!(
                "  [{}] {}: {}\n",
                issue.severity, issue.issue_id, issue.message
            ));
        }

        out
    }
}

fn csv_field(out: &mut String, field: &str) {
    if field.contains([',', '"', '\n', '\r']) {
        out.push('"');
        out.push_str(&field.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(field);
    }
}

fn csv_row(out: &mut String, fields: &[&str]) {
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        csv_field(out, field);
    }
    out.push('\n');
}

/// Report output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportFormat {
    #[default]
    Json,
    Csv,
    Text,
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ReportFormat::Json),
            "csv" => Ok(ReportFormat::Csv),
            "text" | "txt" => Ok(ReportFormat::Text),
            other => Err(format!("Unsupported format: {other}")),
        }
    }
}
