//! Detection alerts
//!
//! Unified alert format emitted by all three detectors, plus the sink
//! interface they emit into.

use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Alert severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Default for Severity {
    fn default() -> Self {
        Severity::Medium
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
            Severity::Critical => write!(f, "critical"),
        }
    }
}

impl FromStr for Severity {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            _ => Err(()),
        }
    }
}

/// Alert categories. Signature rules may carry categories outside the
/// built-in set; those come through as `Custom`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Category {
    PortScan,
    Ddos,
    BruteForce,
    Anomaly,
    WebAttack,
    DataExfiltration,
    MlAnomaly,
    Custom(String),
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::PortScan => write!(f, "Port Scan"),
            Category::Ddos => write!(f, "DDoS"),
            Category::BruteForce => write!(f, "Brute Force"),
            Category::Anomaly => write!(f, "Anomaly"),
            Category::WebAttack => write!(f, "Web Attack"),
            Category::DataExfiltration => write!(f, "Data Exfiltration"),
            Category::MlAnomaly => write!(f, "ML Anomaly"),
            Category::Custom(name) => write!(f, "{}", name),
        }
    }
}

impl From<&str> for Category {
    fn from(name: &str) -> Self {
        match name {
            "Port Scan" => Category::PortScan,
            "DDoS" => Category::Ddos,
            "Brute Force" => Category::BruteForce,
            "Anomaly" => Category::Anomaly,
            "Web Attack" => Category::WebAttack,
            "Data Exfiltration" => Category::DataExfiltration,
            "ML Anomaly" => Category::MlAnomaly,
            other => Category::Custom(other.to_string()),
        }
    }
}

/// The offending source of an alert: a single address, or `Multiple` for
/// aggregate detections (traffic spikes, protocol distribution).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertSource {
    Ip(IpAddr),
    Multiple,
}

impl std::fmt::Display for AlertSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertSource::Ip(ip) => write!(f, "{}", ip),
            AlertSource::Multiple => write!(f, "Multiple"),
        }
    }
}

/// A structured detection event.
#[derive(Debug, Clone)]
pub struct Alert {
    /// Correlation id assigned at emission; the store assigns its own row id.
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub category: Category,
    pub source: AlertSource,
    pub severity: Severity,
    /// Free-form key/value bag; schema is per alert kind.
    pub meta: HashMap<String, Value>,
}

impl Alert {
    pub fn new(
        category: Category,
        severity: Severity,
        source: AlertSource,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            message: message.into(),
            category,
            source,
            severity,
            meta: HashMap::new(),
        }
    }

    pub fn with_meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.meta.insert(key.to_string(), value.into());
        self
    }

    /// Metadata as a JSON object string, for persistence.
    pub fn meta_json(&self) -> String {
        serde_json::to_string(&self.meta).unwrap_or_else(|_| "{}".to_string())
    }
}

/// Destination for detector alerts.
///
/// Implementations must never block the caller: the dispatcher emits from
/// the packet hot path.
pub trait AlertSink: Send + Sync {
    fn emit(&self, alert: Alert);
}

/// Sink that collects alerts in memory. Used by tests and by the
/// rule-validation command.
#[derive(Default)]
pub struct MemorySink {
    alerts: Mutex<Vec<Alert>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain and return everything collected so far.
    pub fn take(&self) -> Vec<Alert> {
        std::mem::take(&mut *self.alerts.lock().expect("sink lock"))
    }

    /// Clone of everything collected so far.
    pub fn snapshot(&self) -> Vec<Alert> {
        self.alerts.lock().expect("sink lock").clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().expect("sink lock").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AlertSink for MemorySink {
    fn emit(&self, alert: Alert) {
        self.alerts.lock().expect("sink lock").push(alert);
    }
}
