//! Alert path for security-critical classifications and anomaly spikes

use crate::classifier::taxonomy::{ErrorType, Severity};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// CRITICAL severity carrying a security tag
    SecurityCritical,
    /// Error frequency exceeded the spike threshold
    Anomaly,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertKind::SecurityCritical => "security_critical",
            AlertKind::Anomaly => "anomaly",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub kind: AlertKind,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: Severity,
    pub error_id: Option<String>,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Receives alerts. Implementations must not block for long; they are
/// called inline from classification.
pub trait AlertSink: Send + Sync {
    fn alert(&self, alert: &Alert);
}

/// Default sink: logs at error level and bumps a counter.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAlertSink;

impl AlertSink for TracingAlertSink {
    fn alert(&self, alert: &Alert) {
        error!(
            kind = alert.kind.as_str(),
            error_type = %alert.error_type,
            severity = %alert.severity,
            error_id = alert.error_id.as_deref().unwrap_or("-"),
            "ALERT: {}",
            alert.message
        );
        metrics::increment_counter!(
            "opsmend_alerts_total",
            "kind" => alert.kind.as_str()
        );
    }
}

/// Keeps every alert in memory. Handy for tests and for surfacing recent
/// alerts through an admin endpoint.
#[derive(Debug, Default)]
pub struct CollectingAlertSink {
    alerts: Mutex<Vec<Alert>>,
}

impl CollectingAlertSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.alerts.lock().is_empty()
    }
}

impl AlertSink for CollectingAlertSink {
    fn alert(&self, alert: &Alert) {
        self.alerts.lock().push(alert.clone());
    }
}
