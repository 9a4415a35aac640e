//! Per-type error history, trend analysis and pruning

use super::taxonomy::{ErrorType, Severity};
use super::ErrorClassification;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// Entries kept in each per-type recent-error ring
pub const RECENT_ERRORS_CAPACITY: usize = 100;

/// Upper bound on timestamps kept per type for windowed counts
const MAX_OCCURRENCES: usize = 10_000;

/// One remembered classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    pub error_id: String,
    pub severity: Severity,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trend {
    Increasing,
    Decreasing,
    Stable,
}

/// Simple forward-looking estimate derived from an increasing trend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Prediction {
    pub expected_next_window: u64,
    pub confidence: f64,
    pub message: String,
}

/// Result of one trend pass for one error type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrendReport {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub trend: Trend,
    pub recent_count: u64,
    pub previous_count: u64,
    pub anomaly: bool,
    pub prediction: Option<Prediction>,
    pub analyzed_at: DateTime<Utc>,
}

/// Aggregate view of one error type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeStatistics {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub total: u64,
    pub retained: usize,
    pub last_seen: Option<DateTime<Utc>>,
    pub trend: Trend,
    pub anomaly: bool,
}

#[derive(Debug, Default)]
struct TypeStats {
    recent: VecDeque<ErrorRecord>,
    occurrences: VecDeque<DateTime<Utc>>,
    total: u64,
}

/// Tuning for trend detection
#[derive(Debug, Clone, Copy)]
pub struct TrendSettings {
    pub window: ChronoDuration,
    pub spike_threshold: u64,
    pub retention: ChronoDuration,
}

impl Default for TrendSettings {
    fn default() -> Self {
        Self {
            window: ChronoDuration::minutes(5),
            spike_threshold: 10,
            retention: ChronoDuration::hours(24),
        }
    }
}

/// Concurrent-safe store of classification history.
///
/// Appends, trend passes and prunes all take the same lock, so a prune can
/// never interleave with a half-finished append.
#[derive(Debug)]
pub struct ErrorStats {
    settings: TrendSettings,
    by_type: Mutex<HashMap<ErrorType, TypeStats>>,
    reports: Mutex<Vec<TrendReport>>,
}

impl ErrorStats {
    pub fn new(settings: TrendSettings) -> Self {
        Self {
            settings,
            by_type: Mutex::new(HashMap::new()),
            reports: Mutex::new(Vec::new()),
        }
    }

    pub fn record(&self, classification: &ErrorClassification) {
        let record = ErrorRecord {
            error_id: classification.error_id.clone(),
            severity: classification.severity,
            confidence: classification.confidence,
            timestamp: classification.timestamp,
        };

        let mut by_type = self.by_type.lock();
        let stats = by_type
            .entry(classification.error_type.clone())
            .or_default();
        stats.total += 1;
        stats.occurrences.push_back(record.timestamp);
        while stats.occurrences.len() > MAX_OCCURRENCES {
            stats.occurrences.pop_front();
        }
        stats.recent.push_back(record);
        while stats.recent.len() > RECENT_ERRORS_CAPACITY {
            stats.recent.pop_front();
        }
    }

    /// Recent records for one type, oldest first.
    pub fn recent(&self, error_type: &ErrorType) -> Vec<ErrorRecord> {
        self.by_type
            .lock()
            .get(error_type)
            .map(|s| s.recent.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Total classifications seen for a type since start-up.
    pub fn frequency(&self, error_type: &ErrorType) -> u64 {
        self.by_type
            .lock()
            .get(error_type)
            .map(|s| s.total)
            .unwrap_or(0)
    }

    /// Compare the last window with the one before it, per type.
    pub fn analyze_at(&self, now: DateTime<Utc>) -> Vec<TrendReport> {
        let window = self.settings.window;
        let recent_start = now - window;
        let previous_start = recent_start - window;

        let mut reports = Vec::new();
        {
            let by_type = self.by_type.lock();
            for (error_type, stats) in by_type.iter() {
                let mut recent_count = 0u64;
                let mut previous_count = 0u64;
                for ts in &stats.occurrences {
                    if *ts > recent_start && *ts <= now {
                        recent_count += 1;
                    } else if *ts > previous_start && *ts <= recent_start {
                        previous_count += 1;
                    }
                }

                let trend = classify_trend(recent_count, previous_count);
                let anomaly = recent_count > self.settings.spike_threshold;
                let prediction = (trend == Trend::Increasing)
                    .then(|| predict(error_type, recent_count, previous_count));

                reports.push(TrendReport {
                    error_type: error_type.clone(),
                    trend,
                    recent_count,
                    previous_count,
                    anomaly,
                    prediction,
                    analyzed_at: now,
                });
            }
        }
        reports.sort_by(|a, b| a.error_type.as_str().cmp(b.error_type.as_str()));

        *self.reports.lock() = reports.clone();
        reports
    }

    /// Latest trend reports.
    pub fn reports(&self) -> Vec<TrendReport> {
        self.reports.lock().clone()
    }

    /// Drop entries older than the retention period. Returns the number of
    /// ring entries removed.
    ///
    /// Custom types left with no retained records are forgotten entirely,
    /// lifetime total included; built-in types keep their counters.
    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.settings.retention;
        let mut removed = 0;

        let mut by_type = self.by_type.lock();
        for stats in by_type.values_mut() {
            while stats
                .recent
                .front()
                .map(|r| r.timestamp < cutoff)
                .unwrap_or(false)
            {
                stats.recent.pop_front();
                removed += 1;
            }
            while stats
                .occurrences
                .front()
                .map(|ts| *ts < cutoff)
                .unwrap_or(false)
            {
                stats.occurrences.pop_front();
            }
        }
        by_type.retain(|error_type, stats| {
            !matches!(error_type, ErrorType::Custom(_))
                || !stats.recent.is_empty()
                || !stats.occurrences.is_empty()
        });
        removed
    }

    pub fn statistics(&self) -> Vec<TypeStatistics> {
        let reports = self.reports();
        let by_type = self.by_type.lock();
        let mut out: Vec<TypeStatistics> = by_type
            .iter()
            .map(|(error_type, stats)| {
                let report = reports.iter().find(|r| &r.error_type == error_type);
                TypeStatistics {
                    error_type: error_type.clone(),
                    total: stats.total,
                    retained: stats.recent.len(),
                    last_seen: stats.recent.back().map(|r| r.timestamp),
                    trend: report.map(|r| r.trend).unwrap_or(Trend::Stable),
                    anomaly: report.map(|r| r.anomaly).unwrap_or(false),
                }
            })
            .collect();
        out.sort_by(|a, b| b.total.cmp(&a.total));
        out
    }
}

impl Default for ErrorStats {
    fn default() -> Self {
        Self::new(TrendSettings::default())
    }
}

fn classify_trend(recent: u64, previous: u64) -> Trend {
    let recent = recent as f64;
    let previous = previous as f64;
    if recent > previous * 1.2 {
        Trend::Increasing
    } else if recent < previous * 0.8 {
        Trend::Decreasing
    } else {
        Trend::Stable
    }
}

fn predict(error_type: &ErrorType, recent: u64, previous: u64) -> Prediction {
    let growth = if previous > 0 {
        recent as f64 / previous as f64
    } else {
        2.0
    };
    let expected = (recent as f64 * growth).ceil() as u64;
    let confidence = (0.5 + (growth - 1.0) * 0.1).clamp(0.5, 0.9);
    Prediction {
        expected_next_window: expected,
        confidence,
        message: format!(
            "{} errors rising ({} -> {}); expect about {} in the next window",
            error_type, previous, recent, expected
        ),
    }
}
