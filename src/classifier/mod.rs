//! Error classification
//!
//! Turns a raw failure plus request context into an [`ErrorClassification`]:
//! type, severity, confidence, impact and tags. Classification is pattern
//! based; the highest-confidence match wins and ties go to the pattern that
//! was registered first. When nothing matches convincingly a small set of
//! heuristics picks a severity and the type falls back to `internal`.
//!
//! Classification never fails outward. Anything that goes wrong inside the
//! classifier yields a low-confidence fallback tagged `"fallback"`.

pub mod error_info;
pub mod patterns;
pub mod stats;
pub mod taxonomy;

pub use error_info::{ErrorContext, ErrorInfo, UpstreamError};
pub use patterns::{
    default_patterns, ErrorMatcher, ErrorPattern, PatternSummary, RegexMatcher, StatusMatcher,
    SubstringMatcher,
};
pub use stats::{ErrorStats, Trend, TrendReport, TrendSettings, TypeStatistics};
pub use taxonomy::{Complexity, ErrorCategory, ErrorType, ImpactLevel, Severity, TypeProfile};

use crate::alerts::{Alert, AlertKind, AlertSink, TracingAlertSink};
use crate::errors::ClassifierError;
use crate::supervision::task::RepeatingTask;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Statuses that make "api"-tagged patterns more convincing
const API_BOOST_STATUSES: [u16; 7] = [400, 401, 403, 429, 500, 502, 503];
const API_BOOST_FACTOR: f64 = 1.2;
const FALLBACK_CONFIDENCE: f64 = 0.1;
const HEURISTIC_CONFIDENCE: f64 = 0.3;

/// Anything that can classify an error. The recovery orchestrator and the
/// middleware depend on this rather than on [`ErrorClassifier`] directly.
pub trait Classify: Send + Sync {
    fn classify(&self, error: &ErrorInfo, context: &ErrorContext) -> ErrorClassification;
}

/// Result of classifying one failure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorClassification {
    pub error_id: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: Severity,
    pub confidence: f64,
    pub matched_patterns: Vec<String>,
    pub tags: Vec<String>,
    pub category: ErrorCategory,
    pub business_impact: ImpactLevel,
    pub user_impact: ImpactLevel,
    pub technical_complexity: Complexity,
    pub estimated_resolution_minutes: u32,
    pub auto_recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

impl ErrorClassification {
    /// Low-confidence result used when classification itself failed.
    pub fn fallback(error_id: String) -> Self {
        Self::from_profile(
            error_id,
            ErrorType::Internal,
            Severity::Medium,
            FALLBACK_CONFIDENCE,
        )
        .with_tags(vec!["fallback".to_string()])
    }

    fn from_profile(
        error_id: String,
        error_type: ErrorType,
        severity: Severity,
        confidence: f64,
    ) -> Self {
        let profile = error_type.profile();
        Self {
            error_id,
            error_type,
            severity,
            confidence,
            matched_patterns: Vec::new(),
            tags: Vec::new(),
            category: profile.category,
            business_impact: profile.business_impact,
            user_impact: profile.user_impact,
            technical_complexity: profile.technical_complexity,
            estimated_resolution_minutes: profile.estimated_resolution_minutes,
            auto_recoverable: false,
            status: None,
            retry_after_secs: None,
            timestamp: Utc::now(),
        }
    }

    fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// CRITICAL severity with a security tag; these always alert.
    pub fn is_security_critical(&self) -> bool {
        self.severity == Severity::Critical && self.has_tag("security")
    }

    pub fn is_fallback(&self) -> bool {
        self.has_tag("fallback")
    }
}

/// Classifier tuning
#[derive(Debug, Clone, Copy)]
pub struct ClassifierSettings {
    /// A match must be strictly above this to count as the best match
    pub min_confidence: f64,
    pub trend: TrendSettings,
    pub trend_interval: Duration,
    pub prune_interval: Duration,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            trend: TrendSettings::default(),
            trend_interval: Duration::from_secs(5 * 60),
            prune_interval: Duration::from_secs(60 * 60),
        }
    }
}

/// Pattern-based classifier with per-type statistics.
///
/// The pattern list is copy-on-write: readers clone an `Arc` snapshot and
/// classify without holding the lock, writers swap in a new list.
pub struct ErrorClassifier {
    patterns: RwLock<Arc<Vec<Arc<ErrorPattern>>>>,
    stats: ErrorStats,
    settings: ClassifierSettings,
    alerts: Arc<dyn AlertSink>,
}

impl ErrorClassifier {
    /// Classifier loaded with the built-in catalogue.
    pub fn new(settings: ClassifierSettings) -> Self {
        Self::with_patterns(settings, default_patterns())
    }

    pub fn with_patterns(settings: ClassifierSettings, patterns: Vec<ErrorPattern>) -> Self {
        let patterns: Vec<Arc<ErrorPattern>> = patterns.into_iter().map(Arc::new).collect();
        Self {
            patterns: RwLock::new(Arc::new(patterns)),
            stats: ErrorStats::new(settings.trend),
            settings,
            alerts: Arc::new(TracingAlertSink),
        }
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alerts = sink;
        self
    }

    pub fn settings(&self) -> &ClassifierSettings {
        &self.settings
    }

    /// Add a pattern at the end of the registry (lowest tie-break priority).
    pub fn register_pattern(&self, pattern: ErrorPattern) -> Result<(), ClassifierError> {
        pattern.validate()?;
        let mut guard = self.patterns.write();
        if guard.iter().any(|p| p.id == pattern.id) {
            return Err(ClassifierError::DuplicatePattern(pattern.id));
        }
        let mut next: Vec<Arc<ErrorPattern>> = guard.as_ref().clone();
        info!(pattern = %pattern.id, error_type = %pattern.error_type, "Registered error pattern");
        next.push(Arc::new(pattern));
        *guard = Arc::new(next);
        Ok(())
    }

    /// Remove a pattern by id. Returns whether it existed.
    pub fn remove_pattern(&self, id: &str) -> bool {
        let mut guard = self.patterns.write();
        if !guard.iter().any(|p| p.id == id) {
            return false;
        }
        let next: Vec<Arc<ErrorPattern>> =
            guard.iter().filter(|p| p.id != id).cloned().collect();
        *guard = Arc::new(next);
        info!(pattern = %id, "Removed error pattern");
        true
    }

    pub fn patterns(&self) -> Vec<PatternSummary> {
        self.snapshot().iter().map(|p| p.summary()).collect()
    }

    fn snapshot(&self) -> Arc<Vec<Arc<ErrorPattern>>> {
        self.patterns.read().clone()
    }

    pub fn stats(&self) -> &ErrorStats {
        &self.stats
    }

    pub fn error_statistics(&self) -> Vec<TypeStatistics> {
        self.stats.statistics()
    }

    /// Run one trend pass now and alert on anomalies.
    pub fn analyze_trends_at(&self, now: DateTime<Utc>) -> Vec<TrendReport> {
        let reports = self.stats.analyze_at(now);
        for report in reports.iter().filter(|r| r.anomaly) {
            self.alerts.alert(&Alert {
                kind: AlertKind::Anomaly,
                error_type: report.error_type.clone(),
                severity: Severity::High,
                error_id: None,
                message: format!(
                    "{} errors in the last window: {} (previous {})",
                    report.error_type, report.recent_count, report.previous_count
                ),
                timestamp: now,
            });
        }
        for report in &reports {
            if let Some(prediction) = &report.prediction {
                info!(error_type = %report.error_type, "{}", prediction.message);
            }
        }
        reports
    }

    pub fn prune_at(&self, now: DateTime<Utc>) -> usize {
        let removed = self.stats.prune_at(now);
        if removed > 0 {
            debug!(removed, "Pruned expired error records");
        }
        removed
    }

    /// Start the trend and prune jobs. They stop when the returned handles
    /// are shut down or dropped.
    pub fn start_maintenance(self: &Arc<Self>) -> Vec<RepeatingTask> {
        let trend_owner = Arc::clone(self);
        let trend = RepeatingTask::spawn(
            "classifier-trends",
            self.settings.trend_interval,
            move || {
                let classifier = Arc::clone(&trend_owner);
                async move {
                    classifier.analyze_trends_at(Utc::now());
                }
            },
        );

        let prune_owner = Arc::clone(self);
        let prune = RepeatingTask::spawn(
            "classifier-prune",
            self.settings.prune_interval,
            move || {
                let classifier = Arc::clone(&prune_owner);
                async move {
                    classifier.prune_at(Utc::now());
                }
            },
        );

        vec![trend, prune]
    }

    /// Classification proper. Errors here are matcher failures; the caller
    /// turns them into the fallback result.
    fn try_classify(
        &self,
        error: &ErrorInfo,
        context: &ErrorContext,
        error_id: String,
    ) -> anyhow::Result<ErrorClassification> {
        let text = error.match_text();
        let patterns = self.snapshot();
        let boost = error
            .status
            .map(|s| API_BOOST_STATUSES.contains(&s))
            .unwrap_or(false);

        let mut matched: Vec<(&ErrorPattern, f64)> = Vec::new();
        for pattern in patterns.iter() {
            let hit = pattern.matcher.matches(&text, error).map_err(|e| {
                ClassifierError::MatcherFailed {
                    id: pattern.id.clone(),
                    reason: e.to_string(),
                }
            })?;
            if !hit {
                continue;
            }
            let mut confidence = pattern.confidence;
            if boost && pattern.has_tag("api") {
                confidence = (confidence * API_BOOST_FACTOR).min(1.0);
            }
            matched.push((pattern.as_ref(), confidence));
        }

        // Strict comparison keeps the earliest-registered pattern on ties
        let mut best: Option<(&ErrorPattern, f64)> = None;
        for (pattern, confidence) in &matched {
            if best.map_or(true, |(_, c)| *confidence > c) {
                best = Some((*pattern, *confidence));
            }
        }

        let mut tags: Vec<String> = Vec::new();
        for (pattern, _) in &matched {
            for tag in &pattern.tags {
                if !tags.contains(tag) {
                    tags.push(tag.clone());
                }
            }
        }
        let matched_patterns: Vec<String> = matched.iter().map(|(p, _)| p.id.clone()).collect();

        let mut classification = match best {
            Some((pattern, confidence)) if confidence > self.settings.min_confidence => {
                let mut c = ErrorClassification::from_profile(
                    error_id,
                    pattern.error_type.clone(),
                    pattern.severity,
                    confidence,
                );
                c.auto_recoverable = pattern.auto_recoverable;
                c
            }
            weak => {
                let severity = heuristic_severity(error);
                let confidence = weak.map(|(_, c)| c).unwrap_or(HEURISTIC_CONFIDENCE);
                tags.push("heuristic".to_string());
                let mut c = ErrorClassification::from_profile(
                    error_id,
                    ErrorType::Internal,
                    severity,
                    confidence,
                );
                c.auto_recoverable = severity < Severity::Critical
                    && !error.status.map(|s| (400..500).contains(&s)).unwrap_or(false);
                c
            }
        };

        classification.confidence = classification.confidence.clamp(0.0, 1.0);
        classification.matched_patterns = matched_patterns;
        classification.tags = tags;
        classification.status = error.status;
        classification.retry_after_secs = error.retry_after_secs;

        debug!(
            error_id = %classification.error_id,
            error_type = %classification.error_type,
            severity = %classification.severity,
            confidence = classification.confidence,
            service = context.service.as_deref().unwrap_or("-"),
            "Classified error"
        );
        Ok(classification)
    }
}

impl Classify for ErrorClassifier {
    fn classify(&self, error: &ErrorInfo, context: &ErrorContext) -> ErrorClassification {
        let error_id = error_id(error, context);
        let classification = match self.try_classify(error, context, error_id.clone()) {
            Ok(c) => c,
            Err(e) => {
                warn!(error_id = %error_id, error = %e, "Classification failed, using fallback");
                ErrorClassification::fallback(error_id)
            }
        };

        self.stats.record(&classification);
        metrics::increment_counter!(
            "opsmend_classifications_total",
            "type" => classification.error_type.to_string(),
            "severity" => classification.severity.as_str()
        );

        if classification.is_security_critical() {
            self.alerts.alert(&Alert {
                kind: AlertKind::SecurityCritical,
                error_type: classification.error_type.clone(),
                severity: classification.severity,
                error_id: Some(classification.error_id.clone()),
                message: format!(
                    "Security-critical {} error (patterns: {})",
                    classification.error_type,
                    classification.matched_patterns.join(", ")
                ),
                timestamp: classification.timestamp,
            });
        }

        classification
    }
}

impl std::fmt::Debug for ErrorClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorClassifier")
            .field("patterns", &self.snapshot().len())
            .field("settings", &self.settings)
            .finish()
    }
}

/// Severity guess when no pattern matched convincingly
fn heuristic_severity(error: &ErrorInfo) -> Severity {
    if let Some(status) = error.status {
        if status >= 500 {
            return Severity::High;
        }
        if status >= 400 {
            return Severity::Medium;
        }
    }
    let message = error.message.to_lowercase();
    if message.contains("critical") {
        Severity::Critical
    } else if message.contains("warning") {
        Severity::Low
    } else {
        Severity::Medium
    }
}

/// `err_<16 hex of message|name|code>_<6 hex of user|action|resource>`
///
/// The context suffix is for log correlation only; the prefix alone
/// identifies the error shape.
pub fn error_id(error: &ErrorInfo, context: &ErrorContext) -> String {
    let mut hasher = Sha256::new();
    hasher.update(error.message.as_bytes());
    hasher.update(b"|");
    hasher.update(error.name.as_bytes());
    hasher.update(b"|");
    hasher.update(error.code.as_deref().unwrap_or("").as_bytes());
    let error_hash = hex::encode(hasher.finalize());

    let mut hasher = Sha256::new();
    hasher.update(context.user_id.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(context.action.as_deref().unwrap_or("").as_bytes());
    hasher.update(b"|");
    hasher.update(context.resource.as_deref().unwrap_or("").as_bytes());
    let context_hash = hex::encode(hasher.finalize());

    format!("err_{}_{}", &error_hash[..16], &context_hash[..6])
}
