//! Detection patterns and pluggable matchers

use super::error_info::ErrorInfo;
use super::taxonomy::{ErrorType, Severity};
use crate::errors::ClassifierError;
use regex::{Regex, RegexBuilder};
use serde::Serialize;
use std::fmt;
use tracing::warn;

/// Maximum compiled regex size to mitigate ReDoS (catastrophic backtracking).
const REGEX_SIZE_LIMIT: usize = 1 << 20; // 1 MB

/// Decides whether a pattern applies to an error.
///
/// `text` is the pre-built match text (message, stack, name, code). Matchers
/// that need structured fields read them from `error`.
pub trait ErrorMatcher: Send + Sync + fmt::Debug {
    fn matches(&self, text: &str, error: &ErrorInfo) -> anyhow::Result<bool>;

    /// Short human-readable form, used when listing patterns.
    fn describe(&self) -> String;
}

/// Case-insensitive regular expression matcher
#[derive(Debug)]
pub struct RegexMatcher {
    regex: Regex,
}

impl RegexMatcher {
    pub fn new(pattern: &str) -> Result<Self, regex::Error> {
        let regex = RegexBuilder::new(pattern)
            .case_insensitive(true)
            .size_limit(REGEX_SIZE_LIMIT)
            .build()?;
        Ok(Self { regex })
    }
}

impl ErrorMatcher for RegexMatcher {
    fn matches(&self, text: &str, _error: &ErrorInfo) -> anyhow::Result<bool> {
        Ok(self.regex.is_match(text))
    }

    fn describe(&self) -> String {
        format!("regex:{}", self.regex.as_str())
    }
}

/// Case-insensitive substring matcher
#[derive(Debug)]
pub struct SubstringMatcher {
    needle: String,
}

impl SubstringMatcher {
    pub fn new(needle: &str) -> Self {
        Self {
            needle: needle.to_lowercase(),
        }
    }
}

impl ErrorMatcher for SubstringMatcher {
    fn matches(&self, text: &str, _error: &ErrorInfo) -> anyhow::Result<bool> {
        Ok(text.to_lowercase().contains(&self.needle))
    }

    fn describe(&self) -> String {
        format!("contains:{}", self.needle)
    }
}

/// Matches on the HTTP-like status carried by the error
#[derive(Debug)]
pub struct StatusMatcher {
    statuses: Vec<u16>,
}

impl StatusMatcher {
    pub fn new(statuses: &[u16]) -> Self {
        Self {
            statuses: statuses.to_vec(),
        }
    }
}

impl ErrorMatcher for StatusMatcher {
    fn matches(&self, _text: &str, error: &ErrorInfo) -> anyhow::Result<bool> {
        Ok(error
            .status
            .map(|s| self.statuses.contains(&s))
            .unwrap_or(false))
    }

    fn describe(&self) -> String {
        let codes: Vec<String> = self.statuses.iter().map(|s| s.to_string()).collect();
        format!("status:{}", codes.join(","))
    }
}

/// A registered detection rule
#[derive(Debug)]
pub struct ErrorPattern {
    pub id: String,
    pub matcher: Box<dyn ErrorMatcher>,
    pub error_type: ErrorType,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub auto_recoverable: bool,
}

impl ErrorPattern {
    pub fn new(
        id: impl Into<String>,
        matcher: Box<dyn ErrorMatcher>,
        error_type: ErrorType,
        severity: Severity,
        confidence: f64,
    ) -> Self {
        Self {
            id: id.into(),
            matcher,
            error_type,
            severity,
            tags: Vec::new(),
            confidence,
            auto_recoverable: true,
        }
    }

    /// Pattern backed by a case-insensitive regex.
    pub fn regex(
        id: impl Into<String>,
        pattern: &str,
        error_type: ErrorType,
        severity: Severity,
        confidence: f64,
    ) -> Result<Self, ClassifierError> {
        let id = id.into();
        let matcher = RegexMatcher::new(pattern).map_err(|e| ClassifierError::InvalidPattern {
            id: id.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self::new(id, Box::new(matcher), error_type, severity, confidence))
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    pub fn auto_recoverable(mut self, value: bool) -> Self {
        self.auto_recoverable = value;
        self
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Reject patterns whose confidence falls outside [0, 1].
    pub fn validate(&self) -> Result<(), ClassifierError> {
        if self.id.trim().is_empty() {
            return Err(ClassifierError::InvalidPattern {
                id: self.id.clone(),
                reason: "id cannot be empty".to_string(),
            });
        }
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(ClassifierError::InvalidPattern {
                id: self.id.clone(),
                reason: format!("confidence {} outside [0, 1]", self.confidence),
            });
        }
        Ok(())
    }

    pub fn summary(&self) -> PatternSummary {
        PatternSummary {
            id: self.id.clone(),
            matcher: self.matcher.describe(),
            error_type: self.error_type.clone(),
            severity: self.severity,
            tags: self.tags.clone(),
            confidence: self.confidence,
            auto_recoverable: self.auto_recoverable,
        }
    }
}

/// Serializable view of a pattern, for listing
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PatternSummary {
    pub id: String,
    pub matcher: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: Severity,
    pub tags: Vec<String>,
    pub confidence: f64,
    pub auto_recoverable: bool,
}

struct BuiltinRule {
    id: &'static str,
    regex: &'static str,
    error_type: ErrorType,
    severity: Severity,
    confidence: f64,
    tags: &'static [&'static str],
    auto_recoverable: bool,
}

fn build(rule: BuiltinRule) -> Option<ErrorPattern> {
    match ErrorPattern::regex(
        rule.id,
        rule.regex,
        rule.error_type,
        rule.severity,
        rule.confidence,
    ) {
        Ok(p) => Some(
            p.with_tags(rule.tags)
                .auto_recoverable(rule.auto_recoverable),
        ),
        Err(e) => {
            warn!(pattern = rule.id, error = %e, "Built-in pattern failed to compile (skipping)");
            None
        }
    }
}

/// The built-in pattern catalogue, in registration (tie-break) order.
pub fn default_patterns() -> Vec<ErrorPattern> {
    use ErrorType::*;

    let rules = vec![
        BuiltinRule {
            id: "rate_limit_exceeded",
            regex: r"\b429\b|too many requests|rate.?limit|quota exceeded|throttl",
            error_type: RateLimit,
            severity: Severity::Medium,
            confidence: 0.95,
            tags: &["api", "rate_limit", "external"],
            auto_recoverable: true,
        },
        BuiltinRule {
            id: "network_connection",
            regex: r"econnrefused|econnreset|enotfound|ehostunreach|econnaborted|connection refused|connection reset|socket hang up|network (error|unreachable)|fetch failed|dns",
            error_type: Network,
            severity: Severity::Medium,
            confidence: 0.9,
            tags: &["network", "connectivity"],
            auto_recoverable: true,
        },
        BuiltinRule {
            id: "network_timeout",
            regex: r"etimedout|timed? ?out|timeout|deadline exceeded",
            error_type: Network,
            severity: Severity::Medium,
            confidence: 0.8,
            tags: &["network", "timeout"],
            auto_recoverable: true,
        },
        BuiltinRule {
            id: "upstream_gateway",
            regex: r"\b(502|503|504)\b|bad gateway|service unavailable|gateway timeout",
            error_type: Network,
            severity: Severity::Medium,
            confidence: 0.75,
            tags: &["api", "network", "upstream"],
            auto_recoverable: true,
        },
        BuiltinRule {
            id: "database_connection",
            regex: r"database|connection pool|too many connections|deadlock|could not serialize|postgres|supabase|pgrst|\bsql\b",
            error_type: Database,
            severity: Severity::Medium,
            confidence: 0.85,
            tags: &["database", "storage"],
            auto_recoverable: true,
        },
        BuiltinRule {
            id: "data_integrity",
            regex: r"duplicate key|unique constraint|foreign key|violates .*constraint|checksum mismatch|corrupt",
            error_type: DataIntegrity,
            severity: Severity::High,
            confidence: 0.9,
            tags: &["database", "integrity"],
            auto_recoverable: false,
        },
        BuiltinRule {
            id: "authentication_failed",
            regex: r"\b401\b|unauthori[sz]ed|invalid (token|credentials|api key)|jwt expired|token expired|authentication failed|not authenticated",
            error_type: Authentication,
            severity: Severity::High,
            confidence: 0.9,
            tags: &["api", "auth", "security"],
            auto_recoverable: true,
        },
        BuiltinRule {
            id: "authorization_denied",
            regex: r"\b403\b|forbidden|permission denied|access denied|insufficient (permissions|privileges)|not allowed",
            error_type: Authorization,
            severity: Severity::High,
            confidence: 0.9,
            tags: &["api", "auth", "security"],
            auto_recoverable: false,
        },
        BuiltinRule {
            id: "validation_failed",
            regex: r"\b(400|422)\b|validation|invalid (input|argument|parameter|format)|is required|required field|malformed|bad request|must be",
            error_type: Validation,
            severity: Severity::Low,
            confidence: 0.85,
            tags: &["api", "validation", "user_input"],
            auto_recoverable: false,
        },
        BuiltinRule {
            id: "resource_not_found",
            regex: r"\b404\b|not found|no such|does not exist",
            error_type: NotFound,
            severity: Severity::Low,
            confidence: 0.8,
            tags: &["api", "user_input"],
            auto_recoverable: false,
        },
        BuiltinRule {
            id: "memory_pressure",
            regex: r"out of memory|enomem|heap (limit|out)|memory leak|allocation failed",
            error_type: MemoryLeak,
            severity: Severity::Critical,
            confidence: 0.85,
            tags: &["performance", "memory"],
            auto_recoverable: false,
        },
        BuiltinRule {
            id: "suspicious_activity",
            regex: r"sql injection|union select|<script|xss|brute.?force|suspicious|too many failed (login|attempts)",
            error_type: SuspiciousActivity,
            severity: Severity::Critical,
            confidence: 0.9,
            tags: &["security", "threat"],
            auto_recoverable: false,
        },
        BuiltinRule {
            id: "workflow_execution",
            regex: r"workflow|n8n|webhook|execution failed|automation",
            error_type: WorkflowExecution,
            severity: Severity::Medium,
            confidence: 0.75,
            tags: &["workflow", "integration"],
            auto_recoverable: true,
        },
        BuiltinRule {
            id: "configuration_missing",
            regex: r"missing (env|environment|config)|not configured|configuration error|undefined variable",
            error_type: Configuration,
            severity: Severity::High,
            confidence: 0.8,
            tags: &["configuration"],
            auto_recoverable: false,
        },
        BuiltinRule {
            id: "internal_server",
            regex: r"\b500\b|internal server error|unexpected error|panicked",
            error_type: Internal,
            severity: Severity::High,
            confidence: 0.6,
            tags: &["api", "server"],
            auto_recoverable: true,
        },
    ];

    let mut patterns: Vec<ErrorPattern> = rules.into_iter().filter_map(build).collect();

    // Status-only rules catch upstream failures whose message says nothing
    // useful. Registered last so text rules win ties.
    let status_rules: [(&str, &[u16], ErrorType, Severity); 6] = [
        ("status_unauthorized", &[401], Authentication, Severity::High),
        ("status_forbidden", &[403], Authorization, Severity::High),
        ("status_bad_request", &[400, 422], Validation, Severity::Low),
        ("status_not_found", &[404, 410], NotFound, Severity::Low),
        ("status_too_many_requests", &[429], RateLimit, Severity::Medium),
        ("status_bad_gateway", &[502, 503, 504], Network, Severity::Medium),
    ];
    for (id, statuses, error_type, severity) in status_rules {
        let auto_recoverable = matches!(error_type, RateLimit | Network | Authentication);
        patterns.push(
            ErrorPattern::new(
                id,
                Box::new(StatusMatcher::new(statuses)),
                error_type,
                severity,
                0.7,
            )
            .with_tags(&["api", "http_status"])
            .auto_recoverable(auto_recoverable),
        );
    }

    patterns
}
