//! Request-boundary error handling
//!
//! [`RecoveryMiddleware`] wraps an inbound handler. Successful results pass
//! through untouched; failures are classified and rendered as a
//! [`BoundaryResponse`] with a status code, a redacted message and hints the
//! client can act on (`retryAfter`, `circuitBreaker`, `fallbackData`).
//! Nothing unredacted and no stack trace ever reaches the body.

use crate::classifier::{Classify, ErrorClassification, ErrorContext, ErrorInfo, ErrorType, Severity};
use crate::observability::telemetry::redact_secrets;
use crate::recovery::RecoveryOrchestrator;
use crate::supervision::CircuitState;
use chrono::{DateTime, Utc};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

const REDACTED: &str = "[REDACTED]";

/// Middleware behaviour, loaded from the `[middleware]` config section
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MiddlewareSettings {
    /// Endpoints that answer with a fallback payload instead of an error
    pub critical_endpoints: Vec<String>,
    /// Payload per critical endpoint; endpoints without one get a generic body
    pub critical_fallbacks: HashMap<String, Value>,
    /// Attach cached/default service data to error bodies when available
    pub include_fallback_data: bool,
    /// Redacted messages are cut to this many characters
    pub max_message_len: usize,
}

impl Default for MiddlewareSettings {
    fn default() -> Self {
        Self {
            critical_endpoints: Vec::new(),
            critical_fallbacks: HashMap::new(),
            include_fallback_data: true,
            max_message_len: 500,
        }
    }
}

/// JSON body of an error response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Always `true`; lets clients tell error bodies from payloads
    pub error: bool,
    /// HTTP reason phrase, or "Service Degraded" for critical fallbacks
    pub title: String,
    pub message: String,
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: Severity,
    pub error_id: String,
    pub timestamp: DateTime<Utc>,
    /// Minutes
    pub estimated_resolution_time: u32,
    /// Seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_mode: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub circuit_breaker: Option<CircuitState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback_data: Option<Value>,
}

/// Status, headers and body handed back to the transport layer
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BoundaryResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: ErrorBody,
}

impl BoundaryResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn is_fallback(&self) -> bool {
        self.body.fallback_mode == Some(true)
    }
}

/// HTTP status for an error type.
pub fn status_for(error_type: &ErrorType) -> u16 {
    match error_type {
        ErrorType::RateLimit => 429,
        ErrorType::Authentication => 401,
        ErrorType::Authorization => 403,
        ErrorType::Validation => 400,
        ErrorType::NotFound => 404,
        ErrorType::Database => 503,
        ErrorType::Network => 502,
        _ => 500,
    }
}

fn title_for(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        429 => "Too Many Requests",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        _ => "Internal Server Error",
    }
}

/// Client-side and security failures never get stale data attached.
fn offers_fallback(error_type: &ErrorType) -> bool {
    !matches!(
        error_type,
        ErrorType::Validation
            | ErrorType::Authentication
            | ErrorType::Authorization
            | ErrorType::NotFound
            | ErrorType::SuspiciousActivity
    )
}

fn sensitive_words() -> Option<&'static Regex> {
    static WORDS: OnceLock<Option<Regex>> = OnceLock::new();
    WORDS
        .get_or_init(|| {
            RegexBuilder::new(r"\b\w*(password|token|secret|key|auth)\w*\b")
                .case_insensitive(true)
                .build()
                .ok()
        })
        .as_ref()
}

/// Redact credentials and any word mentioning one, then truncate.
pub fn redact_message(message: &str, max_len: usize) -> String {
    let scrubbed = redact_secrets(message);
    let redacted = match sensitive_words() {
        Some(words) => words.replace_all(&scrubbed, REDACTED).into_owned(),
        None => REDACTED.to_string(),
    };
    if redacted.chars().count() > max_len {
        let mut cut: String = redacted.chars().take(max_len).collect();
        cut.push_str("...");
        cut
    } else {
        redacted
    }
}

/// Classifies handler failures and renders client-safe responses.
pub struct RecoveryMiddleware {
    classifier: Arc<dyn Classify>,
    orchestrator: Option<Arc<RecoveryOrchestrator>>,
    settings: MiddlewareSettings,
}

impl RecoveryMiddleware {
    pub fn new(classifier: Arc<dyn Classify>, settings: MiddlewareSettings) -> Self {
        Self {
            classifier,
            orchestrator: None,
            settings,
        }
    }

    /// Use the orchestrator for circuit state, rate-limit defaults and
    /// fallback data hints.
    pub fn with_orchestrator(mut self, orchestrator: Arc<RecoveryOrchestrator>) -> Self {
        self.orchestrator = Some(orchestrator);
        self
    }

    pub fn settings(&self) -> &MiddlewareSettings {
        &self.settings
    }

    pub fn is_critical(&self, endpoint: &str) -> bool {
        self.settings.critical_endpoints.iter().any(|e| e == endpoint)
    }

    /// Run `handler`; map any error to a [`BoundaryResponse`].
    pub async fn handle<T, F, Fut>(&self, context: &ErrorContext, handler: F) -> Result<T, BoundaryResponse>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match handler().await {
            Ok(value) => Ok(value),
            Err(e) => Err(self.respond(&e, context).await),
        }
    }

    pub async fn respond(&self, error: &anyhow::Error, context: &ErrorContext) -> BoundaryResponse {
        self.respond_to(&ErrorInfo::from_anyhow(error), context).await
    }

    pub async fn respond_to(&self, info: &ErrorInfo, context: &ErrorContext) -> BoundaryResponse {
        let classification = self.classifier.classify(info, context);
        log_failure(&classification, context);

        if let Some(endpoint) = context.endpoint.as_deref().filter(|e| self.is_critical(e)) {
            return self.critical_fallback(endpoint, &classification);
        }

        let status = status_for(&classification.error_type);
        let mut body = self.base_body(status, info, &classification);
        let mut headers = vec![("X-Error-Id".to_string(), classification.error_id.clone())];

        if classification.error_type == ErrorType::RateLimit {
            let retry_after = classification.retry_after_secs.unwrap_or_else(|| {
                self.orchestrator
                    .as_ref()
                    .map(|o| o.config().rate_limit_delay.as_secs())
                    .unwrap_or(60)
                    .max(1)
            });
            body.retry_after = Some(retry_after);
            headers.push(("Retry-After".to_string(), retry_after.to_string()));
        }

        if let (Some(orchestrator), Some(service)) = (&self.orchestrator, context.service.as_deref()) {
            if let Some(state) = orchestrator.circuit_state(service) {
                if state != CircuitState::Closed {
                    body.circuit_breaker = Some(state);
                }
            }
            if self.settings.include_fallback_data && offers_fallback(&classification.error_type) {
                if let Some(data) = orchestrator.fallback_data(service).await {
                    body.fallback_data = Some(data.value);
                    body.fallback_mode = Some(true);
                    headers.push(("X-Fallback-Source".to_string(), data.source.as_str().to_string()));
                }
            }
        }

        BoundaryResponse {
            status,
            headers,
            body,
        }
    }

    fn base_body(&self, status: u16, info: &ErrorInfo, classification: &ErrorClassification) -> ErrorBody {
        ErrorBody {
            error: true,
            title: title_for(status).to_string(),
            message: redact_message(&info.message, self.settings.max_message_len),
            error_type: classification.error_type.clone(),
            severity: classification.severity,
            error_id: classification.error_id.clone(),
            timestamp: classification.timestamp,
            estimated_resolution_time: classification.estimated_resolution_minutes,
            retry_after: None,
            fallback_mode: None,
            circuit_breaker: None,
            fallback_data: None,
        }
    }

    fn critical_fallback(&self, endpoint: &str, classification: &ErrorClassification) -> BoundaryResponse {
        let payload = self
            .settings
            .critical_fallbacks
            .get(endpoint)
            .cloned()
            .unwrap_or_else(|| json!({ "endpoint": endpoint, "status": "degraded", "data": null }));
        info!(
            endpoint = %endpoint,
            error_id = %classification.error_id,
            "Serving fallback payload for critical endpoint"
        );

        BoundaryResponse {
            status: 200,
            headers: vec![
                ("X-Error-Id".to_string(), classification.error_id.clone()),
                ("X-Fallback-Mode".to_string(), "true".to_string()),
            ],
            body: ErrorBody {
                error: true,
                title: "Service Degraded".to_string(),
                message: "Serving fallback data while the service recovers".to_string(),
                error_type: classification.error_type.clone(),
                severity: classification.severity,
                error_id: classification.error_id.clone(),
                timestamp: classification.timestamp,
                estimated_resolution_time: classification.estimated_resolution_minutes,
                retry_after: None,
                fallback_mode: Some(true),
                circuit_breaker: None,
                fallback_data: Some(payload),
            },
        }
    }
}

fn log_failure(classification: &ErrorClassification, context: &ErrorContext) {
    let endpoint = context.endpoint.as_deref().unwrap_or("-");
    match classification.severity {
        Severity::Critical | Severity::High => error!(
            error_id = %classification.error_id,
            error_type = %classification.error_type,
            endpoint = %endpoint,
            "Request failed"
        ),
        _ => warn!(
            error_id = %classification.error_id,
            error_type = %classification.error_type,
            endpoint = %endpoint,
            "Request failed"
        ),
    }
}
