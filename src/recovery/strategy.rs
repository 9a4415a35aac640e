//! Recovery strategy names and per-type selection

use super::policy::RecoveryConfig;
use crate::classifier::{ErrorClassification, ErrorType, Severity};
use crate::errors::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A named algorithm tried to complete an operation after a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RecoveryStrategy {
    ImmediateRetry,
    ExponentialBackoff,
    CircuitBreaker,
    HealthCheckRecovery,
    Failover,
    GracefulDegradation,
    RateLimitBackoff,
    ResourceCleanup,
}

impl RecoveryStrategy {
    pub const ALL: [RecoveryStrategy; 8] = [
        RecoveryStrategy::ImmediateRetry,
        RecoveryStrategy::ExponentialBackoff,
        RecoveryStrategy::CircuitBreaker,
        RecoveryStrategy::HealthCheckRecovery,
        RecoveryStrategy::Failover,
        RecoveryStrategy::GracefulDegradation,
        RecoveryStrategy::RateLimitBackoff,
        RecoveryStrategy::ResourceCleanup,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecoveryStrategy::ImmediateRetry => "immediateRetry",
            RecoveryStrategy::ExponentialBackoff => "exponentialBackoff",
            RecoveryStrategy::CircuitBreaker => "circuitBreaker",
            RecoveryStrategy::HealthCheckRecovery => "healthCheckRecovery",
            RecoveryStrategy::Failover => "failover",
            RecoveryStrategy::GracefulDegradation => "gracefulDegradation",
            RecoveryStrategy::RateLimitBackoff => "rateLimitBackoff",
            RecoveryStrategy::ResourceCleanup => "resourceCleanup",
        }
    }

    /// Whether the strategy calls the operation again.
    pub fn retries(&self) -> bool {
        !matches!(self, RecoveryStrategy::GracefulDegradation)
    }
}

impl fmt::Display for RecoveryStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RecoveryStrategy {
    type Err = ConfigError;

    /// Accepts the camelCase names as well as snake_case spellings.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .collect::<String>()
            .to_lowercase();
        RecoveryStrategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str().to_lowercase() == normalized)
            .ok_or_else(|| ConfigError::UnknownStrategy(s.to_string()))
    }
}

/// Whether a classification may be retried at all.
///
/// Validation and authorization errors never are. Rate-limit, network and
/// database errors only when the classifier is reasonably sure and the
/// severity is low or medium. Everything else follows the matched pattern.
pub fn retry_allowed(classification: &ErrorClassification) -> bool {
    match classification.error_type {
        ErrorType::Validation | ErrorType::Authorization => false,
        ErrorType::RateLimit | ErrorType::Network | ErrorType::Database => {
            classification.confidence >= 0.6
                && matches!(classification.severity, Severity::Low | Severity::Medium)
        }
        _ => classification.auto_recoverable,
    }
}

/// Ordered strategies for a classification. `gracefulDegradation` is always
/// last; when retrying is not allowed it is the only entry.
pub fn select_strategies(
    classification: &ErrorClassification,
    config: &RecoveryConfig,
) -> Vec<RecoveryStrategy> {
    use RecoveryStrategy::*;

    let mut strategies: Vec<RecoveryStrategy> = if retry_allowed(classification) {
        let base = match classification.error_type {
            ErrorType::RateLimit => vec![RateLimitBackoff],
            ErrorType::Network => vec![ExponentialBackoff, CircuitBreaker, Failover],
            ErrorType::Database => vec![ExponentialBackoff, CircuitBreaker, ResourceCleanup],
            ErrorType::Authentication => vec![ImmediateRetry, HealthCheckRecovery],
            _ => config.strategy_order.clone(),
        };
        let mut seen = Vec::with_capacity(base.len());
        for strategy in base {
            if config.is_enabled(strategy) && !seen.contains(&strategy) {
                seen.push(strategy);
            }
        }
        seen
    } else {
        Vec::new()
    };

    // Degradation stays last even if the configured order lists it earlier
    strategies.retain(|s| *s != GracefulDegradation);
    strategies.push(GracefulDegradation);
    strategies
}
