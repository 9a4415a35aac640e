//! Recovery tuning and backoff arithmetic

use super::strategy::RecoveryStrategy;
use crate::errors::ConfigError;
use crate::supervision::CircuitBreakerConfig;
use std::time::Duration;

/// Tunable recovery policy. Supplied at start-up, swappable at runtime and
/// overridable per call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub backoff_multiplier: f64,
    pub circuit_breaker_threshold: u32,
    pub circuit_breaker_timeout: Duration,
    pub health_check_interval: Duration,
    /// Longest `healthCheckRecovery` waits for the service to come back
    pub health_wait_timeout: Duration,
    /// Wait used by `rateLimitBackoff` when upstream gave no retry-after
    pub rate_limit_delay: Duration,
    /// Pause before calling the secondary target
    pub failover_delay: Duration,
    /// Pause between cleanup and the retry
    pub cleanup_pause: Duration,
    /// Order used for types without a dedicated strategy list
    pub strategy_order: Vec<RecoveryStrategy>,
    pub enabled_strategies: Vec<RecoveryStrategy>,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(30_000),
            backoff_multiplier: 2.0,
            circuit_breaker_threshold: 5,
            circuit_breaker_timeout: Duration::from_millis(60_000),
            health_check_interval: Duration::from_millis(30_000),
            health_wait_timeout: Duration::from_secs(30),
            rate_limit_delay: Duration::from_secs(5),
            failover_delay: Duration::from_millis(1000),
            cleanup_pause: Duration::from_millis(2000),
            strategy_order: vec![
                RecoveryStrategy::ImmediateRetry,
                RecoveryStrategy::ExponentialBackoff,
                RecoveryStrategy::CircuitBreaker,
                RecoveryStrategy::GracefulDegradation,
            ],
            enabled_strategies: RecoveryStrategy::ALL.to_vec(),
        }
    }
}

impl RecoveryConfig {
    pub fn is_enabled(&self, strategy: RecoveryStrategy) -> bool {
        self.enabled_strategies.contains(&strategy)
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.max_retries,
            base_delay: self.base_delay,
            max_delay: self.max_delay,
            multiplier: self.backoff_multiplier,
        }
    }

    pub fn breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.circuit_breaker_threshold,
            reset_timeout: self.circuit_breaker_timeout,
        }
    }

    /// Reject values no recovery could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
            ConfigError::Invalid {
                field: field.to_string(),
                reason: reason.into(),
            }
        }

        if self.max_retries == 0 {
            return Err(invalid("recovery.max_retries", "must be at least 1"));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(invalid(
                "recovery.backoff_multiplier",
                format!("{} is below 1.0", self.backoff_multiplier),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(invalid(
                "recovery.base_delay_ms",
                "base delay exceeds max delay",
            ));
        }
        if self.circuit_breaker_threshold == 0 {
            return Err(invalid(
                "recovery.circuit_breaker_threshold",
                "must be at least 1",
            ));
        }
        if self.strategy_order.is_empty() {
            return Err(invalid("recovery.strategy_order", "cannot be empty"));
        }
        if self.enabled_strategies.is_empty() {
            return Err(invalid("recovery.enabled_strategies", "cannot be empty"));
        }
        Ok(())
    }
}

/// Exponential backoff with a ceiling
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl BackoffPolicy {
    /// Delay after failed attempt `attempt` (1-based), before the next one:
    /// `min(base * multiplier^(attempt-1), max)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let base_ms = self.base_delay.as_millis() as f64;
        let exp = self.multiplier.powi((attempt - 1).min(i32::MAX as u32) as i32);
        let delay_ms = base_ms * exp;
        let max_ms = self.max_delay.as_millis() as f64;
        let capped = if delay_ms.is_finite() {
            delay_ms.min(max_ms)
        } else {
            max_ms
        };
        Duration::from_millis(capped as u64)
    }

    /// Every delay a full run can incur, in order.
    pub fn delays(&self) -> Vec<Duration> {
        (1..self.max_attempts)
            .map(|n| self.delay_for_attempt(n))
            .collect()
    }
}
