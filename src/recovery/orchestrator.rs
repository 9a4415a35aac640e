//! Strategy selection and execution against caller-supplied operations

use super::cleanup::ResourceCleanup;
use super::fallback::{FallbackData, FallbackProvider, FallbackSource, ResponseCache};
use super::history::{AttemptHistory, RecoveryAttempt};
use super::policy::RecoveryConfig;
use super::strategy::{select_strategies, RecoveryStrategy};
use super::target::Target;
use crate::classifier::{Classify, ErrorClassification, ErrorContext, ErrorInfo};
use crate::errors::{ConfigError, RecoveryError};
use crate::observability::telemetry::{safe_message, track_strategy};
use crate::supervision::{
    sleep_or_cancel, CancellationToken, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitBreakerSnapshot, CircuitState, HealthMonitor, HealthStatus, ServiceHealth,
};
use chrono::Utc;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Per-call knobs for a recovery run
#[derive(Debug, Clone, Default)]
pub struct RecoveryOptions {
    /// Replaces the orchestrator's config for this call only
    pub config: Option<RecoveryConfig>,
    pub token: CancellationToken,
    pub context: ErrorContext,
}

impl RecoveryOptions {
    pub fn with_config(mut self, config: RecoveryConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }
}

/// Successful result of [`RecoveryOrchestrator::execute`] or
/// [`RecoveryOrchestrator::attempt_recovery`]
#[derive(Debug, Clone)]
pub struct RecoveryOutcome<T> {
    pub value: T,
    /// Strategy that produced the value; `None` when the first call worked
    pub strategy: Option<RecoveryStrategy>,
    pub target: Target,
    /// The value is cached or default data rather than a live response
    pub degraded: bool,
    pub source: Option<FallbackSource>,
    pub classification: Option<ErrorClassification>,
    /// Strategies executed, including the successful one
    pub attempts: u32,
}

/// Metrics for one service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRecoveryMetrics {
    pub service: String,
    pub health: Option<ServiceHealth>,
    pub circuit_breaker_state: Option<CircuitBreakerSnapshot>,
    pub recovery_attempts: Vec<RecoveryAttempt>,
}

/// Metrics across every known service
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregateRecoveryMetrics {
    pub total_services: usize,
    pub healthy_services: usize,
    pub unhealthy_services: usize,
    pub circuit_breakers_open: usize,
    pub total_recovery_attempts: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RecoveryMetrics {
    Service(ServiceRecoveryMetrics),
    Aggregate(AggregateRecoveryMetrics),
}

struct StrategyOutput<T> {
    value: T,
    target: Target,
    source: Option<FallbackSource>,
}

/// Runs recovery strategies for failed operations.
///
/// Configuration is copy-on-write: a call takes an `Arc` snapshot at start
/// and keeps it for its whole run, so `update_config` never affects a
/// recovery already in flight.
pub struct RecoveryOrchestrator {
    classifier: Arc<dyn Classify>,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<HealthMonitor>,
    config: RwLock<Arc<RecoveryConfig>>,
    fallbacks: RwLock<HashMap<String, Arc<dyn FallbackProvider>>>,
    secondaries: RwLock<HashMap<String, Target>>,
    cleanups: RwLock<HashMap<String, Arc<dyn ResourceCleanup>>>,
    cache: ResponseCache,
    history: AttemptHistory,
}

impl RecoveryOrchestrator {
    pub fn new(
        classifier: Arc<dyn Classify>,
        breakers: Arc<CircuitBreakerRegistry>,
        health: Arc<HealthMonitor>,
        config: RecoveryConfig,
    ) -> Self {
        breakers.set_config(config.breaker_config());
        Self {
            classifier,
            breakers,
            health,
            config: RwLock::new(Arc::new(config)),
            fallbacks: RwLock::new(HashMap::new()),
            secondaries: RwLock::new(HashMap::new()),
            cleanups: RwLock::new(HashMap::new()),
            cache: ResponseCache::default(),
            history: AttemptHistory::new(),
        }
    }

    /// Replace the default response cache (capacity / TTL).
    pub fn with_response_cache(mut self, cache: ResponseCache) -> Self {
        self.cache = cache;
        self
    }

    pub fn config(&self) -> Arc<RecoveryConfig> {
        Arc::clone(&self.config.read())
    }

    /// Validate and atomically swap the configuration. Breaker thresholds
    /// follow the new values.
    pub fn update_config(&self, config: RecoveryConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.breakers.set_config(config.breaker_config());
        *self.config.write() = Arc::new(config);
        info!("Recovery configuration updated");
        Ok(())
    }

    pub fn register_fallback(&self, service: impl Into<String>, provider: Arc<dyn FallbackProvider>) {
        self.fallbacks.write().insert(service.into(), provider);
    }

    pub fn register_secondary(&self, service: impl Into<String>, target: Target) {
        self.secondaries.write().insert(service.into(), target);
    }

    pub fn register_cleanup(&self, service: impl Into<String>, hook: Arc<dyn ResourceCleanup>) {
        self.cleanups.write().insert(service.into(), hook);
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn health_monitor(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn history(&self) -> &AttemptHistory {
        &self.history
    }

    pub fn circuit_state(&self, service: &str) -> Option<CircuitState> {
        self.breakers.find(service).map(|b| b.current_state())
    }

    /// Cached or default data for a service, as raw JSON.
    pub async fn fallback_data(&self, service: &str) -> Option<FallbackData> {
        if let Some(value) = self.cache.get(service) {
            return Some(FallbackData {
                value,
                source: FallbackSource::Cache,
            });
        }

        let provider = self.fallbacks.read().get(service).cloned()?;
        match provider.fallback(service).await {
            Ok(Some(value)) => Some(FallbackData {
                value,
                source: FallbackSource::Default,
            }),
            Ok(None) => None,
            Err(e) => {
                warn!(service = %service, error = %safe_message(&e.to_string()), "Fallback provider failed");
                None
            }
        }
    }

    /// Run the operation against the primary target; on failure hand over to
    /// [`attempt_recovery`](Self::attempt_recovery). Successful live results
    /// refresh the response cache.
    pub async fn execute<T, F, Fut>(
        &self,
        service: &str,
        operation: F,
        options: RecoveryOptions,
    ) -> Result<RecoveryOutcome<T>, RecoveryError>
    where
        F: Fn(Target) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Serialize + DeserializeOwned + Send,
    {
        let primary = Target::primary(service);
        let first = tokio::select! {
            biased;
            _ = options.token.cancelled() => return Err(RecoveryError::Cancelled),
            result = operation(primary.clone()) => result,
        };

        match first {
            Ok(value) => {
                self.remember(service, &value);
                Ok(RecoveryOutcome {
                    value,
                    strategy: None,
                    target: primary,
                    degraded: false,
                    source: None,
                    classification: None,
                    attempts: 0,
                })
            }
            Err(e) => self.attempt_recovery(service, operation, &e, options).await,
        }
    }

    /// Classify `causing_error`, then run the selected strategies in order
    /// until one succeeds. Every execution is recorded.
    pub async fn attempt_recovery<T, F, Fut>(
        &self,
        service: &str,
        operation: F,
        causing_error: &anyhow::Error,
        options: RecoveryOptions,
    ) -> Result<RecoveryOutcome<T>, RecoveryError>
    where
        F: Fn(Target) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Serialize + DeserializeOwned + Send,
    {
        let RecoveryOptions {
            config,
            token,
            mut context,
        } = options;
        let config = config.map(Arc::new).unwrap_or_else(|| self.config());
        if context.service.is_none() {
            context.service = Some(service.to_string());
        }

        let info = ErrorInfo::from_anyhow(causing_error);
        let classification = self.classifier.classify(&info, &context);
        let strategies = select_strategies(&classification, &config);

        info!(
            service = %service,
            error_id = %classification.error_id,
            error_type = %classification.error_type,
            strategies = ?strategies.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
            "Starting recovery"
        );

        let mut last_error = safe_message(&causing_error.to_string());
        for (index, strategy) in strategies.iter().copied().enumerate() {
            let attempt_number = index as u32 + 1;
            let (result, duration_ms) = track_strategy(service, strategy.as_str(), || {
                self.run_strategy(strategy, service, &operation, &classification, &config, &token)
            })
            .await;

            self.history.record(
                service,
                RecoveryAttempt {
                    attempt_number,
                    strategy,
                    success: result.is_ok(),
                    error: result.as_ref().err().map(|e| safe_message(&e.to_string())),
                    duration_ms,
                    timestamp: Utc::now(),
                },
            );
            metrics::increment_counter!(
                "opsmend_recovery_attempts_total",
                "strategy" => strategy.as_str(),
                "outcome" => if result.is_ok() { "success" } else { "failure" }
            );

            match result {
                Ok(output) => {
                    let degraded = output.source.is_some();
                    if !degraded {
                        self.remember(service, &output.value);
                    }
                    info!(
                        service = %service,
                        strategy = strategy.as_str(),
                        degraded,
                        "Recovery succeeded"
                    );
                    return Ok(RecoveryOutcome {
                        value: output.value,
                        strategy: Some(strategy),
                        target: output.target,
                        degraded,
                        source: output.source,
                        classification: Some(classification),
                        attempts: attempt_number,
                    });
                }
                Err(RecoveryError::Cancelled) => {
                    info!(service = %service, strategy = strategy.as_str(), "Recovery cancelled");
                    return Err(RecoveryError::Cancelled);
                }
                Err(e) => {
                    last_error = safe_message(&e.to_string());
                    warn!(
                        service = %service,
                        strategy = strategy.as_str(),
                        error = %last_error,
                        "Recovery strategy failed"
                    );
                }
            }
        }

        Err(RecoveryError::Exhausted {
            service: service.to_string(),
            attempted: strategies.len(),
            last_error,
        })
    }

    async fn run_strategy<T, F, Fut>(
        &self,
        strategy: RecoveryStrategy,
        service: &str,
        operation: &F,
        classification: &ErrorClassification,
        config: &RecoveryConfig,
        token: &CancellationToken,
    ) -> Result<StrategyOutput<T>, RecoveryError>
    where
        F: Fn(Target) -> Fut + Send + Sync,
        Fut: Future<Output = anyhow::Result<T>> + Send,
        T: Serialize + DeserializeOwned + Send,
    {
        token.check()?;
        let primary = Target::primary(service);
        if calls_primary(strategy) {
            self.ensure_admitted(service)?;
        }

        match strategy {
            RecoveryStrategy::ImmediateRetry => {
                let value = self.invoke_primary(service, operation, primary.clone(), token).await?;
                Ok(live(value, primary))
            }

            RecoveryStrategy::ExponentialBackoff => {
                let backoff = config.backoff();
                let mut last = None;
                for attempt in 1..=backoff.max_attempts {
                    match self.invoke_primary(service, operation, primary.clone(), token).await {
                        Ok(value) => return Ok(live(value, primary)),
                        Err(e @ (RecoveryError::Cancelled | RecoveryError::CircuitOpen { .. })) => {
                            return Err(e)
                        }
                        Err(e) => {
                            debug!(service = %service, attempt, "Backoff attempt failed");
                            last = Some(e);
                        }
                    }
                    if attempt < backoff.max_attempts {
                        sleep_or_cancel(backoff.delay_for_attempt(attempt), token).await?;
                    }
                }
                Err(last.unwrap_or_else(|| unavailable(service, strategy, "max_retries is zero")))
            }

            RecoveryStrategy::CircuitBreaker => {
                let breaker = self.breakers.get(service);
                match breaker.call(|| invoke(operation, primary.clone(), token)).await {
                    Ok(value) => Ok(live(value, primary)),
                    Err(CircuitBreakerError::Rejected) => Err(RecoveryError::CircuitOpen {
                        service: service.to_string(),
                    }),
                    Err(CircuitBreakerError::Failed(e)) => Err(e),
                }
            }

            RecoveryStrategy::HealthCheckRecovery => {
                if !self.health.has_probe(service) {
                    return Err(unavailable(service, strategy, "no health probe registered"));
                }
                let healthy = self
                    .health
                    .check_service(service)
                    .await
                    .map(|h| h.is_healthy())
                    .unwrap_or(false);
                if !healthy {
                    self.health
                        .wait_for_healthy(service, config.health_wait_timeout, token)
                        .await?;
                }
                let value = self.invoke_primary(service, operation, primary.clone(), token).await?;
                Ok(live(value, primary))
            }

            RecoveryStrategy::Failover => {
                let secondary = self
                    .secondaries
                    .read()
                    .get(service)
                    .cloned()
                    .ok_or_else(|| unavailable(service, strategy, "no secondary target registered"))?;
                sleep_or_cancel(config.failover_delay, token).await?;
                info!(service = %service, target = %secondary, "Failing over to secondary target");
                let value = invoke(operation, secondary.clone(), token).await?;
                Ok(live(value, secondary))
            }

            RecoveryStrategy::GracefulDegradation => {
                let data = self
                    .fallback_data(service)
                    .await
                    .ok_or_else(|| unavailable(service, strategy, "no cached or default data"))?;
                let value = serde_json::from_value::<T>(data.value).map_err(|e| {
                    RecoveryError::FallbackDecode {
                        service: service.to_string(),
                        message: e.to_string(),
                    }
                })?;
                Ok(StrategyOutput {
                    value,
                    target: primary,
                    source: Some(data.source),
                })
            }

            RecoveryStrategy::RateLimitBackoff => {
                let requested = classification
                    .retry_after_secs
                    .map(Duration::from_secs)
                    .unwrap_or(config.rate_limit_delay);
                let wait = requested.min(config.max_delay);
                if wait < requested {
                    warn!(
                        service = %service,
                        requested_secs = requested.as_secs(),
                        wait_ms = wait.as_millis() as u64,
                        "Rate-limit wait capped at max_delay"
                    );
                }
                debug!(service = %service, wait_ms = wait.as_millis() as u64, "Waiting out rate limit");
                sleep_or_cancel(wait, token).await?;
                let value = self.invoke_primary(service, operation, primary.clone(), token).await?;
                Ok(live(value, primary))
            }

            RecoveryStrategy::ResourceCleanup => {
                let hook = self.cleanups.read().get(service).cloned();
                match hook {
                    Some(hook) => {
                        if let Err(e) = hook.cleanup(service).await {
                            warn!(
                                service = %service,
                                error = %safe_message(&e.to_string()),
                                "Resource cleanup failed, retrying anyway"
                            );
                        }
                    }
                    None => debug!(service = %service, "No cleanup hook registered"),
                }
                sleep_or_cancel(config.cleanup_pause, token).await?;
                let value = self.invoke_primary(service, operation, primary.clone(), token).await?;
                Ok(live(value, primary))
            }
        }
    }

    /// Fail fast while the service's breaker is open and its timeout has
    /// not elapsed.
    fn ensure_admitted(&self, service: &str) -> Result<(), RecoveryError> {
        match self.breakers.find(service) {
            Some(breaker) if breaker.is_rejecting() => Err(RecoveryError::CircuitOpen {
                service: service.to_string(),
            }),
            _ => Ok(()),
        }
    }

    /// Call the primary target. A closed (or absent) breaker is bypassed so
    /// retries do not count against it; otherwise the call goes through the
    /// breaker, which either rejects it or lets it through as the trial.
    async fn invoke_primary<T, F, Fut>(
        &self,
        service: &str,
        operation: &F,
        primary: Target,
        token: &CancellationToken,
    ) -> Result<T, RecoveryError>
    where
        F: Fn(Target) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let breaker = match self.breakers.find(service) {
            Some(breaker) if breaker.current_state() != CircuitState::Closed => breaker,
            _ => return invoke(operation, primary, token).await,
        };
        match breaker.call(|| invoke(operation, primary, token)).await {
            Ok(value) => Ok(value),
            Err(CircuitBreakerError::Rejected) => Err(RecoveryError::CircuitOpen {
                service: service.to_string(),
            }),
            Err(CircuitBreakerError::Failed(e)) => Err(e),
        }
    }

    fn remember<T: Serialize>(&self, service: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(json) => self.cache.store(service, json),
            Err(e) => debug!(service = %service, error = %e, "Result not cacheable"),
        }
    }

    /// `Some(service)` for one service, `None` for the aggregate view.
    pub fn recovery_metrics(&self, service: Option<&str>) -> RecoveryMetrics {
        match service {
            Some(service) => RecoveryMetrics::Service(ServiceRecoveryMetrics {
                service: service.to_string(),
                health: self.health.health(service),
                circuit_breaker_state: self.breakers.find(service).map(|b| b.snapshot()),
                recovery_attempts: self.history.for_service(service),
            }),
            None => {
                let all_health = self.health.all_health();
                let mut services: BTreeSet<String> =
                    all_health.iter().map(|h| h.service_name.clone()).collect();
                services.extend(self.breakers.snapshots().into_iter().map(|s| s.service_name));
                services.extend(self.history.services());

                RecoveryMetrics::Aggregate(AggregateRecoveryMetrics {
                    total_services: services.len(),
                    healthy_services: all_health
                        .iter()
                        .filter(|h| h.status == HealthStatus::Healthy)
                        .count(),
                    unhealthy_services: all_health
                        .iter()
                        .filter(|h| h.status == HealthStatus::Unhealthy)
                        .count(),
                    circuit_breakers_open: self.breakers.open_count(),
                    total_recovery_attempts: self.history.total(),
                })
            }
        }
    }
}

impl std::fmt::Debug for RecoveryOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecoveryOrchestrator")
            .field("config", &self.config())
            .field("cached_responses", &self.cache.len())
            .finish()
    }
}

fn live<T>(value: T, target: Target) -> StrategyOutput<T> {
    StrategyOutput {
        value,
        target,
        source: None,
    }
}

/// Strategies that end by calling the primary target
fn calls_primary(strategy: RecoveryStrategy) -> bool {
    !matches!(
        strategy,
        RecoveryStrategy::CircuitBreaker
            | RecoveryStrategy::Failover
            | RecoveryStrategy::GracefulDegradation
    )
}

fn unavailable(service: &str, strategy: RecoveryStrategy, reason: &str) -> RecoveryError {
    RecoveryError::StrategyUnavailable {
        service: service.to_string(),
        strategy: strategy.as_str().to_string(),
        reason: reason.to_string(),
    }
}

/// Call the operation once, giving up early if the token fires.
async fn invoke<T, F, Fut>(
    operation: &F,
    target: Target,
    token: &CancellationToken,
) -> Result<T, RecoveryError>
where
    F: Fn(Target) -> Fut,
    Fut: Future<Output = anyhow::Result<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(RecoveryError::Cancelled),
        result = operation(target) => result.map_err(RecoveryError::Operation),
    }
}
