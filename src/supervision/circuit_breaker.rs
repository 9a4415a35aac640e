//! Per-service circuit breakers
//!
//! CLOSED passes calls through, OPEN fails fast, HALF_OPEN admits exactly one
//! trial call. All state for one breaker lives behind a single mutex that is
//! never held across an `.await`.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before opening the circuit
    pub failure_threshold: u32,
    /// Time spent OPEN before a trial call is allowed
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(60),
        }
    }
}

/// Circuit state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    Closed,
    Open,
    /// Reset timeout elapsed; one trial call may run
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "CLOSED",
            CircuitState::Open => "OPEN",
            CircuitState::HalfOpen => "HALF_OPEN",
        }
    }
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a guarded call that did not succeed
#[derive(Debug, Clone, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Not admitted: the circuit is open or a half-open trial is in flight
    #[error("circuit rejected the call")]
    Rejected,
    #[error("{0}")]
    Failed(E),
}

/// Point-in-time view of one breaker
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitBreakerSnapshot {
    pub service_name: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u64,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub rejected_calls: u64,
}

#[derive(Debug)]
struct Inner {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failure_count: u32,
    success_count: u64,
    last_failure_at: Option<DateTime<Utc>>,
    next_attempt: Option<Instant>,
    next_attempt_at: Option<DateTime<Utc>>,
    trial_in_flight: bool,
    rejected_calls: u64,
}

impl Inner {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_at: None,
            next_attempt: None,
            next_attempt_at: None,
            trial_in_flight: false,
            rejected_calls: 0,
        }
    }

    fn open(&mut self, now: Instant) {
        let timeout = self.config.reset_timeout;
        self.state = CircuitState::Open;
        self.next_attempt = Some(now + timeout);
        self.next_attempt_at = chrono::Duration::from_std(timeout)
            .ok()
            .map(|d| Utc::now() + d);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Permit {
    Normal,
    Trial,
}

/// Releases the half-open trial slot if the call future is dropped before it
/// reports a result.
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
    armed: bool,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut inner = self.breaker.inner.lock();
            inner.trial_in_flight = false;
            debug!(service = %self.breaker.service, "Abandoned half-open trial released");
        }
    }
}

/// Circuit breaker for one named dependency
pub struct CircuitBreaker {
    service: String,
    inner: Mutex<Inner>,
}

impl CircuitBreaker {
    pub fn new(service: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            service: service.into(),
            inner: Mutex::new(Inner::new(config)),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Current state. An OPEN breaker whose timeout has elapsed still
    /// reports OPEN until the next call moves it to HALF_OPEN.
    pub fn current_state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn config(&self) -> CircuitBreakerConfig {
        self.inner.lock().config
    }

    /// Swap the configuration. Applies from the next state change.
    pub fn set_config(&self, config: CircuitBreakerConfig) {
        self.inner.lock().config = config;
    }

    /// Whether a call right now would be rejected without running.
    pub fn is_rejecting(&self) -> bool {
        let inner = self.inner.lock();
        match inner.state {
            CircuitState::Closed => false,
            CircuitState::Open => inner
                .next_attempt
                .map(|t| Instant::now() < t)
                .unwrap_or(false),
            CircuitState::HalfOpen => inner.trial_in_flight,
        }
    }

    /// Run `operation` if the circuit admits it, recording the outcome.
    pub async fn call<F, Fut, T, E>(&self, operation: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let permit = match self.admit() {
            Some(permit) => permit,
            None => return Err(CircuitBreakerError::Rejected),
        };

        let mut guard = TrialGuard {
            breaker: self,
            armed: permit == Permit::Trial,
        };

        let result = operation().await;
        guard.armed = false;
        drop(guard);

        match result {
            Ok(value) => {
                self.on_success(permit);
                Ok(value)
            }
            Err(e) => {
                self.on_failure(permit);
                Err(CircuitBreakerError::Failed(e))
            }
        }
    }

    fn admit(&self) -> Option<Permit> {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        let permit = match inner.state {
            CircuitState::Closed => Some(Permit::Normal),
            CircuitState::Open => {
                let elapsed = inner.next_attempt.map(|t| now >= t).unwrap_or(true);
                if elapsed {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(service = %self.service, "Circuit breaker half-open, allowing trial call");
                    Some(Permit::Trial)
                } else {
                    None
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    None
                } else {
                    inner.trial_in_flight = true;
                    Some(Permit::Trial)
                }
            }
        };

        if permit.is_none() {
            inner.rejected_calls += 1;
            drop(inner);
            warn!(service = %self.service, "Circuit breaker open, rejecting request");
            metrics::increment_counter!(
                "opsmend_circuit_rejections_total",
                "service" => self.service.clone()
            );
        }
        permit
    }

    fn on_success(&self, permit: Permit) {
        let mut inner = self.inner.lock();
        inner.failure_count = 0;
        inner.success_count += 1;

        if permit == Permit::Trial {
            inner.trial_in_flight = false;
            if inner.state == CircuitState::HalfOpen {
                inner.state = CircuitState::Closed;
                inner.next_attempt = None;
                inner.next_attempt_at = None;
                info!(service = %self.service, "Circuit breaker closed after successful trial");
            }
        }
    }

    fn on_failure(&self, permit: Permit) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.failure_count += 1;
        inner.last_failure_at = Some(Utc::now());

        match (permit, inner.state) {
            (Permit::Trial, CircuitState::HalfOpen) => {
                inner.trial_in_flight = false;
                inner.open(now);
                info!(service = %self.service, "Trial call failed, reopening circuit");
            }
            (Permit::Normal, CircuitState::Closed)
                if inner.failure_count >= inner.config.failure_threshold =>
            {
                inner.open(now);
                info!(
                    service = %self.service,
                    failures = inner.failure_count,
                    "Failure threshold reached, opening circuit"
                );
            }
            (Permit::Trial, _) => {
                inner.trial_in_flight = false;
            }
            _ => {
                debug!(service = %self.service, failures = inner.failure_count, "Operation failed");
            }
        }
    }

    /// Force the breaker back to CLOSED with zeroed counters.
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let config = inner.config;
        *inner = Inner::new(config);
        info!(service = %self.service, "Circuit breaker reset");
    }

    pub fn snapshot(&self) -> CircuitBreakerSnapshot {
        let inner = self.inner.lock();
        CircuitBreakerSnapshot {
            service_name: self.service.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
            success_count: inner.success_count,
            last_failure_at: inner.last_failure_at,
            next_attempt_at: inner.next_attempt_at,
            rejected_calls: inner.rejected_calls,
        }
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("service", &self.service)
            .field("state", &self.current_state())
            .finish()
    }
}

/// Lazily creates one breaker per service key
#[derive(Debug)]
pub struct CircuitBreakerRegistry {
    config: RwLock<CircuitBreakerConfig>,
    breakers: RwLock<HashMap<String, Arc<CircuitBreaker>>>,
}

impl CircuitBreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config: RwLock::new(config),
            breakers: RwLock::new(HashMap::new()),
        }
    }

    /// Breaker for `service`, created on first use.
    pub fn get(&self, service: &str) -> Arc<CircuitBreaker> {
        if let Some(breaker) = self.breakers.read().get(service) {
            return Arc::clone(breaker);
        }
        let config = *self.config.read();
        let mut breakers = self.breakers.write();
        Arc::clone(
            breakers
                .entry(service.to_string())
                .or_insert_with(|| Arc::new(CircuitBreaker::new(service, config))),
        )
    }

    /// Breaker for `service` if one was ever created.
    pub fn find(&self, service: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.read().get(service).cloned()
    }

    /// Reset one breaker. Returns false if the service has none.
    pub fn reset(&self, service: &str) -> bool {
        match self.find(service) {
            Some(breaker) => {
                breaker.reset();
                true
            }
            None => false,
        }
    }

    /// New config for future breakers and every existing one.
    pub fn set_config(&self, config: CircuitBreakerConfig) {
        *self.config.write() = config;
        for breaker in self.breakers.read().values() {
            breaker.set_config(config);
        }
    }

    pub fn snapshots(&self) -> Vec<CircuitBreakerSnapshot> {
        let mut snapshots: Vec<_> = self.breakers.read().values().map(|b| b.snapshot()).collect();
        snapshots.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        snapshots
    }

    pub fn open_count(&self) -> usize {
        self.breakers
            .read()
            .values()
            .filter(|b| b.current_state() == CircuitState::Open)
            .count()
    }
}

impl Default for CircuitBreakerRegistry {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}
