//! Periodic dependency health probes

use super::task::{sleep_or_cancel, CancellationToken, RepeatingTask};
use crate::errors::RecoveryError;
use crate::observability::telemetry::safe_message;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Outcome of one probe
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeResult {
    pub healthy: bool,
    /// Probe-reported latency. When absent the monitor uses wall time.
    pub response_time_ms: Option<u64>,
    pub detail: Option<String>,
}

impl ProbeResult {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            response_time_ms: None,
            detail: None,
        }
    }

    pub fn unhealthy(detail: impl Into<String>) -> Self {
        Self {
            healthy: false,
            response_time_ms: None,
            detail: Some(detail.into()),
        }
    }

    pub fn with_response_time_ms(mut self, ms: u64) -> Self {
        self.response_time_ms = Some(ms);
        self
    }
}

/// Health check trait for dependencies
#[async_trait::async_trait]
pub trait HealthCheck: Send + Sync {
    /// Perform the health check
    async fn check(&self) -> ProbeResult;
}

/// Adapts an async closure into a [`HealthCheck`]. `Ok` is healthy, `Err`
/// is unhealthy with the error as detail.
pub struct FnProbe<F> {
    probe: F,
}

impl<F> FnProbe<F> {
    pub fn new(probe: F) -> Self {
        Self { probe }
    }
}

#[async_trait::async_trait]
impl<F, Fut> HealthCheck for FnProbe<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send,
{
    async fn check(&self) -> ProbeResult {
        match (self.probe)().await {
            Ok(()) => ProbeResult::healthy(),
            Err(e) => ProbeResult::unhealthy(e.to_string()),
        }
    }
}

/// Convenience constructor for [`FnProbe`].
pub fn probe_fn<F, Fut>(probe: F) -> Arc<dyn HealthCheck>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Arc::new(FnProbe::new(probe))
}

/// Health status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    /// Failing but below the unhealthy threshold, or slow
    Degraded,
    Unhealthy,
    /// Never probed
    Unknown,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
            HealthStatus::Unknown => "unknown",
        }
    }
}

/// Current health of a named dependency
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceHealth {
    pub service_name: String,
    pub status: HealthStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub response_time_ms: u64,
    /// Failed fraction of the last `window` probes
    pub error_rate: f64,
    pub consecutive_failures: u32,
    /// Successful fraction of every probe since registration, in percent
    pub uptime_pct: f64,
    pub total_checks: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ServiceHealth {
    pub fn unknown(service: impl Into<String>) -> Self {
        Self {
            service_name: service.into(),
            status: HealthStatus::Unknown,
            last_check: None,
            response_time_ms: 0,
            error_rate: 0.0,
            consecutive_failures: 0,
            uptime_pct: 100.0,
            total_checks: 0,
            last_error: None,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Health monitor tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthSettings {
    pub interval: Duration,
    pub probe_timeout: Duration,
    /// Consecutive failures that mark a service unhealthy
    pub unhealthy_threshold: u32,
    /// Successful probes slower than this mark the service degraded
    pub slow_threshold: Option<Duration>,
    /// Probes considered for `error_rate`
    pub window: usize,
    /// Poll interval used by `wait_for_healthy`
    pub poll_interval: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            unhealthy_threshold: 3,
            slow_threshold: Some(Duration::from_secs(5)),
            window: 20,
            poll_interval: Duration::from_secs(5),
        }
    }
}

#[derive(Debug)]
struct ServiceRecord {
    health: ServiceHealth,
    window: VecDeque<bool>,
    successes: u64,
}

impl ServiceRecord {
    fn new(service: &str) -> Self {
        Self {
            health: ServiceHealth::unknown(service),
            window: VecDeque::new(),
            successes: 0,
        }
    }

    fn apply(&mut self, result: &ProbeResult, elapsed: Duration, settings: &HealthSettings) {
        let response_time_ms = result
            .response_time_ms
            .unwrap_or_else(|| elapsed.as_millis() as u64);

        self.window.push_back(result.healthy);
        while self.window.len() > settings.window.max(1) {
            self.window.pop_front();
        }

        let health = &mut self.health;
        health.total_checks += 1;
        health.last_check = Some(Utc::now());
        health.response_time_ms = response_time_ms;

        if result.healthy {
            self.successes += 1;
            health.consecutive_failures = 0;
            health.last_error = None;
            let slow = settings
                .slow_threshold
                .map(|t| response_time_ms > t.as_millis() as u64)
                .unwrap_or(false);
            health.status = if slow {
                HealthStatus::Degraded
            } else {
                HealthStatus::Healthy
            };
        } else {
            health.consecutive_failures += 1;
            health.last_error = result.detail.clone();
            health.status = if health.consecutive_failures >= settings.unhealthy_threshold {
                HealthStatus::Unhealthy
            } else {
                HealthStatus::Degraded
            };
        }

        let failures = self.window.iter().filter(|ok| !**ok).count();
        health.error_rate = failures as f64 / self.window.len() as f64;
        health.uptime_pct = self.successes as f64 / health.total_checks as f64 * 100.0;
    }
}

/// Health monitor for running periodic probes against named services
pub struct HealthMonitor {
    settings: HealthSettings,
    probes: RwLock<HashMap<String, Arc<dyn HealthCheck>>>,
    records: RwLock<HashMap<String, Arc<Mutex<ServiceRecord>>>>,
    tasks: Mutex<HashMap<String, RepeatingTask>>,
}

impl HealthMonitor {
    pub fn new(settings: HealthSettings) -> Self {
        Self {
            settings,
            probes: RwLock::new(HashMap::new()),
            records: RwLock::new(HashMap::new()),
            tasks: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> &HealthSettings {
        &self.settings
    }

    /// Register (or replace) the probe for a service.
    pub fn register(&self, service: impl Into<String>, probe: Arc<dyn HealthCheck>) {
        let service = service.into();
        self.probes.write().insert(service.clone(), probe);
        self.records
            .write()
            .entry(service.clone())
            .or_insert_with(|| Arc::new(Mutex::new(ServiceRecord::new(&service))));
        debug!(service = %service, "Health probe registered");
    }

    /// Remove a service and stop its background probe.
    pub fn unregister(&self, service: &str) -> bool {
        self.tasks.lock().remove(service);
        self.records.write().remove(service);
        self.probes.write().remove(service).is_some()
    }

    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.probes.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_probe(&self, service: &str) -> bool {
        self.probes.read().contains_key(service)
    }

    fn record(&self, service: &str) -> Option<Arc<Mutex<ServiceRecord>>> {
        self.records.read().get(service).cloned()
    }

    /// Probe one service now. `None` if no probe is registered.
    pub async fn check_service(&self, service: &str) -> Option<ServiceHealth> {
        let probe = self.probes.read().get(service).cloned()?;
        let record = self.record(service)?;

        let start = Instant::now();
        let result = match tokio::time::timeout(self.settings.probe_timeout, probe.check()).await {
            Ok(result) => result,
            Err(_) => ProbeResult::unhealthy(format!(
                "probe timed out after {}ms",
                self.settings.probe_timeout.as_millis()
            )),
        };
        let elapsed = start.elapsed();

        let health = {
            let mut record = record.lock();
            let previous = record.health.status;
            record.apply(&result, elapsed, &self.settings);
            let health = record.health.clone();
            if previous != health.status {
                log_transition(&health, previous);
            }
            health
        };

        metrics::increment_counter!(
            "opsmend_health_probes_total",
            "service" => service.to_string(),
            "outcome" => if result.healthy { "healthy" } else { "unhealthy" }
        );
        Some(health)
    }

    /// Probe every registered service once.
    pub async fn check_all(&self) -> Vec<ServiceHealth> {
        let services = self.services();
        let checks = services.iter().map(|s| self.check_service(s));
        futures::future::join_all(checks)
            .await
            .into_iter()
            .flatten()
            .collect()
    }

    /// Last recorded health. `None` for services never registered.
    pub fn health(&self, service: &str) -> Option<ServiceHealth> {
        self.record(service).map(|r| r.lock().health.clone())
    }

    pub fn all_health(&self) -> Vec<ServiceHealth> {
        let mut all: Vec<ServiceHealth> = self
            .records
            .read()
            .values()
            .map(|r| r.lock().health.clone())
            .collect();
        all.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        all
    }

    /// Start one background probe loop per registered service. Services
    /// that already have a loop are left alone.
    pub fn start(self: &Arc<Self>) {
        let services = self.services();
        let mut tasks = self.tasks.lock();
        for service in services {
            if tasks.contains_key(&service) {
                continue;
            }
            let monitor = Arc::downgrade(self);
            let name = service.clone();
            let task = RepeatingTask::spawn(
                format!("health:{}", service),
                self.settings.interval,
                move || {
                    let monitor = monitor.clone();
                    let name = name.clone();
                    async move {
                        if let Some(monitor) = monitor.upgrade() {
                            monitor.check_service(&name).await;
                        }
                    }
                },
            );
            tasks.insert(service, task);
        }
        info!(services = tasks.len(), "Health monitoring started");
    }

    /// Stop every background probe loop.
    pub async fn stop(&self) {
        let tasks: Vec<RepeatingTask> = self.tasks.lock().drain().map(|(_, t)| t).collect();
        for task in tasks {
            task.shutdown().await;
        }
        info!("Health monitoring stopped");
    }

    pub fn is_running(&self) -> bool {
        self.tasks.lock().values().any(|t| t.is_running())
    }

    /// Poll the service until it reports healthy or `timeout` elapses.
    pub async fn wait_for_healthy(
        &self,
        service: &str,
        timeout: Duration,
        token: &CancellationToken,
    ) -> Result<ServiceHealth, RecoveryError> {
        let deadline = Instant::now() + timeout;
        loop {
            token.check()?;
            let health = self.check_service(service).await.ok_or_else(|| {
                RecoveryError::StrategyUnavailable {
                    service: service.to_string(),
                    strategy: "healthCheckRecovery".to_string(),
                    reason: "no health probe registered".to_string(),
                }
            })?;
            if health.is_healthy() {
                return Ok(health);
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(RecoveryError::HealthTimeout {
                    service: service.to_string(),
                    waited: timeout,
                });
            }
            let pause = self.settings.poll_interval.min(deadline - now);
            sleep_or_cancel(pause, token).await?;
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("settings", &self.settings)
            .field("services", &self.services())
            .finish()
    }
}

fn log_transition(health: &ServiceHealth, previous: HealthStatus) {
    match health.status {
        HealthStatus::Healthy => info!(
            service = %health.service_name,
            from = previous.as_str(),
            "Service healthy"
        ),
        HealthStatus::Degraded => warn!(
            service = %health.service_name,
            failures = health.consecutive_failures,
            "Service degraded"
        ),
        HealthStatus::Unhealthy => error!(
            service = %health.service_name,
            failures = health.consecutive_failures,
            reason = %safe_message(health.last_error.as_deref().unwrap_or("-")),
            "Service unhealthy"
        ),
        HealthStatus::Unknown => {}
    }
}
