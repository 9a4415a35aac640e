//! Composition root
//!
//! [`Engine`] builds the classifier, breaker registry, health monitor,
//! orchestrator and middleware from one [`Config`] and owns their background
//! jobs. Call sites get `Arc` handles; there are no globals.

use crate::alerts::{AlertSink, TracingAlertSink};
use crate::classifier::{Classify, ErrorClassifier};
use crate::config::Config;
use crate::errors::ConfigError;
use crate::middleware::RecoveryMiddleware;
use crate::recovery::{
    FallbackProvider, RecoveryOrchestrator, ResourceCleanup, ResponseCache, Target,
};
use crate::supervision::{CircuitBreakerRegistry, HealthCheck, HealthMonitor, RepeatingTask};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Engine {
    config: Config,
    classifier: Arc<ErrorClassifier>,
    breakers: Arc<CircuitBreakerRegistry>,
    health: Arc<HealthMonitor>,
    orchestrator: Arc<RecoveryOrchestrator>,
    middleware: Arc<RecoveryMiddleware>,
    maintenance: Mutex<Vec<RepeatingTask>>,
}

impl Engine {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        Self::with_alert_sink(config, Arc::new(TracingAlertSink))
    }

    pub fn with_alert_sink(config: Config, alerts: Arc<dyn AlertSink>) -> Result<Self, ConfigError> {
        config.validate()?;
        let recovery = config.recovery_config()?;

        let classifier =
            Arc::new(ErrorClassifier::new(config.classifier_settings()).with_alert_sink(alerts));
        let breakers = Arc::new(CircuitBreakerRegistry::new(recovery.breaker_config()));
        let health = Arc::new(HealthMonitor::new(config.health_settings()));

        let cache = ResponseCache::new(
            config.recovery.cache_capacity,
            Duration::from_secs(config.recovery.cache_ttl_secs),
        );
        let orchestrator = Arc::new(
            RecoveryOrchestrator::new(
                classifier.clone() as Arc<dyn Classify>,
                breakers.clone(),
                health.clone(),
                recovery,
            )
            .with_response_cache(cache),
        );
        let middleware = Arc::new(
            RecoveryMiddleware::new(
                classifier.clone() as Arc<dyn Classify>,
                config.middleware.clone(),
            )
            .with_orchestrator(orchestrator.clone()),
        );

        Ok(Self {
            config,
            classifier,
            breakers,
            health,
            orchestrator,
            middleware,
            maintenance: Mutex::new(Vec::new()),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn classifier(&self) -> &Arc<ErrorClassifier> {
        &self.classifier
    }

    pub fn breakers(&self) -> &Arc<CircuitBreakerRegistry> {
        &self.breakers
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn orchestrator(&self) -> &Arc<RecoveryOrchestrator> {
        &self.orchestrator
    }

    pub fn middleware(&self) -> &Arc<RecoveryMiddleware> {
        &self.middleware
    }

    /// Register a health probe. If the engine is running the probe loop
    /// starts right away.
    pub fn register_health_probe(&self, service: &str, probe: Arc<dyn HealthCheck>) {
        self.health.register(service, probe);
        if self.is_running() {
            self.health.start();
        }
    }

    pub fn register_fallback(&self, service: &str, provider: Arc<dyn FallbackProvider>) {
        self.orchestrator.register_fallback(service, provider);
    }

    pub fn register_secondary(&self, service: &str, target: Target) {
        self.orchestrator.register_secondary(service, target);
    }

    pub fn register_cleanup(&self, service: &str, hook: Arc<dyn ResourceCleanup>) {
        self.orchestrator.register_cleanup(service, hook);
    }

    /// Start health probes and the classifier's trend and prune jobs.
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut maintenance = self.maintenance.lock();
        if maintenance.is_empty() {
            *maintenance = self.classifier.start_maintenance();
        }
        drop(maintenance);
        self.health.start();
        info!(services = self.health.services().len(), "Engine started");
    }

    pub fn is_running(&self) -> bool {
        self.maintenance.lock().iter().any(|t| t.is_running())
    }

    /// Stop every background job and wait for them to finish.
    pub async fn shutdown(&self) {
        let tasks: Vec<RepeatingTask> = self.maintenance.lock().drain(..).collect();
        for task in tasks {
            task.shutdown().await;
        }
        self.health.stop().await;
        info!("Engine stopped");
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("services", &self.health.services())
            .field("running", &self.is_running())
            .finish()
    }
}
