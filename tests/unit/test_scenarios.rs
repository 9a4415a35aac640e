//! Acceptance scenarios
//!
//! - A: circuit opens after repeated ECONNREFUSED, stops all retries while
//!   open and recovers after timeout
//! - B: rate-limit classification and strategy list
//! - C: middleware maps a validation error to 400
//! - D: health probe failure counting

use opsmend::classifier::{ClassifierSettings, ErrorClassifier, ErrorContext, ErrorInfo, ErrorType};
use opsmend::middleware::{MiddlewareSettings, RecoveryMiddleware};
use opsmend::recovery::{
    select_strategies, RecoveryConfig, RecoveryOptions, RecoveryOrchestrator, RecoveryStrategy,
    Target,
};
use opsmend::supervision::{
    CircuitBreakerConfig, CircuitBreakerRegistry, CircuitState, HealthMonitor, HealthSettings,
    HealthStatus, ProbeResult,
};
use opsmend::{Classify, RecoveryError};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn classifier() -> Arc<ErrorClassifier> {
    Arc::new(ErrorClassifier::new(ClassifierSettings::default()))
}

// ============================================================================
// Scenario A
// ============================================================================

#[tokio::test(start_paused = true)]
async fn scenario_a_circuit_opens_after_threshold_failures() {
    let config = RecoveryConfig {
        circuit_breaker_threshold: 3,
        circuit_breaker_timeout: Duration::from_secs(60),
        ..RecoveryConfig::default()
    };
    let orchestrator = RecoveryOrchestrator::new(
        classifier(),
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
        Arc::new(HealthMonitor::new(HealthSettings::default())),
        config,
    );

    let calls = AtomicU32::new(0);
    let refused = || anyhow::anyhow!("connect ECONNREFUSED 10.0.0.7:443");
    let failing = |_t: Target| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(anyhow::anyhow!("connect ECONNREFUSED 10.0.0.7:443")) }
    };

    let plan = select_strategies(
        &classifier().classify(&ErrorInfo::from_anyhow(&refused()), &ErrorContext::default()),
        &orchestrator.config(),
    );
    assert_eq!(
        plan,
        vec![
            RecoveryStrategy::ExponentialBackoff,
            RecoveryStrategy::CircuitBreaker,
            RecoveryStrategy::Failover,
            RecoveryStrategy::GracefulDegradation,
        ]
    );

    // Each run makes three backoff calls and one call through the breaker
    for _ in 0..3 {
        let result = orchestrator
            .attempt_recovery("payments", &failing, &refused(), RecoveryOptions::default())
            .await;
        assert!(matches!(result, Err(RecoveryError::Exhausted { .. })));
    }
    assert_eq!(calls.load(Ordering::SeqCst), 12);
    let breaker = orchestrator.breakers().find("payments").unwrap();
    assert_eq!(breaker.current_state(), CircuitState::Open);

    // While open, no strategy reaches the operation
    let result = orchestrator
        .attempt_recovery("payments", &failing, &refused(), RecoveryOptions::default())
        .await;
    assert!(matches!(result, Err(RecoveryError::Exhausted { .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 12);
    let history = orchestrator.history().for_service("payments");
    let last_run = &history[history.len() - 4..];
    for strategy in [RecoveryStrategy::ExponentialBackoff, RecoveryStrategy::CircuitBreaker] {
        let attempt = last_run.iter().find(|a| a.strategy == strategy).unwrap();
        assert!(attempt.error.as_deref().unwrap().to_lowercase().contains("open"));
    }

    // After the timeout the first retry is the trial call and closes the circuit
    tokio::time::advance(Duration::from_secs(61)).await;
    let outcome = orchestrator
        .attempt_recovery(
            "payments",
            |_t| async { Ok::<u32, anyhow::Error>(7) },
            &refused(),
            RecoveryOptions::default(),
        )
        .await
        .unwrap();
    assert_eq!(outcome.value, 7);
    assert_eq!(outcome.strategy, Some(RecoveryStrategy::ExponentialBackoff));
    assert_eq!(breaker.current_state(), CircuitState::Closed);
    assert_eq!(breaker.snapshot().failure_count, 0);
}

#[tokio::test(start_paused = true)]
async fn scenario_a_failed_trial_reopens_without_further_calls() {
    let config = RecoveryConfig {
        circuit_breaker_threshold: 1,
        circuit_breaker_timeout: Duration::from_secs(30),
        ..RecoveryConfig::default()
    };
    let orchestrator = RecoveryOrchestrator::new(
        classifier(),
        Arc::new(CircuitBreakerRegistry::new(CircuitBreakerConfig::default())),
        Arc::new(HealthMonitor::new(HealthSettings::default())),
        config,
    );
    let calls = AtomicU32::new(0);
    let failing = |_t: Target| {
        calls.fetch_add(1, Ordering::SeqCst);
        async { Err::<u32, _>(anyhow::anyhow!("socket hang up")) }
    };
    let cause = || anyhow::anyhow!("socket hang up");

    let _ = orchestrator
        .attempt_recovery("ledger", &failing, &cause(), RecoveryOptions::default())
        .await;
    let breaker = orchestrator.breakers().find("ledger").unwrap();
    assert_eq!(breaker.current_state(), CircuitState::Open);
    let before = calls.load(Ordering::SeqCst);

    // Only the trial reaches the operation; its failure reopens the circuit
    tokio::time::advance(Duration::from_secs(31)).await;
    let _ = orchestrator
        .attempt_recovery("ledger", &failing, &cause(), RecoveryOptions::default())
        .await;
    assert_eq!(calls.load(Ordering::SeqCst), before + 1);
    assert_eq!(breaker.current_state(), CircuitState::Open);
}

// ============================================================================
// Scenario B
// ============================================================================

#[test]
fn scenario_b_rate_limit_classification() {
    let classifier = classifier();
    let classification = classifier.classify(
        &ErrorInfo::new("429 too many requests"),
        &ErrorContext::for_service("ads-api"),
    );
    assert_eq!(classification.error_type, ErrorType::RateLimit);
    assert!(classification.confidence >= 0.9);

    let strategies = select_strategies(&classification, &RecoveryConfig::default());
    assert_eq!(
        strategies,
        vec![RecoveryStrategy::RateLimitBackoff, RecoveryStrategy::GracefulDegradation]
    );
}

// ============================================================================
// Scenario C
// ============================================================================

#[tokio::test]
async fn scenario_c_validation_error_renders_400() {
    let middleware = RecoveryMiddleware::new(classifier(), MiddlewareSettings::default());
    let response = middleware
        .handle(&ErrorContext::default().with_endpoint("/api/leads"), || async {
            Err::<(), _>(anyhow::anyhow!("Validation failed: email must be a valid address"))
        })
        .await
        .unwrap_err();

    assert_eq!(response.status, 400);
    let body = serde_json::to_value(&response.body).unwrap();
    assert_eq!(body["type"], "validation");
    assert!(body.get("retryAfter").is_none());
}

// ============================================================================
// Scenario D
// ============================================================================

#[tokio::test]
async fn scenario_d_consecutive_failures_and_recovery() {
    struct Toggle(Arc<AtomicBool>);

    #[async_trait::async_trait]
    impl opsmend::supervision::HealthCheck for Toggle {
        async fn check(&self) -> ProbeResult {
            if self.0.load(Ordering::SeqCst) {
                ProbeResult::healthy().with_response_time_ms(5)
            } else {
                ProbeResult::unhealthy("503 from /health")
            }
        }
    }

    let up = Arc::new(AtomicBool::new(false));
    let monitor = HealthMonitor::new(HealthSettings::default());
    monitor.register("n8n", Arc::new(Toggle(up.clone())));

    let health = monitor.check_service("n8n").await.unwrap();
    assert_eq!(health.consecutive_failures, 1);
    assert_ne!(health.status, HealthStatus::Unhealthy);

    monitor.check_service("n8n").await;
    let health = monitor.check_service("n8n").await.unwrap();
    assert_eq!(health.consecutive_failures, 3);
    assert_eq!(health.status, HealthStatus::Unhealthy);

    up.store(true, Ordering::SeqCst);
    let health = monitor.check_service("n8n").await.unwrap();
    assert_eq!(health.consecutive_failures, 0);
    assert_eq!(health.status, HealthStatus::Healthy);
    assert_eq!(monitor.health("n8n").unwrap().total_checks, 4);
}
