//! Recovery orchestrator behaviour through the Engine

use opsmend::config::Config;
use opsmend::engine::Engine;
use opsmend::recovery::{
    cleanup_fn, RecoveryConfig, RecoveryMetrics, RecoveryOptions, RecoveryStrategy, StaticFallback,
    Target,
};
use opsmend::supervision::probe_fn;
use opsmend::RecoveryError;
use serde_json::json;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn engine() -> Engine {
    Engine::new(Config::default()).unwrap()
}

fn only(strategies: &[RecoveryStrategy]) -> RecoveryConfig {
    RecoveryConfig {
        enabled_strategies: strategies.to_vec(),
        ..RecoveryConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_backoff_attempts_never_exceed_max_retries() {
    let engine = engine();
    for max_retries in 1..=6u32 {
        let calls = AtomicU32::new(0);
        let config = RecoveryConfig {
            max_retries,
            ..only(&[RecoveryStrategy::ExponentialBackoff])
        };
        let result = engine
            .orchestrator()
            .attempt_recovery(
                "warehouse",
                |_t: Target| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>(anyhow::anyhow!("connection pool exhausted")) }
                },
                &anyhow::anyhow!("connection pool exhausted"),
                RecoveryOptions::default().with_config(config),
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), max_retries);
    }
}

#[tokio::test(start_paused = true)]
async fn test_health_check_recovery_waits_for_service() {
    let engine = engine();
    let up = Arc::new(AtomicBool::new(false));
    let flag = up.clone();
    engine.register_health_probe(
        "auth",
        probe_fn(move || {
            let flag = flag.clone();
            async move {
                if flag.load(Ordering::SeqCst) {
                    Ok(())
                } else {
                    Err(anyhow::anyhow!("auth service down"))
                }
            }
        }),
    );

    let switch = up.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(12)).await;
        switch.store(true, Ordering::SeqCst);
    });

    let config = only(&[RecoveryStrategy::HealthCheckRecovery]);
    let outcome = engine
        .orchestrator()
        .attempt_recovery(
            "auth",
            |_t| async { Ok::<String, anyhow::Error>("session".to_string()) },
            &anyhow::anyhow!("401 unauthorized: token expired"),
            RecoveryOptions::default().with_config(config),
        )
        .await
        .unwrap();
    assert_eq!(outcome.strategy, Some(RecoveryStrategy::HealthCheckRecovery));
    assert!(engine.health().health("auth").unwrap().is_healthy());
}

#[tokio::test(start_paused = true)]
async fn test_health_check_recovery_times_out() {
    let engine = engine();
    engine.register_health_probe(
        "auth",
        probe_fn(|| async { Err::<(), _>(anyhow::anyhow!("still down")) }),
    );
    let config = RecoveryConfig {
        health_wait_timeout: Duration::from_secs(10),
        ..only(&[RecoveryStrategy::HealthCheckRecovery])
    };
    let result = engine
        .orchestrator()
        .attempt_recovery(
            "auth",
            |_t| async { Ok::<u8, anyhow::Error>(1) },
            &anyhow::anyhow!("401 unauthorized"),
            RecoveryOptions::default().with_config(config),
        )
        .await;
    assert!(matches!(result, Err(RecoveryError::Exhausted { .. })));
    let attempts = engine.orchestrator().history().for_service("auth");
    let waited = attempts
        .iter()
        .find(|a| a.strategy == RecoveryStrategy::HealthCheckRecovery)
        .unwrap();
    assert!(!waited.success);
    assert!(waited.error.as_deref().unwrap().contains("did not become healthy"));
}

#[tokio::test(start_paused = true)]
async fn test_resource_cleanup_runs_hook_before_retry() {
    let engine = engine();
    let cleaned = Arc::new(AtomicBool::new(false));
    let flag = cleaned.clone();
    engine.register_cleanup(
        "db",
        cleanup_fn(move |_service| {
            let flag = flag.clone();
            async move {
                flag.store(true, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        }),
    );

    let seen = cleaned.clone();
    let config = only(&[RecoveryStrategy::ResourceCleanup]);
    let outcome = engine
        .orchestrator()
        .attempt_recovery(
            "db",
            move |_t| {
                let ready = seen.load(Ordering::SeqCst);
                async move {
                    if ready {
                        Ok(5u32)
                    } else {
                        Err(anyhow::anyhow!("too many connections"))
                    }
                }
            },
            &anyhow::anyhow!("database error: too many connections"),
            RecoveryOptions::default().with_config(config),
        )
        .await
        .unwrap();
    assert_eq!(outcome.value, 5);
    assert_eq!(outcome.strategy, Some(RecoveryStrategy::ResourceCleanup));
}

#[tokio::test]
async fn test_registered_default_serves_degraded_value() {
    let engine = engine();
    engine.register_fallback("crm", Arc::new(StaticFallback::new(json!({"contacts": []}))));

    let outcome = engine
        .orchestrator()
        .execute(
            "crm",
            |_t| async { Err::<serde_json::Value, _>(anyhow::anyhow!("403 forbidden")) },
            RecoveryOptions::default(),
        )
        .await
        .unwrap();
    assert!(outcome.degraded);
    assert_eq!(outcome.strategy, Some(RecoveryStrategy::GracefulDegradation));
    assert_eq!(outcome.value, json!({"contacts": []}));
}

#[tokio::test]
async fn test_config_swap_does_not_affect_snapshot_holders() {
    let engine = engine();
    let before = engine.orchestrator().config();
    engine
        .orchestrator()
        .update_config(RecoveryConfig {
            max_retries: 9,
            ..RecoveryConfig::default()
        })
        .unwrap();
    assert_eq!(before.max_retries, 3);
    assert_eq!(engine.orchestrator().config().max_retries, 9);
}

#[tokio::test]
async fn test_aggregate_metrics() {
    let engine = engine();
    engine.register_health_probe("crm", probe_fn(|| async { Ok::<(), anyhow::Error>(()) }));
    engine.register_health_probe(
        "ads",
        probe_fn(|| async { Err::<(), _>(anyhow::anyhow!("down")) }),
    );
    for _ in 0..3 {
        engine.health().check_all().await;
    }

    let breaker = engine.breakers().get("payments");
    for _ in 0..5 {
        let _ = breaker
            .call(|| async { Err::<(), _>(anyhow::anyhow!("refused")) })
            .await;
    }

    let _ = engine
        .orchestrator()
        .attempt_recovery(
            "crm",
            |_t| async { Ok::<u8, anyhow::Error>(1) },
            &anyhow::anyhow!("unexpected error"),
            RecoveryOptions::default(),
        )
        .await;

    match engine.orchestrator().recovery_metrics(None) {
        RecoveryMetrics::Aggregate(m) => {
            assert_eq!(m.total_services, 3);
            assert_eq!(m.healthy_services, 1);
            assert_eq!(m.unhealthy_services, 1);
            assert_eq!(m.circuit_breakers_open, 1);
            assert_eq!(m.total_recovery_attempts, 1);
        }
        other => panic!("unexpected metrics {:?}", other),
    }

    let json = serde_json::to_value(engine.orchestrator().recovery_metrics(Some("payments"))).unwrap();
    assert_eq!(json["circuitBreakerState"]["state"], "OPEN");
    assert!(json["recoveryAttempts"].as_array().unwrap().is_empty());
}
