use opsmend::config::Config;
use opsmend::engine::Engine;
use opsmend::supervision::probe_fn;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn test_engine_probes_in_background_until_shutdown() {
    let mut config = Config::default();
    config.recovery.health_check_interval_ms = 20;
    let engine = Engine::new(config).unwrap();

    let probes = Arc::new(AtomicU32::new(0));
    let counter = probes.clone();
    engine.register_health_probe(
        "n8n",
        probe_fn(move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<(), anyhow::Error>(())
            }
        }),
    );

    engine.start();
    assert!(engine.is_running());
    tokio::time::sleep(Duration::from_millis(150)).await;
    engine.shutdown().await;
    assert!(!engine.is_running());

    let seen = probes.load(Ordering::SeqCst);
    assert!(seen >= 2, "only {} probes ran", seen);
    assert!(engine.health().health("n8n").unwrap().is_healthy());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(probes.load(Ordering::SeqCst), seen);
}

#[tokio::test]
async fn test_probe_registered_after_start_is_picked_up() {
    let mut config = Config::default();
    config.recovery.health_check_interval_ms = 20;
    let engine = Engine::new(config).unwrap();
    engine.start();

    engine.register_health_probe(
        "crm",
        probe_fn(|| async { Err::<(), _>(anyhow::anyhow!("down")) }),
    );
    tokio::time::sleep(Duration::from_millis(150)).await;

    let health = engine.health().health("crm").unwrap();
    assert!(health.consecutive_failures >= 3);
    assert!(!health.is_healthy());
    engine.shutdown().await;
}
