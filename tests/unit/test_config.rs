//! Config files driving a running engine

use opsmend::config::Config;
use opsmend::engine::Engine;
use opsmend::errors::ConfigError;
use opsmend::recovery::{RecoveryOptions, RecoveryStrategy, Target};
use opsmend::supervision::CircuitState;
use opsmend::RecoveryError;
use std::fs;
use tempfile::TempDir;

fn load(content: &str) -> Result<Config, ConfigError> {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("opsmend.toml");
    fs::write(&path, content).unwrap();
    Config::load(Some(&path))
}

#[tokio::test(start_paused = true)]
async fn test_file_thresholds_reach_the_breakers() {
    let config = load(
        r#"
        [recovery]
        circuitBreakerThreshold = 2
        circuitBreakerTimeoutMs = 5000
        enabledStrategies = ["circuitBreaker", "gracefulDegradation"]
        "#,
    )
    .unwrap();
    let engine = Engine::new(config).unwrap();

    for _ in 0..2 {
        let result = engine
            .orchestrator()
            .attempt_recovery(
                "crm",
                |_t: Target| async { Err::<(), _>(anyhow::anyhow!("ECONNREFUSED")) },
                &anyhow::anyhow!("ECONNREFUSED"),
                RecoveryOptions::default(),
            )
            .await;
        assert!(matches!(result, Err(RecoveryError::Exhausted { .. })));
    }
    assert_eq!(engine.orchestrator().circuit_state("crm"), Some(CircuitState::Open));
}

#[test]
fn test_file_source_is_recorded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("custom.toml");
    fs::write(&path, "[logging]\njson = true\n").unwrap();

    let config = Config::load(Some(&path)).unwrap();
    assert_eq!(config.source.as_deref(), Some(path.as_path()));
    assert!(config.logging.json);
}

#[test]
fn test_disabled_strategies_are_filtered() {
    let config = load(
        r#"
        [recovery]
        enabled_strategies = ["exponentialBackoff", "gracefulDegradation"]
        "#,
    )
    .unwrap();
    let recovery = config.recovery_config().unwrap();
    assert!(recovery.is_enabled(RecoveryStrategy::ExponentialBackoff));
    assert!(!recovery.is_enabled(RecoveryStrategy::CircuitBreaker));
}

#[test]
fn test_invalid_files_are_rejected() {
    assert!(matches!(load("[recovery]\nmax_retries = 0\n"), Err(ConfigError::Invalid { .. })));
    assert!(matches!(
        load("[recovery]\nbase_delay_ms = 90000\n"),
        Err(ConfigError::Invalid { .. })
    ));
    assert!(matches!(
        load("[recovery]\nenabled_strategies = [\"pray\"]\n"),
        Err(ConfigError::UnknownStrategy(name)) if name == "pray"
    ));
    assert!(matches!(load("[recovery\n"), Err(ConfigError::Parse(_))));
}

#[test]
fn test_env_overrides_beat_file_values() {
    let mut config = Config::from_toml_str("[recovery]\nmax_retries = 2\n").unwrap();
    config
        .apply_env_overrides(|key| match key {
            "OPSMEND_MAX_RETRIES" => Some("6".to_string()),
            "OPSMEND_ENABLED_STRATEGIES" => Some("failover, gracefulDegradation".to_string()),
            _ => None,
        })
        .unwrap();
    assert_eq!(config.recovery.max_retries, 6);
    assert_eq!(
        config.recovery_config().unwrap().enabled_strategies,
        vec![RecoveryStrategy::Failover, RecoveryStrategy::GracefulDegradation]
    );
}

#[test]
fn test_engine_rejects_invalid_config() {
    let mut config = Config::default();
    config.classifier.min_confidence = 2.0;
    assert!(Engine::new(config).is_err());
}

#[test]
fn test_oversized_retention_is_a_config_error() {
    let mut config = Config::default();
    config.classifier.retention_hours = 3_000_000_000_000_000;
    assert!(matches!(Engine::new(config), Err(_)));

    assert!(matches!(
        load("[classifier]\nretention_hours = 9000\n"),
        Err(ConfigError::Invalid { field, .. }) if field == "classifier.retention_hours"
    ));
    assert!(matches!(
        load("[classifier]\ntrend_window_secs = 0\n"),
        Err(ConfigError::Invalid { .. })
    ));
}
