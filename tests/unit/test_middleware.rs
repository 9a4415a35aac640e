//! Boundary responses rendered through a full Engine

use opsmend::classifier::{ErrorContext, ErrorInfo, ErrorType, UpstreamError};
use opsmend::config::Config;
use opsmend::engine::Engine;
use opsmend::recovery::{RecoveryOptions, StaticFallback};
use opsmend::supervision::CircuitState;
use serde_json::json;
use std::sync::Arc;

fn engine_with(config: Config) -> Engine {
    Engine::new(config).unwrap()
}

#[tokio::test]
async fn test_status_codes_per_type() {
    let engine = engine_with(Config::default());
    let mw = engine.middleware();
    let cases = [
        ("401 Unauthorized: jwt expired", 401),
        ("permission denied for resource", 403),
        ("record not found", 404),
        ("connect ECONNREFUSED 127.0.0.1:5432", 502),
        ("deadlock detected in database", 503),
        ("something strange happened", 500),
    ];
    for (message, status) in cases {
        let response = mw.respond_to(&ErrorInfo::new(message), &ErrorContext::default()).await;
        assert_eq!(response.status, status, "message: {}", message);
    }
}

#[tokio::test]
async fn test_messages_are_redacted() {
    let engine = engine_with(Config::default());
    let response = engine
        .middleware()
        .respond(
            &anyhow::anyhow!("upstream rejected api_key sk-abcdefghijklmnop for user"),
            &ErrorContext::default(),
        )
        .await;
    let body = serde_json::to_string(&response.body).unwrap();
    assert!(!body.contains("sk-abcdefghijklmnop"));
    assert!(!body.contains("api_key"));
    assert!(body.contains("[REDACTED]"));
}

#[tokio::test]
async fn test_rate_limit_defaults_retry_after_from_config() {
    let mut config = Config::default();
    config.recovery.rate_limit_delay_ms = 8_000;
    let engine = engine_with(config);
    let response = engine
        .middleware()
        .respond_to(&ErrorInfo::new("quota exceeded"), &ErrorContext::default())
        .await;
    assert_eq!(response.status, 429);
    assert_eq!(response.body.retry_after, Some(8));
}

#[tokio::test]
async fn test_open_circuit_and_fallback_hints() {
    let engine = engine_with(Config::default());
    engine.register_fallback("crm", Arc::new(StaticFallback::new(json!({"contacts": 0}))));

    let breaker = engine.breakers().get("crm");
    for _ in 0..5 {
        let _ = breaker
            .call(|| async { Err::<(), _>(anyhow::anyhow!("refused")) })
            .await;
    }

    let err: anyhow::Error = UpstreamError::new(503, "service unavailable").into();
    let response = engine
        .middleware()
        .respond(&err, &ErrorContext::for_service("crm"))
        .await;

    assert_eq!(response.status, 502);
    assert_eq!(response.body.error_type, ErrorType::Network);
    assert_eq!(response.body.circuit_breaker, Some(CircuitState::Open));
    assert_eq!(response.body.fallback_mode, Some(true));
    assert_eq!(response.body.fallback_data, Some(json!({"contacts": 0})));
    assert_eq!(response.header("X-Fallback-Source"), Some("default"));
}

#[tokio::test]
async fn test_cached_response_is_offered_as_fallback() {
    let engine = engine_with(Config::default());
    engine
        .orchestrator()
        .execute(
            "reports",
            |_t| async { Ok::<_, anyhow::Error>(json!({"rows": 12})) },
            RecoveryOptions::default(),
        )
        .await
        .unwrap();

    let response = engine
        .middleware()
        .respond(&anyhow::anyhow!("socket hang up"), &ErrorContext::for_service("reports"))
        .await;
    assert_eq!(response.body.fallback_data, Some(json!({"rows": 12})));
    assert_eq!(response.header("X-Fallback-Source"), Some("cache"));
}

#[tokio::test]
async fn test_critical_endpoint_from_config() {
    let config = Config::from_toml_str(
        r#"
        [middleware]
        critical_endpoints = ["/api/campaigns"]

        [middleware.critical_fallbacks]
        "/api/campaigns" = { campaigns = [], cached = true }
        "#,
    )
    .unwrap();
    let engine = engine_with(config);

    let context = ErrorContext::default().with_endpoint("/api/campaigns");
    let response = engine
        .middleware()
        .handle(&context, || async {
            Err::<(), _>(anyhow::anyhow!("database connection lost"))
        })
        .await
        .unwrap_err();

    assert_eq!(response.status, 200);
    assert!(response.is_fallback());
    assert_eq!(
        response.body.fallback_data,
        Some(json!({"campaigns": [], "cached": true}))
    );
}

#[tokio::test]
async fn test_error_flag_is_boolean_on_every_response() {
    let config = Config::from_toml_str("[middleware]\ncritical_endpoints = [\"/api/home\"]\n").unwrap();
    let engine = engine_with(config);

    let rejected = engine
        .middleware()
        .respond(&anyhow::anyhow!("validation failed"), &ErrorContext::default())
        .await;
    let degraded = engine
        .middleware()
        .respond(
            &anyhow::anyhow!("socket hang up"),
            &ErrorContext::default().with_endpoint("/api/home"),
        )
        .await;

    assert_eq!(rejected.status, 400);
    assert_eq!(degraded.status, 200);
    for response in [rejected, degraded] {
        let body = serde_json::to_value(&response.body).unwrap();
        assert_eq!(body["error"], json!(true));
        assert!(body["title"].is_string());
    }
}

#[tokio::test]
async fn test_client_errors_never_carry_fallback_data() {
    let engine = engine_with(Config::default());
    engine
        .orchestrator()
        .execute(
            "accounts",
            |_t| async { Ok::<_, anyhow::Error>(json!({"balance": 10})) },
            RecoveryOptions::default(),
        )
        .await
        .unwrap();
    let context = ErrorContext::for_service("accounts");

    for message in ["validation failed: amount is required", "access denied", "jwt expired"] {
        let response = engine
            .middleware()
            .respond(&anyhow::anyhow!(message), &context)
            .await;
        assert!(response.status < 500, "message: {}", message);
        assert!(response.body.fallback_data.is_none(), "message: {}", message);
        assert!(response.body.fallback_mode.is_none());
        assert!(response.header("X-Fallback-Source").is_none());
        let body = serde_json::to_value(&response.body).unwrap();
        assert!(body.get("fallbackData").is_none());
    }

    // The same cached value is still offered for a server-side failure
    let response = engine
        .middleware()
        .respond(&anyhow::anyhow!("socket hang up"), &context)
        .await;
    assert_eq!(response.body.fallback_data, Some(json!({"balance": 10})));
}
