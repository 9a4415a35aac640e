//! Classifier behaviour: patterns, statistics and alerting

use chrono::Utc;
use opsmend::alerts::{AlertKind, CollectingAlertSink};
use opsmend::classifier::{
    ClassifierSettings, ErrorClassifier, ErrorContext, ErrorInfo, ErrorPattern, ErrorType,
    Severity, StatusMatcher, Trend,
};
use opsmend::errors::ClassifierError;
use opsmend::Classify;
use proptest::prelude::*;
use std::sync::Arc;

fn classifier() -> ErrorClassifier {
    ErrorClassifier::new(ClassifierSettings::default())
}

fn classify(c: &ErrorClassifier, message: &str) -> opsmend::ErrorClassification {
    c.classify(&ErrorInfo::new(message), &ErrorContext::default())
}

#[test]
fn test_builtin_types() {
    let c = classifier();
    let cases = [
        ("read ECONNRESET", ErrorType::Network),
        ("request timed out after 30s", ErrorType::Network),
        ("deadlock detected", ErrorType::Database),
        ("duplicate key value violates unique constraint", ErrorType::DataIntegrity),
        ("jwt expired", ErrorType::Authentication),
        ("access denied", ErrorType::Authorization),
        ("email is required", ErrorType::Validation),
        ("no such campaign", ErrorType::NotFound),
        ("JavaScript heap out of memory", ErrorType::MemoryLeak),
        ("n8n workflow execution failed", ErrorType::WorkflowExecution),
        ("missing environment variable STRIPE_URL", ErrorType::Configuration),
    ];
    for (message, expected) in cases {
        assert_eq!(classify(&c, message).error_type, expected, "message: {}", message);
    }
}

#[test]
fn test_unknown_error_uses_heuristics() {
    let c = classifier();
    let result = classify(&c, "critical failure in the flux capacitor");
    assert_eq!(result.error_type, ErrorType::Internal);
    assert_eq!(result.severity, Severity::Critical);
    assert!(result.has_tag("heuristic"));
    assert!(result.confidence <= 0.5);
}

#[test]
fn test_status_boost_for_api_patterns() {
    let c = classifier();
    let plain = classify(&c, "internal server error");
    let with_status = c.classify(
        &ErrorInfo::new("internal server error").with_status(500),
        &ErrorContext::default(),
    );
    assert!((plain.confidence - 0.6).abs() < 1e-9);
    assert!((with_status.confidence - 0.72).abs() < 1e-9);
}

#[test]
fn test_status_only_match() {
    let c = classifier();
    let result = c.classify(
        &ErrorInfo::new("upstream said no").with_status(404),
        &ErrorContext::default(),
    );
    assert_eq!(result.error_type, ErrorType::NotFound);
    assert_eq!(result.status, Some(404));
}

#[test]
fn test_custom_pattern_lifecycle() {
    let c = classifier();
    let billing = ErrorType::Custom("billing".to_string());
    let pattern = ErrorPattern::regex("card_declined", r"card (was )?declined", billing.clone(), Severity::High, 0.97)
        .unwrap()
        .with_tags(&["billing", "payments"])
        .auto_recoverable(false);
    c.register_pattern(pattern).unwrap();

    let result = classify(&c, "Card declined by issuer");
    assert_eq!(result.error_type, billing);
    assert!(result.has_tag("payments"));
    assert!(!result.auto_recoverable);
    assert!(c.patterns().iter().any(|p| p.id == "card_declined"));

    let duplicate = ErrorPattern::regex("card_declined", "x", ErrorType::Internal, Severity::Low, 0.5).unwrap();
    assert!(matches!(
        c.register_pattern(duplicate),
        Err(ClassifierError::DuplicatePattern(id)) if id == "card_declined"
    ));

    assert!(c.remove_pattern("card_declined"));
    assert!(!c.remove_pattern("card_declined"));
    assert_ne!(classify(&c, "Card declined by issuer").error_type, billing);
}

#[test]
fn test_ties_go_to_earliest_registered() {
    let c = ErrorClassifier::with_patterns(ClassifierSettings::default(), Vec::new());
    c.register_pattern(
        ErrorPattern::new(
            "first",
            Box::new(StatusMatcher::new(&[418])),
            ErrorType::Custom("first".into()),
            Severity::Low,
            0.8,
        ),
    )
    .unwrap();
    c.register_pattern(
        ErrorPattern::new(
            "second",
            Box::new(StatusMatcher::new(&[418])),
            ErrorType::Custom("second".into()),
            Severity::Low,
            0.8,
        ),
    )
    .unwrap();

    let result = c.classify(&ErrorInfo::new("teapot").with_status(418), &ErrorContext::default());
    assert_eq!(result.error_type, ErrorType::Custom("first".into()));
    assert_eq!(result.matched_patterns, vec!["first", "second"]);
}

#[test]
fn test_security_critical_alerts() {
    let sink = Arc::new(CollectingAlertSink::new());
    let c = classifier().with_alert_sink(sink.clone());

    let result = classify(&c, "possible sql injection attempt in search param");
    assert_eq!(result.error_type, ErrorType::SuspiciousActivity);
    assert!(result.is_security_critical());

    let alerts = sink.alerts();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, AlertKind::SecurityCritical);
    assert_eq!(alerts[0].error_id.as_deref(), Some(result.error_id.as_str()));

    // Ordinary failures stay quiet
    classify(&c, "ECONNRESET");
    assert_eq!(sink.len(), 1);
}

#[test]
fn test_spike_raises_anomaly_alert() {
    let sink = Arc::new(CollectingAlertSink::new());
    let c = classifier().with_alert_sink(sink.clone());
    for _ in 0..12 {
        classify(&c, "socket hang up");
    }

    let reports = c.analyze_trends_at(Utc::now());
    let network = reports.iter().find(|r| r.error_type == ErrorType::Network).unwrap();
    assert_eq!(network.recent_count, 12);
    assert!(network.anomaly);
    assert_eq!(network.trend, Trend::Increasing);
    assert!(sink.alerts().iter().any(|a| a.kind == AlertKind::Anomaly));

    let stats = c.error_statistics();
    assert_eq!(stats[0].error_type, ErrorType::Network);
    assert_eq!(stats[0].total, 12);
    assert!(stats[0].anomaly);
}

#[test]
fn test_prune_drops_expired_records() {
    let c = classifier();
    classify(&c, "deadlock detected");
    assert_eq!(c.prune_at(Utc::now()), 0);
    assert_eq!(c.prune_at(Utc::now() + chrono::Duration::hours(25)), 1);
    assert_eq!(c.stats().frequency(&ErrorType::Database), 1);
    assert!(c.stats().recent(&ErrorType::Database).is_empty());
}

#[test]
fn test_prune_forgets_custom_types_with_no_records() {
    let c = classifier();
    let onboarding = ErrorType::Custom("onboarding".to_string());
    c.register_pattern(
        ErrorPattern::regex("onboarding_stuck", r"onboarding stuck", onboarding.clone(), Severity::Low, 0.9)
            .unwrap(),
    )
    .unwrap();
    classify(&c, "onboarding stuck at step 3");
    classify(&c, "deadlock detected");
    assert!(c.error_statistics().iter().any(|s| s.error_type == onboarding));

    assert_eq!(c.prune_at(Utc::now() + chrono::Duration::hours(25)), 2);
    let stats = c.error_statistics();
    assert!(stats.iter().all(|s| s.error_type != onboarding));
    assert!(stats.iter().any(|s| s.error_type == ErrorType::Database));
    assert_eq!(c.stats().frequency(&onboarding), 0);
}

proptest! {
    #[test]
    fn prop_classification_is_deterministic(message in ".{0,80}", status in proptest::option::of(100u16..600)) {
        let c = classifier();
        let mut info = ErrorInfo::new(message);
        if let Some(s) = status {
            info = info.with_status(s);
        }
        let a = c.classify(&info, &ErrorContext::default());
        let b = c.classify(&info, &ErrorContext::default());
        prop_assert_eq!(&a.error_type, &b.error_type);
        prop_assert_eq!(a.severity, b.severity);
        prop_assert_eq!(&a.tags, &b.tags);
        prop_assert_eq!(&a.error_id, &b.error_id);
        prop_assert!((0.0..=1.0).contains(&a.confidence));
    }
}
