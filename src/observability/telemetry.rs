//! Tracing setup and log hygiene
//!
//! Every error message that reaches a log line or a span field goes through
//! [`safe_message`] first: control characters are escaped so a message cannot
//! forge extra log records, and credential-looking substrings are replaced.

use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use tokio::time::Instant;
use tracing::{debug, info_span, warn, Instrument};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REDACTED: &str = "[REDACTED]";

/// Credential shapes seen in upstream error text
const CREDENTIAL_PATTERNS: [&str; 4] = [
    // Prefixed keys (sk-, key-, token-)
    r"(sk-|key-|token-)[A-Za-z0-9_\-]{8,}",
    r"Bearer\s+[A-Za-z0-9_\-\.]{8,}",
    // DSN-style password assignments
    r"(password|passwd|pwd)\s*=\s*\S+",
    // user:pass@ in URLs
    r"://[^/\s:@]+:[^/\s@]+@",
];

/// Escape newlines and other control characters.
pub fn sanitize_for_log(input: &str) -> String {
    input.chars().fold(String::with_capacity(input.len()), |mut acc, c| {
        match c {
            '\n' => acc.push_str("\\n"),
            '\r' => acc.push_str("\\r"),
            '\t' => acc.push_str("\\t"),
            '\x1b' => acc.push_str("\\e"),
            '\x00' => acc.push_str("\\0"),
            c if c.is_control() => acc.push_str(&format!("\\u{:04x}", c as u32)),
            c => acc.push(c),
        }
        acc
    })
}

fn credential_patterns() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        CREDENTIAL_PATTERNS
            .iter()
            .filter_map(|p| RegexBuilder::new(p).case_insensitive(true).build().ok())
            .collect()
    })
}

/// Replace API keys, bearer tokens, DSN passwords and URL credentials with
/// `[REDACTED]`.
pub fn redact_secrets(input: &str) -> String {
    credential_patterns()
        .iter()
        .fold(input.to_string(), |text, re| re.replace_all(&text, REDACTED).into_owned())
}

/// Sanitize then redact.
pub fn safe_message(input: &str) -> String {
    redact_secrets(&sanitize_for_log(input))
}

/// Initialize the global subscriber. `RUST_LOG` wins over `filter`.
///
/// Safe to call more than once; only the first call has an effect.
pub fn init_tracing(filter: &str, json: bool) {
    use std::sync::Once;
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let directive = std::env::var("RUST_LOG").unwrap_or_else(|_| filter.to_string());
        let filter_layer =
            EnvFilter::try_new(&directive).unwrap_or_else(|_| EnvFilter::new("warn"));

        let registry = tracing_subscriber::registry().with(filter_layer);
        let result = if json {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_current_span(false)
                        .with_writer(std::io::stderr),
                )
                .try_init()
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(false)
                        .with_thread_ids(false)
                        .with_level(true)
                        .compact()
                        .with_writer(std::io::stderr),
                )
                .try_init()
        };
        if result.is_err() {
            // Someone else installed a subscriber first; keep theirs
            warn!("Tracing subscriber already installed");
        }
    });
}

/// Run one recovery strategy inside a span that records its duration and
/// outcome. Returns the result together with the elapsed milliseconds.
pub async fn track_strategy<F, Fut, T, E>(service: &str, strategy: &str, f: F) -> (Result<T, E>, u64)
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let started = Instant::now();
    let span = info_span!(
        "recovery.strategy",
        service = %sanitize_for_log(service),
        strategy = strategy,
        duration_ms = tracing::field::Empty,
        success = tracing::field::Empty,
    );

    let result = f().instrument(span.clone()).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    span.record("duration_ms", elapsed_ms);
    span.record("success", result.is_ok());
    if let Err(e) = &result {
        span.in_scope(|| debug!(error = %safe_message(&e.to_string()), "Strategy failed"));
    }
    (result, elapsed_ms)
}
