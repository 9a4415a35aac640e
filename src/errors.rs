use std::time::Duration;
use thiserror::Error;

/// The central error type for opsmend.
///
/// Every fallible public API returns this (or one of the nested enums), so
/// callers can match on the failure class instead of parsing messages.
#[derive(Error, Debug)]
pub enum OpsmendError {
    #[error("Recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Error, Debug)]
pub enum RecoveryError {
    #[error("Circuit breaker is open for service '{service}'")]
    CircuitOpen { service: String },

    #[error("All {attempted} recovery strategies failed for service '{service}': {last_error}")]
    Exhausted {
        service: String,
        attempted: usize,
        last_error: String,
    },

    #[error("Service '{service}' did not become healthy within {}ms", .waited.as_millis())]
    HealthTimeout { service: String, waited: Duration },

    #[error("Recovery cancelled")]
    Cancelled,

    #[error("Strategy '{strategy}' unavailable for service '{service}': {reason}")]
    StrategyUnavailable {
        service: String,
        strategy: String,
        reason: String,
    },

    #[error("Operation failed: {0}")]
    Operation(anyhow::Error),

    #[error("Fallback data for service '{service}' could not be decoded: {message}")]
    FallbackDecode { service: String, message: String },
}

impl RecoveryError {
    /// Whether the error came from the breaker rejecting the call.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, RecoveryError::CircuitOpen { .. })
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config from {path}: {message}")]
    Read { path: String, message: String },

    #[error("Failed to parse config: {0}")]
    Parse(String),

    #[error("Invalid value for '{field}': {reason}")]
    Invalid { field: String, reason: String },

    #[error("Unknown recovery strategy '{0}'")]
    UnknownStrategy(String),
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("Pattern '{0}' is already registered")]
    DuplicatePattern(String),

    #[error("Invalid pattern '{id}': {reason}")]
    InvalidPattern { id: String, reason: String },

    #[error("Matcher for pattern '{id}' failed: {reason}")]
    MatcherFailed { id: String, reason: String },
}

pub type Result<T> = std::result::Result<T, OpsmendError>;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_ERROR: u8 = 1;
pub const EXIT_CONFIG_ERROR: u8 = 2;
pub const EXIT_RECOVERY_ERROR: u8 = 3;

/// Determine the appropriate process exit code for an error.
pub fn get_exit_code(e: &anyhow::Error) -> u8 {
    if let Some(err) = e.downcast_ref::<OpsmendError>() {
        return match err {
            OpsmendError::Config(_) => EXIT_CONFIG_ERROR,
            OpsmendError::Recovery(_) => EXIT_RECOVERY_ERROR,
            _ => EXIT_ERROR,
        };
    }

    if e.downcast_ref::<ConfigError>().is_some() {
        return EXIT_CONFIG_ERROR;
    }
    if e.downcast_ref::<RecoveryError>().is_some() {
        return EXIT_RECOVERY_ERROR;
    }

    EXIT_ERROR
}
