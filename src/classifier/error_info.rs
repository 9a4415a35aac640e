//! Normalized error shape consumed by the classifier
//!
//! Errors arrive from many places (I/O, upstream HTTP clients, the crate's own
//! recovery layer). They are converted once into [`ErrorInfo`]; everything
//! downstream works on this type only.

use crate::errors::{OpsmendError, RecoveryError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;

/// Structured view of a failure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Error kind name (`"IoError"`, `"UpstreamError"`, ...)
    pub name: String,
    pub message: String,
    /// Machine code such as `ECONNREFUSED`
    pub code: Option<String>,
    /// HTTP-like status when the failure came from an upstream API
    pub status: Option<u16>,
    /// Cause chain, one cause per line
    pub stack: Option<String>,
    /// Upstream `retry-after` hint in seconds
    pub retry_after_secs: Option<u64>,
}

impl ErrorInfo {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            name: "Error".to_string(),
            message: message.into(),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_stack(mut self, stack: impl Into<String>) -> Self {
        self.stack = Some(stack.into());
        self
    }

    pub fn with_retry_after_secs(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }

    /// Text the pattern matchers run against: message, stack and name.
    pub fn match_text(&self) -> String {
        let mut text = String::with_capacity(
            self.message.len() + self.name.len() + self.stack.as_ref().map_or(0, |s| s.len()) + 2,
        );
        text.push_str(&self.message);
        if let Some(stack) = &self.stack {
            text.push(' ');
            text.push_str(stack);
        }
        text.push(' ');
        text.push_str(&self.name);
        if let Some(code) = &self.code {
            text.push(' ');
            text.push_str(code);
        }
        text
    }

    /// Build from an `anyhow` error, downcasting to the error types that carry
    /// structured fields.
    pub fn from_anyhow(err: &anyhow::Error) -> Self {
        let mut info = if let Some(upstream) = err.downcast_ref::<UpstreamError>() {
            ErrorInfo::from(upstream)
        } else if let Some(io_err) = err.downcast_ref::<io::Error>() {
            ErrorInfo::from(io_err)
        } else if let Some(recovery) = err.downcast_ref::<RecoveryError>() {
            ErrorInfo::from(recovery)
        } else if let Some(opsmend) = err.downcast_ref::<OpsmendError>() {
            ErrorInfo::from(opsmend)
        } else {
            ErrorInfo::new(err.to_string())
        };
        // downcast_ref sees through context wrappers; keep the outermost message
        info.message = err.to_string();

        let causes: Vec<String> = err.chain().skip(1).map(|c| c.to_string()).collect();
        if !causes.is_empty() {
            info.stack = Some(causes.join("\n"));
            // Look for structured causes below a context wrapper
            if info.status.is_none() && info.code.is_none() {
                for cause in err.chain().skip(1) {
                    if let Some(upstream) = cause.downcast_ref::<UpstreamError>() {
                        info.status = Some(upstream.status);
                        info.retry_after_secs = upstream.retry_after_secs;
                        break;
                    }
                    if let Some(io_err) = cause.downcast_ref::<io::Error>() {
                        info.code = io_error_code(io_err.kind()).map(str::to_string);
                        break;
                    }
                }
            }
        }
        info
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({}): {}", self.name, status, self.message),
            None => write!(f, "{}: {}", self.name, self.message),
        }
    }
}

impl From<&anyhow::Error> for ErrorInfo {
    fn from(err: &anyhow::Error) -> Self {
        ErrorInfo::from_anyhow(err)
    }
}

impl From<&io::Error> for ErrorInfo {
    fn from(err: &io::Error) -> Self {
        let mut info = ErrorInfo::new(err.to_string()).with_name("IoError");
        info.code = io_error_code(err.kind()).map(str::to_string);
        info
    }
}

impl From<&RecoveryError> for ErrorInfo {
    fn from(err: &RecoveryError) -> Self {
        let info = ErrorInfo::new(err.to_string()).with_name("RecoveryError");
        match err {
            RecoveryError::CircuitOpen { .. } => info.with_code("CIRCUIT_OPEN").with_status(503),
            RecoveryError::HealthTimeout { .. } => info.with_code("ETIMEDOUT"),
            RecoveryError::Cancelled => info.with_code("CANCELLED"),
            RecoveryError::Operation(inner) => {
                let mut nested = ErrorInfo::from_anyhow(inner);
                nested.message = err.to_string();
                nested
            }
            _ => info,
        }
    }
}

impl From<&OpsmendError> for ErrorInfo {
    fn from(err: &OpsmendError) -> Self {
        match err {
            OpsmendError::Recovery(inner) => ErrorInfo::from(inner),
            OpsmendError::Other(inner) => ErrorInfo::from_anyhow(inner),
            OpsmendError::Config(_) => {
                ErrorInfo::new(err.to_string()).with_name("ConfigError")
            }
            _ => ErrorInfo::new(err.to_string()).with_name("OpsmendError"),
        }
    }
}

fn io_error_code(kind: io::ErrorKind) -> Option<&'static str> {
    match kind {
        io::ErrorKind::ConnectionRefused => Some("ECONNREFUSED"),
        io::ErrorKind::ConnectionReset => Some("ECONNRESET"),
        io::ErrorKind::ConnectionAborted => Some("ECONNABORTED"),
        io::ErrorKind::TimedOut => Some("ETIMEDOUT"),
        io::ErrorKind::NotFound => Some("ENOENT"),
        io::ErrorKind::PermissionDenied => Some("EACCES"),
        io::ErrorKind::AddrNotAvailable => Some("EADDRNOTAVAIL"),
        io::ErrorKind::BrokenPipe => Some("EPIPE"),
        io::ErrorKind::OutOfMemory => Some("ENOMEM"),
        _ => None,
    }
}

/// A failed call to an upstream HTTP-style API.
///
/// Operations return this (inside `anyhow::Error`) to hand the status code
/// and `retry-after` hint to the classifier.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{message}")]
pub struct UpstreamError {
    pub status: u16,
    pub message: String,
    pub retry_after_secs: Option<u64>,
}

impl UpstreamError {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            retry_after_secs: None,
        }
    }

    pub fn with_retry_after_secs(mut self, secs: u64) -> Self {
        self.retry_after_secs = Some(secs);
        self
    }
}

impl From<&UpstreamError> for ErrorInfo {
    fn from(err: &UpstreamError) -> Self {
        ErrorInfo {
            name: "UpstreamError".to_string(),
            message: err.message.clone(),
            code: None,
            status: Some(err.status),
            stack: None,
            retry_after_secs: err.retry_after_secs,
        }
    }
}

/// Request-side context attached to a classification
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorContext {
    pub user_id: Option<String>,
    pub action: Option<String>,
    pub resource: Option<String>,
    pub endpoint: Option<String>,
    pub service: Option<String>,
}

impl ErrorContext {
    pub fn for_service(service: impl Into<String>) -> Self {
        Self {
            service: Some(service.into()),
            ..Self::default()
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    pub fn with_resource(mut self, resource: impl Into<String>) -> Self {
        self.resource = Some(resource.into());
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}
