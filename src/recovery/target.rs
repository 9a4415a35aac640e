//! Where an operation runs: the primary or a registered secondary

use serde::Serialize;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    Primary,
    Secondary,
}

/// Destination handed to every operation invocation. Operations without a
/// secondary can ignore it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub kind: TargetKind,
    pub name: String,
    /// Optional address (URL, DSN, queue name...) the caller resolves
    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl Target {
    pub fn primary(name: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Primary,
            name: name.into(),
            endpoint: None,
        }
    }

    pub fn secondary(name: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            kind: TargetKind::Secondary,
            name: name.into(),
            endpoint: Some(endpoint.into()),
        }
    }

    pub fn is_secondary(&self) -> bool {
        self.kind == TargetKind::Secondary
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.endpoint {
            Some(endpoint) => write!(f, "{} ({})", self.name, endpoint),
            None => f.write_str(&self.name),
        }
    }
}
