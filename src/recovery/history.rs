//! Per-service record of strategy executions

use super::strategy::RecoveryStrategy;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};

/// Attempts kept per service
pub const MAX_ATTEMPTS_PER_SERVICE: usize = 200;

/// One strategy execution
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecoveryAttempt {
    /// Position within its recovery run, starting at 1
    pub attempt_number: u32,
    pub strategy: RecoveryStrategy,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// Append-only attempt history, capped per service
#[derive(Debug, Default)]
pub struct AttemptHistory {
    by_service: Mutex<HashMap<String, VecDeque<RecoveryAttempt>>>,
}

impl AttemptHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, service: &str, attempt: RecoveryAttempt) {
        let mut by_service = self.by_service.lock();
        let attempts = by_service.entry(service.to_string()).or_default();
        attempts.push_back(attempt);
        while attempts.len() > MAX_ATTEMPTS_PER_SERVICE {
            attempts.pop_front();
        }
    }

    /// Attempts for one service, oldest first.
    pub fn for_service(&self, service: &str) -> Vec<RecoveryAttempt> {
        self.by_service
            .lock()
            .get(service)
            .map(|a| a.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn services(&self) -> Vec<String> {
        self.by_service.lock().keys().cloned().collect()
    }

    pub fn total(&self) -> usize {
        self.by_service.lock().values().map(|a| a.len()).sum()
    }
}
