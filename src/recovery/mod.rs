//! Recovery strategies and the orchestrator that runs them
//!
//! A failed operation is classified, a strategy list is picked for its
//! [`ErrorType`](crate::classifier::ErrorType), and the strategies run in
//! order until one produces a value. `gracefulDegradation` always comes last
//! and serves cached or default data instead of calling the operation.

pub mod cleanup;
pub mod fallback;
pub mod history;
pub mod orchestrator;
pub mod policy;
pub mod strategy;
pub mod target;

pub use cleanup::{cleanup_fn, ResourceCleanup};
pub use fallback::{FallbackData, FallbackProvider, FallbackSource, ResponseCache, StaticFallback};
pub use history::{AttemptHistory, RecoveryAttempt};
pub use orchestrator::{
    AggregateRecoveryMetrics, RecoveryMetrics, RecoveryOptions, RecoveryOrchestrator,
    RecoveryOutcome, ServiceRecoveryMetrics,
};
pub use policy::{BackoffPolicy, RecoveryConfig};
pub use strategy::{retry_allowed, select_strategies, RecoveryStrategy};
pub use target::{Target, TargetKind};
