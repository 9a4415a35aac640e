//! Dependency supervision: circuit breakers, health probes and the
//! cancellable background-task primitives they share

pub mod circuit_breaker;
pub mod health;
pub mod task;

pub use circuit_breaker::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, CircuitBreakerRegistry,
    CircuitBreakerSnapshot, CircuitState,
};
pub use health::{
    probe_fn, FnProbe, HealthCheck, HealthMonitor, HealthSettings, HealthStatus, ProbeResult,
    ServiceHealth,
};
pub use task::{sleep_or_cancel, CancellationToken, RepeatingTask};
