//! Unit tests for opsmend modules
//!
//! These tests drive the public API end to end without network I/O. Timing
//! sensitive tests run on tokio's paused clock.

mod test_classifier;
mod test_config;
mod test_middleware;
mod test_orchestrator;
mod test_scenarios;
