//! Observability module
//!
//! Tracing subscriber setup and the log-hygiene helpers applied to every
//! error message before it is logged or rendered.

pub mod telemetry;
