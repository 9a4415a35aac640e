//! Integration tests for opsmend
//!
//! Run with: cargo test --features integration
//!
//! These run the real binary and real-time background jobs, so they are
//! slower than the unit suite.

mod cli_tests;
mod lifecycle_tests;
