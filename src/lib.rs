//! opsmend - error detection and automatic recovery
//!
//! Wraps calls to unreliable dependencies (databases, upstream APIs,
//! workflow engines) with classification and recovery:
//!
//! - **Classifier**: pattern-based error typing with severity, impact and
//!   per-type trend statistics
//! - **Recovery**: per-type strategy lists run by the orchestrator, from
//!   backoff retries to failover and graceful degradation
//! - **Supervision**: per-service circuit breakers and background health
//!   probes
//! - **Middleware**: client-safe responses at the request boundary
//!
//! # Quick Start
//!
//! ```ignore
//! use opsmend::{config::Config, engine::Engine, recovery::RecoveryOptions};
//!
//! let engine = Engine::new(Config::load(None)?)?;
//! engine.start();
//! let outcome = engine
//!     .orchestrator()
//!     .execute("payments", |target| charge(target), RecoveryOptions::default())
//!     .await?;
//! ```

pub mod alerts;
pub mod classifier;
pub mod cli;
pub mod config;
pub mod engine;
pub mod errors;
pub mod middleware;
pub mod observability;
pub mod recovery;
pub mod supervision;

pub use classifier::{Classify, ErrorClassification, ErrorClassifier, ErrorContext, ErrorInfo};
pub use config::Config;
pub use engine::Engine;
pub use errors::{OpsmendError, RecoveryError};
pub use middleware::{BoundaryResponse, RecoveryMiddleware};
pub use recovery::{RecoveryOptions, RecoveryOrchestrator, RecoveryOutcome, RecoveryStrategy, Target};
