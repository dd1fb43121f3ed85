//! Stepwise Core: sequential agent pipeline engine.
//!
//! Runs an ordered list of coding-agent steps one at a time, with:
//!
//! - conditional execution (`on_success` / `on_failure`, shell checks)
//! - session chaining between steps
//! - rate-limit detection with automatic, timer-driven resume
//! - manual pause / resume / cancel
//! - YAML workflows with variables and a crash-safe job log
//!
//! The crate has no UI; progress is reported through `PipelineObserver`.

pub mod agent;
pub mod config;
pub mod error;
pub mod joblog;
pub mod models;
pub mod pipeline;
pub mod workflow;

#[cfg(test)]
pub(crate) mod testing;

// Convenience re-exports
pub use config::EngineConfig;
pub use error::PipelineError;
pub use pipeline::{PipelineRunner, RunOutcome};
