//! Core error types for the Stepwise engine.
//!
//! Step failures are never errors here: they are recorded on the step and
//! reported through the observer. These types cover the failures a caller
//! has to react to (bad input files, corrupt job logs, misuse of the runner).

use crate::joblog::JobLogError;
use crate::workflow::WorkflowError;

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("A pipeline is already running on this runner")]
    AlreadyRunning,

    #[error("No paused pipeline with id '{0}'")]
    NotPaused(String),

    #[error("Execution was cancelled")]
    Cancelled,

    #[error("Start index {index} is out of range for {len} step(s)")]
    InvalidStartIndex { index: usize, len: usize },

    #[error("Failed to load pipeline file '{path}': {message}")]
    InvalidPipelineFile { path: String, message: String },

    #[error(transparent)]
    Workflow(#[from] WorkflowError),

    #[error(transparent)]
    JobLog(#[from] JobLogError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
