//! Workflow engine: YAML-defined jobs of agent steps with inputs, env,
//! `${{ ... }}` variables and a crash-safe job log.
//!
//! # Architecture
//!
//! ```text
//! workflow.yaml ──► WorkflowDefinition ──► WorkflowExecutor ──► PipelineRunner semantics
//!                                              │                 (conditions, sessions,
//!                   resolver / session ◄───────┤                  rate limits)
//!                                              │
//!                                   flow.job.json (joblog)
//! ```

pub mod execution;
pub mod executor;
pub mod resolver;
pub mod schema;
pub mod session;

pub use execution::{WorkflowExecution, WorkflowStatus};
pub use executor::WorkflowExecutor;
pub use resolver::{StepOutputs, VariableContext};
pub use schema::{FlatStep, InputSpec, JobDefinition, WorkflowDefinition, WorkflowError, WorkflowStep};
pub use session::resolve_resume_session;
