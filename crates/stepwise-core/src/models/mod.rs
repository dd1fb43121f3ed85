pub mod pipeline;
pub mod step;

pub use pipeline::{
    PauseReason, PausedExecution, PausedExecutionSummary, PipelineFile, RunOptions,
};
pub use step::{Step, StepCondition, StepStatus};
