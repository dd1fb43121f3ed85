//! Job Log Store: the durable record of one workflow execution.
//!
//! A job log lives next to its workflow file (`flow.yaml` → `flow.job.json`)
//! and is rewritten after every step transition. On restart the caller loads
//! it, re-seeds completed outputs and continues at `resume_step_index`.

pub mod store;
pub mod types;

pub use store::{
    add_step, create_log, exists, load, log_path_for, new_execution_id, remove, resume_step_index,
    save,
};
pub use types::{JobLogRecord, JobLogStatus, JobLogStep, JobStepStatus};

#[derive(Debug, thiserror::Error)]
pub enum JobLogError {
    #[error("Job log IO error at '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Corrupt job log '{path}': {message}")]
    Corrupt { path: String, message: String },

    #[error("Failed to serialize job log: {0}")]
    Serialization(#[from] serde_json::Error),
}
