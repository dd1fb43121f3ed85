use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Overall state of a logged execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobLogStatus {
    Running,
    Completed,
    Failed,
}

impl JobLogStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStepStatus {
    Running,
    Completed,
    Failed,
    Skipped,
    Paused,
}

impl JobStepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Paused => "paused",
        }
    }

    /// The step will not change again during this execution.
    pub fn is_settled(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }
}

/// One step transition as persisted in the job log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogStep {
    pub index: usize,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub status: JobStepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    /// Wall time in milliseconds, once the step has ended
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl JobLogStep {
    pub fn new(index: usize, id: impl Into<String>, status: JobStepStatus) -> Self {
        Self {
            index,
            id: id.into(),
            name: None,
            status,
            start_time: None,
            end_time: None,
            duration: None,
            output: None,
            session_id: None,
            error: None,
        }
    }

    /// Set `end_time` to now and derive `duration` from `start_time`.
    pub fn finish(&mut self) {
        let now = Utc::now();
        self.duration = self
            .start_time
            .map(|start| (now - start).num_milliseconds());
        self.end_time = Some(now);
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobLogRecord {
    pub execution_id: String,
    pub workflow_name: String,
    pub workflow_file: String,
    pub start_time: DateTime<Utc>,
    pub last_update_time: DateTime<Utc>,
    pub status: JobLogStatus,
    /// Highest index with a completed entry, -1 if none
    pub last_completed_step: i64,
    pub total_steps: usize,
    #[serde(default)]
    pub steps: Vec<JobLogStep>,
}

impl JobLogRecord {
    pub fn step(&self, index: usize) -> Option<&JobLogStep> {
        self.steps.iter().find(|s| s.index == index)
    }
}
