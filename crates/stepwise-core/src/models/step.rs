use serde::{Deserialize, Serialize};

/// Lifecycle of a single pipeline step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Error,
    Paused,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Error => "error",
            Self::Paused => "paused",
            Self::Skipped => "skipped",
        }
    }

    /// Whether the step is done for the current pass.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Skipped)
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// When a step runs relative to the outcome of the step before it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepCondition {
    #[default]
    Always,
    OnSuccess,
    OnFailure,
}

impl StepCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::OnSuccess => "on_success",
            Self::OnFailure => "on_failure",
        }
    }
}

/// A unit of pipeline work: one agent invocation with a prompt.
///
/// Fields are read freely but only changed through the `mark_*` methods, so
/// the status and the data that belongs to it always move together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    pub prompt: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default)]
    pub status: StepStatus,

    /// Captured output (or error text for failed steps)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<String>,

    /// Conversation handle returned by the agent; only set once completed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Continue the conversation of the step with this id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_from_step_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<StepCondition>,

    /// Shell command that must exit 0 for the step to run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub check: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<String>,

    /// Epoch-ms deadline after which a rate-limited step may run again
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub paused_until: Option<i64>,
}

impl Step {
    pub fn new(id: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            prompt: prompt.into(),
            model: None,
            status: StepStatus::Pending,
            results: None,
            session_id: None,
            resume_from_step_id: None,
            condition: None,
            check: None,
            skip_reason: None,
            paused_until: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_condition(mut self, condition: StepCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn with_check(mut self, check: impl Into<String>) -> Self {
        self.check = Some(check.into());
        self
    }

    pub fn resuming_from(mut self, step_id: impl Into<String>) -> Self {
        self.resume_from_step_id = Some(step_id.into());
        self
    }

    /// Display label: the name when present, otherwise the id.
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }

    pub fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.skip_reason = None;
        self.paused_until = None;
    }

    pub fn mark_completed(&mut self, output: String, session_id: Option<String>) {
        self.status = StepStatus::Completed;
        self.results = Some(output);
        self.session_id = session_id;
    }

    pub fn mark_error(&mut self, error: String) {
        self.status = StepStatus::Error;
        self.results = Some(error);
        self.session_id = None;
    }

    pub fn mark_skipped(&mut self, reason: String) {
        self.status = StepStatus::Skipped;
        self.skip_reason = Some(reason);
    }

    /// Pause the step. `until` is the rate-limit reset deadline, if any.
    pub fn mark_paused(&mut self, until: Option<i64>) {
        self.status = StepStatus::Paused;
        self.paused_until = until;
    }

    /// Make the step runnable again. Error text and leftovers of a paused
    /// attempt are dropped; a completed step keeps its results.
    pub fn reset_to_pending(&mut self) {
        if matches!(self.status, StepStatus::Error | StepStatus::Paused) {
            self.results = None;
        }
        self.status = StepStatus::Pending;
        self.paused_until = None;
        self.skip_reason = None;
    }

    /// The session a later step may continue, if this step produced one.
    pub fn resumable_session(&self) -> Option<&str> {
        match self.status {
            StepStatus::Completed => self.session_id.as_deref(),
            _ => None,
        }
    }
}
