use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::step::Step;
use crate::error::PipelineError;

/// Settings shared by every step of one pipeline run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOptions {
    /// Default model for steps that do not name one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    pub working_dir: PathBuf,

    /// Agent permission mode: "bypassPermissions" | "acceptEdits" | ...
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,

    /// Extra arguments appended to every agent invocation
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extra_args: Vec<String>,
}

impl RunOptions {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            model: None,
            working_dir: working_dir.into(),
            permission_mode: None,
            extra_args: Vec::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl Default for RunOptions {
    fn default() -> Self {
        Self::new(".")
    }
}

/// Why an execution stopped without finishing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    Manual,
    RateLimit,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::RateLimit => "rate_limit",
        }
    }
}

/// Snapshot of a paused pipeline, owned by the runner until resumed or discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedExecution {
    pub pipeline_id: String,
    pub steps: Vec<Step>,
    pub current_index: usize,
    pub reason: PauseReason,
    /// Epoch-ms when the pause took effect
    pub paused_at: i64,
    /// Epoch-ms deadline for the automatic resume (rate-limit pauses only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume_deadline: Option<i64>,
    pub options: RunOptions,
}

/// What `list_paused_executions` hands out.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PausedExecutionSummary {
    pub pipeline_id: String,
    pub steps: Vec<Step>,
    pub current_index: usize,
    pub paused_at: i64,
}

impl From<&PausedExecution> for PausedExecutionSummary {
    fn from(paused: &PausedExecution) -> Self {
        Self {
            pipeline_id: paused.pipeline_id.clone(),
            steps: paused.steps.clone(),
            current_index: paused.current_index,
            paused_at: paused.paused_at,
        }
    }
}

/// A step list stored on disk, as accepted by `stepwise run`.
///
/// ```yaml
/// model: sonnet
/// steps:
///   - id: plan
///     prompt: "Write a plan for the login page"
///   - id: build
///     prompt: "Implement the plan"
///     resumeFromStepId: plan
///     condition: on_success
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineFile {
    #[serde(default)]
    pub model: Option<String>,
    pub steps: Vec<Step>,
}

impl PipelineFile {
    /// Parse from JSON when the text looks like JSON, YAML otherwise.
    /// A bare array of steps is accepted as well.
    pub fn parse(content: &str) -> Result<Self, String> {
        let trimmed = content.trim_start();
        if trimmed.starts_with('[') {
            let steps: Vec<Step> = serde_json::from_str(content).map_err(|e| e.to_string())?;
            return Ok(Self { model: None, steps });
        }
        if trimmed.starts_with('{') {
            return serde_json::from_str(content).map_err(|e| e.to_string());
        }
        serde_yaml::from_str(content).map_err(|e| e.to_string())
    }

    pub fn from_file(path: &Path) -> Result<Self, PipelineError> {
        let invalid = |message: String| PipelineError::InvalidPipelineFile {
            path: path.display().to_string(),
            message,
        };
        let content = std::fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        Self::parse(&content).map_err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StepCondition;

    #[test]
    fn test_parse_yaml_pipeline() {
        let yaml = r#"
model: sonnet
steps:
  - id: plan
    prompt: "Plan it"
  - id: build
    prompt: "Build it"
    resumeFromStepId: plan
    condition: on_success
"#;
        let file = PipelineFile::parse(yaml).unwrap();
        assert_eq!(file.model.as_deref(), Some("sonnet"));
        assert_eq!(file.steps.len(), 2);
        assert_eq!(file.steps[1].resume_from_step_id.as_deref(), Some("plan"));
        assert_eq!(file.steps[1].condition, Some(StepCondition::OnSuccess));
    }

    #[test]
    fn test_parse_bare_json_array() {
        let json = r#"[{"id":"a","prompt":"one"},{"id":"b","prompt":"two"}]"#;
        let file = PipelineFile::parse(json).unwrap();
        assert!(file.model.is_none());
        assert_eq!(file.steps[1].id, "b");
    }

    #[test]
    fn test_parse_rejects_missing_prompt() {
        assert!(PipelineFile::parse(r#"{"steps":[{"id":"a"}]}"#).is_err());
    }
}
