use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::workflow::resolver::{StepOutputs, VariableContext};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

/// Runtime state of one workflow run.
///
/// `inputs` are fixed for the run; `outputs` only grow as steps finish.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowExecution {
    pub workflow_name: String,
    pub inputs: BTreeMap<String, Value>,
    pub outputs: BTreeMap<String, StepOutputs>,
    pub current_step_index: usize,
    pub status: WorkflowStatus,
}

impl WorkflowExecution {
    pub fn new(workflow_name: impl Into<String>, inputs: BTreeMap<String, Value>) -> Self {
        Self {
            workflow_name: workflow_name.into(),
            inputs,
            outputs: BTreeMap::new(),
            current_step_index: 0,
            status: WorkflowStatus::Pending,
        }
    }

    pub fn record_outputs(&mut self, step_id: &str, outputs: StepOutputs) {
        self.outputs.insert(step_id.to_string(), outputs);
    }

    pub fn context<'a>(&'a self, env: &'a BTreeMap<String, Value>) -> VariableContext<'a> {
        VariableContext::new(&self.inputs, env, &self.outputs)
    }
}
