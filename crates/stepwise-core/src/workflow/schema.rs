//! YAML schema types for workflow definitions.
//!
//! A workflow YAML declares inputs, environment and one or more jobs of
//! agent steps:
//!
//! ```yaml
//! name: "Refactor flow"
//!
//! inputs:
//!   target:
//!     description: "Directory to refactor"
//!     required: true
//!     default: "src"
//!
//! env:
//!   LANG_HINT: rust
//!
//! jobs:
//!   main:
//!     env:
//!       LANG_HINT: rust2021
//!     steps:
//!       - id: analyze
//!         name: "Analyze"
//!         prompt: "Analyze ${{ inputs.target }} (${{ env.LANG_HINT }})"
//!         model: sonnet
//!
//!       - id: fix
//!         prompt: "Fix what you found: ${{ steps.analyze.outputs.result }}"
//!         resume_session: "${{ steps.analyze.outputs.session_id }}"
//!         condition: on_success
//!         check: "test -d src"
//! ```
//!
//! Jobs run in declaration order; their steps are flattened into one list.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

use crate::models::StepCondition;
use crate::workflow::resolver;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("Failed to parse workflow YAML: {0}")]
    Parse(String),

    #[error("Failed to read workflow file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid workflow: {0}")]
    Validation(String),

    #[error("Missing required input '{0}'")]
    MissingInput(String),
}

/// Top-level workflow definition loaded from a YAML file.
#[derive(Debug, Clone)]
pub struct WorkflowDefinition {
    pub name: String,
    pub description: Option<String>,
    pub inputs: BTreeMap<String, InputSpec>,
    /// Workflow-level environment, visible as `${{ env.<key> }}`
    pub env: BTreeMap<String, Value>,
    /// Jobs in declaration order
    pub jobs: Vec<JobDefinition>,
}

/// A declared workflow input.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InputSpec {
    #[serde(default)]
    pub description: Option<String>,

    #[serde(default)]
    pub required: bool,

    #[serde(default)]
    pub default: Option<Value>,
}

#[derive(Debug, Clone)]
pub struct JobDefinition {
    /// Key of the job under `jobs:`
    pub id: String,
    pub name: Option<String>,
    /// Job-level environment; overrides the workflow env for its steps
    pub env: BTreeMap<String, Value>,
    pub steps: Vec<WorkflowStep>,
}

/// A single step in a workflow job.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStep {
    /// Unique across the workflow; used by `steps.<id>` references
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Prompt template; `${{ ... }}` tokens are resolved before the step runs
    pub prompt: String,

    #[serde(default)]
    pub model: Option<String>,

    /// Session to continue: a `${{ steps.<id>.outputs.session_id }}` template
    /// or a bare step id
    #[serde(default)]
    pub resume_session: Option<String>,

    #[serde(default)]
    pub condition: Option<StepCondition>,

    /// Shell command that must exit 0 for the step to run
    #[serde(default)]
    pub check: Option<String>,
}

impl WorkflowStep {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// A step together with the job it belongs to and that job's merged env.
#[derive(Debug, Clone)]
pub struct FlatStep {
    pub job_id: String,
    pub step: WorkflowStep,
    pub env: BTreeMap<String, Value>,
}

#[derive(Deserialize)]
struct RawWorkflow {
    name: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    inputs: BTreeMap<String, InputSpec>,
    #[serde(default)]
    env: BTreeMap<String, Value>,
    #[serde(default)]
    jobs: serde_yaml::Mapping,
}

#[derive(Deserialize)]
struct RawJob {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, Value>,
    #[serde(default)]
    steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    /// Parse a workflow definition from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, WorkflowError> {
        let raw: RawWorkflow =
            serde_yaml::from_str(yaml).map_err(|e| WorkflowError::Parse(e.to_string()))?;

        // serde_yaml::Mapping keeps insertion order, which is the run order.
        let mut jobs = Vec::with_capacity(raw.jobs.len());
        for (key, value) in raw.jobs {
            let id = match key {
                serde_yaml::Value::String(s) => s,
                other => {
                    return Err(WorkflowError::Parse(format!(
                        "job keys must be strings, got {:?}",
                        other
                    )))
                }
            };
            let job: RawJob = serde_yaml::from_value(value)
                .map_err(|e| WorkflowError::Parse(format!("job '{}': {}", id, e)))?;
            jobs.push(JobDefinition {
                id,
                name: job.name,
                env: job.env,
                steps: job.steps,
            });
        }

        Ok(Self {
            name: raw.name,
            description: raw.description,
            inputs: raw.inputs,
            env: raw.env,
            jobs,
        })
    }

    /// Load a workflow definition from a file path.
    pub fn from_file(path: &Path) -> Result<Self, WorkflowError> {
        let content = std::fs::read_to_string(path).map_err(|source| WorkflowError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// All steps in run order, each with its job's merged environment.
    pub fn flatten(&self) -> Vec<FlatStep> {
        let mut flat = Vec::new();
        for job in &self.jobs {
            let mut env = self.env.clone();
            env.extend(job.env.iter().map(|(k, v)| (k.clone(), v.clone())));
            for step in &job.steps {
                flat.push(FlatStep {
                    job_id: job.id.clone(),
                    step: step.clone(),
                    env: env.clone(),
                });
            }
        }
        flat
    }

    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|j| j.steps.len()).sum()
    }

    /// Check structure and references. All problems are reported at once.
    pub fn validate(&self) -> Result<(), WorkflowError> {
        let mut problems = Vec::new();

        if self.name.trim().is_empty() {
            problems.push("workflow name is empty".to_string());
        }
        if self.step_count() == 0 {
            problems.push("workflow has no steps".to_string());
        }

        let mut earlier: HashSet<&str> = HashSet::new();
        for (job, step) in self.jobs.iter().flat_map(|j| j.steps.iter().map(move |s| (j, s))) {
            let at = format!("job '{}', step '{}'", job.id, step.id);

            if step.id.trim().is_empty() {
                problems.push(format!("job '{}' has a step without an id", job.id));
                continue;
            }
            if earlier.contains(step.id.as_str()) {
                problems.push(format!("duplicate step id '{}'", step.id));
            }
            if step.prompt.trim().is_empty() {
                problems.push(format!("{}: prompt is empty", at));
            }

            let templates = [
                Some(step.prompt.as_str()),
                step.model.as_deref(),
                step.check.as_deref(),
                step.resume_session.as_deref(),
            ];
            for template in templates.into_iter().flatten() {
                for path in resolver::token_paths(template) {
                    if let Some(problem) = self.check_reference(path, &step.id, &earlier) {
                        problems.push(format!("{}: {}", at, problem));
                    }
                }
            }

            if let Some(bare) = step.resume_session.as_deref().filter(|s| is_bare_step_id(s)) {
                if !earlier.contains(bare) {
                    problems.push(format!(
                        "{}: resume_session '{}' does not name an earlier step",
                        at, bare
                    ));
                }
            }

            earlier.insert(step.id.as_str());
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(WorkflowError::Validation(problems.join("; ")))
        }
    }

    fn check_reference(&self, path: &str, step_id: &str, earlier: &HashSet<&str>) -> Option<String> {
        let mut parts = path.splitn(2, '.');
        let scope = parts.next().unwrap_or_default();
        let rest = parts.next().unwrap_or_default();
        match scope {
            "inputs" if !self.inputs.contains_key(rest) => {
                Some(format!("'{}' references undeclared input '{}'", path, rest))
            }
            "steps" => {
                let referenced = rest.split('.').next().unwrap_or_default();
                if referenced == step_id {
                    Some(format!("'{}' references the step itself", path))
                } else if !earlier.contains(referenced) {
                    Some(format!("'{}' does not reference an earlier step", path))
                } else {
                    None
                }
            }
            _ => None,
        }
    }

    /// Apply defaults to the provided inputs. Undeclared inputs pass through.
    pub fn resolve_inputs(
        &self,
        provided: &HashMap<String, String>,
    ) -> Result<BTreeMap<String, Value>, WorkflowError> {
        let mut resolved = BTreeMap::new();
        for (key, spec) in &self.inputs {
            match (provided.get(key), &spec.default) {
                (Some(value), _) => {
                    resolved.insert(key.clone(), Value::String(value.clone()));
                }
                (None, Some(default)) => {
                    resolved.insert(key.clone(), default.clone());
                }
                (None, None) if spec.required => {
                    return Err(WorkflowError::MissingInput(key.clone()));
                }
                (None, None) => {}
            }
        }
        for (key, value) in provided {
            if !self.inputs.contains_key(key) {
                tracing::warn!("[Workflow] Input '{}' is not declared by '{}'", key, self.name);
                resolved.insert(key.clone(), Value::String(value.clone()));
            }
        }
        Ok(resolved)
    }
}

/// `analyze` as opposed to `${{ steps.analyze.outputs.session_id }}`.
pub fn is_bare_step_id(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    const FLOW: &str = r#"
name: "Refactor flow"
inputs:
  target:
    description: "Directory"
    required: true
    default: "src"
  depth:
    required: false
env:
  LANG_HINT: rust
  RETRIES: 3
jobs:
  zeta:
    env:
      LANG_HINT: rust2021
    steps:
      - id: analyze
        prompt: "Analyze ${{ inputs.target }}"
        model: sonnet
  alpha:
    steps:
      - id: fix
        prompt: "Fix ${{ steps.analyze.outputs.result }}"
        resume_session: analyze
        condition: on_success
        check: "test -d src"
"#;

    #[test]
    fn test_parse_keeps_job_order() {
        let wf = WorkflowDefinition::from_yaml(FLOW).unwrap();
        assert_eq!(wf.name, "Refactor flow");
        let ids: Vec<&str> = wf.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["zeta", "alpha"]);
        assert_eq!(wf.step_count(), 2);
        assert_eq!(wf.jobs[1].steps[0].condition, Some(StepCondition::OnSuccess));
        assert!(wf.inputs["target"].required);
        wf.validate().unwrap();
    }

    #[test]
    fn test_flatten_merges_job_env() {
        let wf = WorkflowDefinition::from_yaml(FLOW).unwrap();
        let flat = wf.flatten();
        assert_eq!(flat[0].step.id, "analyze");
        assert_eq!(flat[0].env["LANG_HINT"], Value::from("rust2021"));
        assert_eq!(flat[0].env["RETRIES"], Value::from(3));
        assert_eq!(flat[1].job_id, "alpha");
        assert_eq!(flat[1].env["LANG_HINT"], Value::from("rust"));
    }

    #[test]
    fn test_validate_rejects_forward_and_duplicate_references() {
        let yaml = r#"
name: broken
jobs:
  main:
    steps:
      - id: a
        prompt: "uses ${{ steps.b.outputs.result }} and ${{ inputs.nope }}"
      - id: b
        prompt: "b"
        resume_session: c
      - id: a
        prompt: "again"
"#;
        let err = WorkflowDefinition::from_yaml(yaml).unwrap().validate().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("does not reference an earlier step"), "{}", message);
        assert!(message.contains("undeclared input 'nope'"), "{}", message);
        assert!(message.contains("resume_session 'c'"), "{}", message);
        assert!(message.contains("duplicate step id 'a'"), "{}", message);
    }

    #[test]
    fn test_validate_rejects_empty_workflow() {
        let wf = WorkflowDefinition::from_yaml("name: empty\n").unwrap();
        assert!(matches!(wf.validate(), Err(WorkflowError::Validation(_))));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            WorkflowDefinition::from_yaml("jobs: [1, 2"),
            Err(WorkflowError::Parse(_))
        ));
    }

    #[test]
    fn test_resolve_inputs() {
        let wf = WorkflowDefinition::from_yaml(FLOW).unwrap();

        let resolved = wf.resolve_inputs(&HashMap::new()).unwrap();
        assert_eq!(resolved["target"], Value::from("src"));
        assert!(!resolved.contains_key("depth"));

        let provided = HashMap::from([
            ("target".to_string(), "lib".to_string()),
            ("extra".to_string(), "x".to_string()),
        ]);
        let resolved = wf.resolve_inputs(&provided).unwrap();
        assert_eq!(resolved["target"], Value::from("lib"));
        assert_eq!(resolved["extra"], Value::from("x"));
    }

    #[test]
    fn test_missing_required_input() {
        let yaml = r#"
name: needs-input
inputs:
  ticket: { required: true }
jobs:
  main:
    steps:
      - id: a
        prompt: "Work on ${{ inputs.ticket }}"
"#;
        let wf = WorkflowDefinition::from_yaml(yaml).unwrap();
        let err = wf.resolve_inputs(&HashMap::new()).unwrap_err();
        assert!(matches!(err, WorkflowError::MissingInput(ref name) if name == "ticket"));
    }

    #[test]
    fn test_bare_step_id() {
        assert!(is_bare_step_id("analyze"));
        assert!(is_bare_step_id("step-2_b"));
        assert!(!is_bare_step_id("${{ steps.a.outputs.session_id }}"));
        assert!(!is_bare_step_id(""));
    }
}
