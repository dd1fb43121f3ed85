//! Condition evaluator: decides whether a step runs or is skipped.

use std::path::Path;

use tokio_util::sync::CancellationToken;

use crate::agent::{run_check, ProcessExecutor};
use crate::models::StepCondition;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConditionOutcome {
    pub should_run: bool,
    /// Why the step was skipped (only set when `should_run` is false)
    pub reason: Option<String>,
}

impl ConditionOutcome {
    fn run() -> Self {
        Self {
            should_run: true,
            reason: None,
        }
    }

    fn skip(reason: String) -> Self {
        Self {
            should_run: false,
            reason: Some(reason),
        }
    }
}

/// Check the step condition against the previous outcome, then run the
/// optional check command in `working_dir`.
pub async fn evaluate(
    executor: &dyn ProcessExecutor,
    check: Option<&str>,
    condition: Option<StepCondition>,
    previous_success: bool,
    working_dir: &Path,
    cancel: &CancellationToken,
) -> ConditionOutcome {
    let condition = condition.unwrap_or_default();
    let condition_met = match condition {
        StepCondition::Always => true,
        StepCondition::OnSuccess => previous_success,
        StepCondition::OnFailure => !previous_success,
    };

    if !condition_met {
        let previous = if previous_success { "succeeded" } else { "failed" };
        return ConditionOutcome::skip(format!(
            "Condition '{}' not met (previous step {})",
            condition.as_str(),
            previous
        ));
    }

    let Some(check) = check.map(str::trim).filter(|c| !c.is_empty()) else {
        return ConditionOutcome::run();
    };

    let output = run_check(executor, check, working_dir, cancel).await;
    if output.success {
        return ConditionOutcome::run();
    }

    let code = output
        .exit_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "none".to_string());
    ConditionOutcome::skip(format!(
        "Check command failed (exit {}): {}",
        code,
        output.error_text()
    ))
}
