//! Workflow Executor: runs a workflow definition step by step.
//!
//! The executor:
//! 1. Validates the definition and resolves inputs
//! 2. Flattens jobs into one ordered step list
//! 3. Resolves `${{ ... }}` tokens and the resume session per step
//! 4. Evaluates conditions and checks like the pipeline runner
//! 5. Persists the job log after every step transition
//!
//! Unlike the pipeline runner, a rate-limited step is retried in place once
//! the limit resets; the job log shows it as `paused` meanwhile.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentInvocation, CommandBuilder, ProcessExecutor};
use crate::error::PipelineError;
use crate::joblog::{self, JobLogRecord, JobLogStep, JobStepStatus};
use crate::models::{RunOptions, Step};
use crate::pipeline::attempt::{attempt_step, StepAttempt};
use crate::pipeline::condition;
use crate::pipeline::events::{NoopObserver, PipelineObserver};
use crate::pipeline::runner::previous_success_before;
use crate::workflow::execution::{WorkflowExecution, WorkflowStatus};
use crate::workflow::resolver::StepOutputs;
use crate::workflow::schema::{is_bare_step_id, FlatStep, WorkflowDefinition, WorkflowError};
use crate::workflow::session;

pub struct WorkflowExecutor {
    process: Arc<dyn ProcessExecutor>,
    builder: Arc<dyn CommandBuilder>,
    options: RunOptions,
    observer: Arc<dyn PipelineObserver>,
    cancel: CancellationToken,
}

impl WorkflowExecutor {
    pub fn new(
        process: Arc<dyn ProcessExecutor>,
        builder: Arc<dyn CommandBuilder>,
        options: RunOptions,
    ) -> Self {
        Self {
            process,
            builder,
            options,
            observer: Arc::new(NoopObserver),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn PipelineObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Cancelling this token kills the in-flight step and stops the run.
    /// The job log is left as is, so the run can be resumed later.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Start a fresh execution, replacing any previous job log.
    pub async fn run(
        &self,
        workflow: &WorkflowDefinition,
        workflow_path: &Path,
        inputs: &HashMap<String, String>,
    ) -> Result<WorkflowExecution, PipelineError> {
        workflow.validate()?;
        let resolved = workflow.resolve_inputs(inputs)?;
        let flat = workflow.flatten();

        let log_path = joblog::log_path_for(workflow_path);
        let mut log = joblog::create_log(&workflow.name, workflow_path, flat.len());
        joblog::save(&log, &log_path)?;

        tracing::info!(
            "[WorkflowExecutor] Starting '{}' ({} step(s), execution {})",
            workflow.name,
            flat.len(),
            log.execution_id
        );

        let execution = WorkflowExecution::new(&workflow.name, resolved);
        self.drive(execution, &flat, &mut log, &log_path, 0).await
    }

    /// Continue from the job log next to `workflow_path`, or start fresh
    /// when there is none.
    pub async fn resume_from_log(
        &self,
        workflow: &WorkflowDefinition,
        workflow_path: &Path,
        inputs: &HashMap<String, String>,
    ) -> Result<WorkflowExecution, PipelineError> {
        workflow.validate()?;
        let log_path = joblog::log_path_for(workflow_path);
        let Some(mut log) = joblog::load(&log_path)? else {
            tracing::info!(
                "[WorkflowExecutor] No job log at {}, starting fresh",
                log_path.display()
            );
            return self.run(workflow, workflow_path, inputs).await;
        };

        let flat = workflow.flatten();
        check_log_matches(&log, &flat, &log_path)?;
        if log.workflow_name != workflow.name {
            tracing::warn!(
                "[WorkflowExecutor] Job log was written for '{}', resuming '{}'",
                log.workflow_name,
                workflow.name
            );
        }

        let resolved = workflow.resolve_inputs(inputs)?;
        let mut execution = WorkflowExecution::new(&workflow.name, resolved);
        let start = joblog::resume_step_index(&log);
        for entry in log.steps.iter().filter(|s| s.index < start) {
            if let Some(outputs) = outputs_from_log(entry) {
                execution.record_outputs(&entry.id, outputs);
            }
        }

        tracing::info!(
            "[WorkflowExecutor] Resuming '{}' at step {}/{} (execution {})",
            workflow.name,
            start + 1,
            flat.len(),
            log.execution_id
        );
        self.drive(execution, &flat, &mut log, &log_path, start).await
    }

    async fn drive(
        &self,
        mut execution: WorkflowExecution,
        flat: &[FlatStep],
        log: &mut JobLogRecord,
        log_path: &Path,
        start: usize,
    ) -> Result<WorkflowExecution, PipelineError> {
        let mut steps = mirror_steps(flat, log, start);
        let mut previous_success = previous_success_before(&steps, start);
        execution.status = WorkflowStatus::Running;
        execution.current_step_index = start;

        for (i, FlatStep { step, env, .. }) in flat.iter().enumerate().skip(start) {
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            execution.current_step_index = i;

            let mut entry = JobLogStep::new(i, &step.id, JobStepStatus::Running);
            entry.name = step.name.clone();

            // Condition / check gate
            let check = step
                .check
                .as_deref()
                .map(|c| execution.context(env).resolve(c));
            let gate = condition::evaluate(
                self.process.as_ref(),
                check.as_deref(),
                step.condition,
                previous_success,
                &self.options.working_dir,
                &self.cancel,
            )
            .await;
            if self.cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            if !gate.should_run {
                let reason = gate.reason.unwrap_or_else(|| "Skipped".to_string());
                tracing::info!("[WorkflowExecutor] Skipping '{}': {}", step.label(), reason);
                steps[i].mark_skipped(reason.clone());
                execution.record_outputs(&step.id, StepOutputs::from([status_output("skipped")]));
                entry.status = JobStepStatus::Skipped;
                entry.output = Some(reason);
                record(log, log_path, entry)?;
                self.observer.on_progress(&steps, i);
                continue;
            }

            // Resolve against everything recorded so far
            let ctx = execution.context(env);
            let prompt = ctx.resolve(&step.prompt);
            let model = step
                .model
                .as_deref()
                .map(|m| ctx.resolve(m))
                .or_else(|| self.options.model.clone());
            let resume_session = session::resolve_resume_session(step.resume_session.as_deref(), &ctx);

            steps[i].prompt = prompt.clone();
            steps[i].mark_running();
            entry.start_time = Some(Utc::now());
            record(log, log_path, entry.clone())?;
            self.observer.on_progress(&steps, i);

            loop {
                let invocation = AgentInvocation {
                    prompt: &prompt,
                    model: model.as_deref(),
                    resume_session: resume_session.as_deref(),
                    options: &self.options,
                };
                let attempt = attempt_step(
                    self.process.as_ref(),
                    self.builder.as_ref(),
                    &invocation,
                    &self.cancel,
                )
                .await;

                match attempt {
                    StepAttempt::Cancelled => return Err(PipelineError::Cancelled),
                    StepAttempt::Completed {
                        output,
                        session_id,
                        exit_code,
                    } => {
                        let mut outputs = StepOutputs::from([
                            ("result".to_string(), Value::String(output.clone())),
                            ("exit_code".to_string(), json!(exit_code)),
                            status_output("completed"),
                        ]);
                        if let Some(sid) = &session_id {
                            outputs.insert("session_id".to_string(), Value::String(sid.clone()));
                        }
                        execution.record_outputs(&step.id, outputs);

                        entry.status = JobStepStatus::Completed;
                        entry.output = Some(output.clone());
                        entry.session_id = session_id.clone();
                        entry.finish();
                        record(log, log_path, entry)?;

                        steps[i].mark_completed(output, session_id);
                        previous_success = true;
                        self.observer.on_progress(&steps, i);
                        break;
                    }
                    StepAttempt::Failed { error, exit_code } => {
                        tracing::warn!(
                            "[WorkflowExecutor] Step '{}' failed (exit {:?}): {}",
                            step.label(),
                            exit_code,
                            error
                        );
                        execution.record_outputs(
                            &step.id,
                            StepOutputs::from([
                                ("result".to_string(), Value::String(error.clone())),
                                ("exit_code".to_string(), json!(exit_code)),
                                status_output("failed"),
                            ]),
                        );

                        entry.status = JobStepStatus::Failed;
                        entry.error = Some(error.clone());
                        entry.finish();
                        record(log, log_path, entry)?;

                        steps[i].mark_error(error);
                        previous_success = false;
                        self.observer.on_progress(&steps, i);
                        break;
                    }
                    StepAttempt::RateLimited { reset_time_ms, .. } => {
                        let delay = delay_until(reset_time_ms);
                        tracing::warn!(
                            "[WorkflowExecutor] Rate limited on '{}', retrying in {}s",
                            step.label(),
                            delay.as_secs()
                        );
                        steps[i].mark_paused(Some(reset_time_ms));
                        let mut paused = entry.clone();
                        paused.status = JobStepStatus::Paused;
                        record(log, log_path, paused)?;
                        self.observer.on_progress(&steps, i);

                        tokio::select! {
                            _ = tokio::time::sleep(delay) => {}
                            _ = self.cancel.cancelled() => return Err(PipelineError::Cancelled),
                        }

                        steps[i].mark_running();
                        record(log, log_path, entry.clone())?;
                        self.observer.on_progress(&steps, i);
                    }
                }
            }
        }

        let first_error = log
            .steps
            .iter()
            .find(|s| s.status == JobStepStatus::Failed)
            .map(|s| s.error.clone().unwrap_or_default());
        match first_error {
            Some(error) => {
                execution.status = WorkflowStatus::Failed;
                self.observer.on_error(&error, &steps);
            }
            None => {
                execution.status = WorkflowStatus::Completed;
                self.observer.on_complete(&steps);
            }
        }
        tracing::info!(
            "[WorkflowExecutor] '{}' finished: {}",
            execution.workflow_name,
            execution.status.as_str()
        );
        Ok(execution)
    }
}

fn record(log: &mut JobLogRecord, path: &Path, entry: JobLogStep) -> Result<(), PipelineError> {
    joblog::add_step(log, entry);
    joblog::save(log, path)?;
    Ok(())
}

fn status_output(status: &str) -> (String, Value) {
    ("status".to_string(), Value::String(status.to_string()))
}

fn delay_until(deadline_ms: i64) -> Duration {
    let remaining = deadline_ms - Utc::now().timestamp_millis();
    Duration::from_millis(remaining.max(0) as u64)
}

/// Outputs a later step may still reference after a restart.
fn outputs_from_log(entry: &JobLogStep) -> Option<StepOutputs> {
    let mut outputs = StepOutputs::new();
    match entry.status {
        JobStepStatus::Completed => {
            outputs.insert(
                "result".to_string(),
                Value::String(entry.output.clone().unwrap_or_default()),
            );
            if let Some(sid) = &entry.session_id {
                outputs.insert("session_id".to_string(), Value::String(sid.clone()));
            }
        }
        JobStepStatus::Failed => {
            outputs.insert(
                "result".to_string(),
                Value::String(entry.error.clone().unwrap_or_default()),
            );
        }
        JobStepStatus::Skipped => {}
        JobStepStatus::Running | JobStepStatus::Paused => return None,
    }
    let (key, value) = status_output(entry.status.as_str());
    outputs.insert(key, value);
    Some(outputs)
}

/// Pipeline-model view of the workflow, used for observer notifications.
fn mirror_steps(flat: &[FlatStep], log: &JobLogRecord, start: usize) -> Vec<Step> {
    flat.iter()
        .enumerate()
        .map(|(i, FlatStep { step, .. })| {
            let mut mirror = Step::new(&step.id, &step.prompt);
            mirror.name = step.name.clone();
            mirror.model = step.model.clone();
            mirror.condition = step.condition;
            mirror.check = step.check.clone();
            mirror.resume_from_step_id = step
                .resume_session
                .as_deref()
                .filter(|s| is_bare_step_id(s))
                .map(str::to_string);

            if i < start {
                if let Some(entry) = log.step(i) {
                    match entry.status {
                        JobStepStatus::Completed => mirror.mark_completed(
                            entry.output.clone().unwrap_or_default(),
                            entry.session_id.clone(),
                        ),
                        JobStepStatus::Failed => {
                            mirror.mark_error(entry.error.clone().unwrap_or_default())
                        }
                        JobStepStatus::Skipped => {
                            mirror.mark_skipped(entry.output.clone().unwrap_or_default())
                        }
                        JobStepStatus::Running | JobStepStatus::Paused => {}
                    }
                }
            }
            mirror
        })
        .collect()
}

fn check_log_matches(
    log: &JobLogRecord,
    flat: &[FlatStep],
    log_path: &Path,
) -> Result<(), WorkflowError> {
    let mismatch = |detail: String| {
        WorkflowError::Validation(format!(
            "job log {} does not match the workflow ({}); remove it to start over",
            log_path.display(),
            detail
        ))
    };

    if log.total_steps != flat.len() {
        return Err(mismatch(format!(
            "{} step(s) logged, {} defined",
            log.total_steps,
            flat.len()
        )));
    }
    for entry in &log.steps {
        let expected = &flat[entry.index].step.id;
        if &entry.id != expected {
            return Err(mismatch(format!(
                "step {} is '{}' in the log but '{}' in the workflow",
                entry.index, entry.id, expected
            )));
        }
    }
    Ok(())
}
