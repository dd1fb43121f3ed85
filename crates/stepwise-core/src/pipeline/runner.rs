//! Pipeline runner: executes a step list one step at a time.
//!
//! Per step the runner:
//! 1. Honors a pending manual pause request (before a still-pending step)
//! 2. Evaluates the condition / check gate
//! 3. Attaches the session of the referenced step, if completed
//! 4. Invokes the agent and classifies the result
//! 5. On rate limit: snapshots, schedules an automatic resume, returns
//! 6. On failure: records the error and keeps going
//!
//! All mutable state (active execution, paused snapshots, resume timers) is
//! owned by the runner instance; clones share it.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentInvocation, CommandBuilder, ProcessExecutor};
use crate::error::PipelineError;
use crate::models::{
    PauseReason, PausedExecution, PausedExecutionSummary, RunOptions, Step, StepStatus,
};
use crate::pipeline::attempt::{attempt_step, StepAttempt};
use crate::pipeline::condition;
use crate::pipeline::events::PipelineObserver;
use crate::pipeline::scheduler::ResumeScheduler;

type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// How often a due automatic resume retries while another run is active.
const BUSY_RETRY: Duration = Duration::from_secs(30);

/// Where a run stopped.
#[derive(Debug, Clone)]
pub enum RunOutcome {
    Completed(Vec<Step>),
    Failed {
        error: String,
        steps: Vec<Step>,
    },
    Paused {
        pipeline_id: String,
        reason: PauseReason,
        steps: Vec<Step>,
    },
    Cancelled(Vec<Step>),
}

impl RunOutcome {
    pub fn steps(&self) -> &[Step] {
        match self {
            RunOutcome::Completed(steps) | RunOutcome::Cancelled(steps) => steps,
            RunOutcome::Failed { steps, .. } | RunOutcome::Paused { steps, .. } => steps,
        }
    }
}

struct ActiveExecution {
    run_id: u64,
    steps: Vec<Step>,
    current_index: usize,
    cancel: CancellationToken,
    /// Pipeline id reserved by `pause_execution`, applied before the next pending step
    pause_request: Option<(String, PauseReason)>,
}

struct PausedEntry {
    snapshot: PausedExecution,
    observer: Arc<dyn PipelineObserver>,
}

#[derive(Default)]
struct RunnerState {
    active: Option<ActiveExecution>,
    paused: HashMap<String, PausedEntry>,
    next_run_id: u64,
}

/// Per-run context carried through the loop.
#[derive(Clone)]
struct RunContext {
    run_id: u64,
    cancel: CancellationToken,
    options: RunOptions,
    observer: Arc<dyn PipelineObserver>,
}

#[derive(Clone)]
pub struct PipelineRunner {
    executor: Arc<dyn ProcessExecutor>,
    builder: Arc<dyn CommandBuilder>,
    state: Arc<Mutex<RunnerState>>,
    scheduler: ResumeScheduler,
}

impl PipelineRunner {
    pub fn new(executor: Arc<dyn ProcessExecutor>, builder: Arc<dyn CommandBuilder>) -> Self {
        Self {
            executor,
            builder,
            state: Arc::new(Mutex::new(RunnerState::default())),
            scheduler: ResumeScheduler::new(),
        }
    }

    /// Run `steps` from `start_index` until they are exhausted, the pipeline
    /// pauses, or it is cancelled.
    pub async fn run(
        &self,
        steps: Vec<Step>,
        options: RunOptions,
        observer: Arc<dyn PipelineObserver>,
        start_index: usize,
    ) -> Result<RunOutcome, PipelineError> {
        if start_index > steps.len() {
            return Err(PipelineError::InvalidStartIndex {
                index: start_index,
                len: steps.len(),
            });
        }

        let ctx = {
            let mut state = self.state.lock().await;
            Self::activate(&mut state, &steps, start_index, options, observer)?
        };

        tracing::info!(
            "[PipelineRunner] Starting pipeline: {} step(s) from index {} (cwd: {})",
            steps.len(),
            start_index,
            ctx.options.working_dir.display()
        );
        Ok(self.clone().drive(ctx, steps, start_index).await)
    }

    /// Request a pause. It takes effect before the next step that is still
    /// pending. Returns the id the snapshot will be stored under, or `None`
    /// when nothing is running.
    pub async fn pause_execution(&self, reason: PauseReason) -> Option<String> {
        let mut state = self.state.lock().await;
        let active = state.active.as_mut()?;
        if let Some((id, _)) = &active.pause_request {
            return Some(id.clone());
        }
        let pipeline_id = new_pipeline_id();
        active.pause_request = Some((pipeline_id.clone(), reason));
        tracing::info!(
            "[PipelineRunner] Pause requested ({}), pipeline id {}",
            reason.as_str(),
            pipeline_id
        );
        Some(pipeline_id)
    }

    /// Resume a paused pipeline and run it to its next stop.
    pub async fn resume_execution(&self, pipeline_id: &str) -> bool {
        match self.resume(pipeline_id).await {
            Ok(_) => true,
            Err(e) => {
                tracing::warn!("[PipelineRunner] Cannot resume {}: {}", pipeline_id, e);
                false
            }
        }
    }

    /// Like `resume_execution`, returning where the resumed run stopped.
    pub async fn resume(&self, pipeline_id: &str) -> Result<RunOutcome, PipelineError> {
        let (ctx, mut steps, index) = {
            let mut state = self.state.lock().await;
            if state.active.is_some() {
                return Err(PipelineError::AlreadyRunning);
            }
            // Taking the snapshot out first makes a second resume a no-op.
            let entry = state
                .paused
                .remove(pipeline_id)
                .ok_or_else(|| PipelineError::NotPaused(pipeline_id.to_string()))?;
            let PausedEntry { snapshot, observer } = entry;
            let ctx = Self::activate(
                &mut state,
                &snapshot.steps,
                snapshot.current_index,
                snapshot.options,
                observer,
            )?;
            (ctx, snapshot.steps, snapshot.current_index)
        };
        self.scheduler.cancel(pipeline_id);

        if let Some(step) = steps.get_mut(index) {
            if step.status == StepStatus::Paused {
                step.reset_to_pending();
            }
        }

        tracing::info!(
            "[PipelineRunner] Resuming {} at step {}/{}",
            pipeline_id,
            index + 1,
            steps.len()
        );
        Ok(self.clone().drive(ctx, steps, index).await)
    }

    /// Drop a paused snapshot (and its timer) without running it.
    pub async fn discard_paused(&self, pipeline_id: &str) -> bool {
        let removed = self.state.lock().await.paused.remove(pipeline_id).is_some();
        self.scheduler.cancel(pipeline_id);
        removed
    }

    pub async fn list_paused_executions(&self) -> Vec<PausedExecutionSummary> {
        let state = self.state.lock().await;
        let mut list: Vec<PausedExecutionSummary> = state
            .paused
            .values()
            .map(|entry| PausedExecutionSummary::from(&entry.snapshot))
            .collect();
        list.sort_by_key(|p| p.paused_at);
        list
    }

    /// Full snapshot of one paused pipeline.
    pub async fn paused_execution(&self, pipeline_id: &str) -> Option<PausedExecution> {
        let state = self.state.lock().await;
        state.paused.get(pipeline_id).map(|e| e.snapshot.clone())
    }

    /// Pipeline ids with a pending automatic resume.
    pub fn scheduled_resumes(&self) -> Vec<String> {
        self.scheduler.pending()
    }

    /// Stop the active run: kill the in-flight process and forget the run.
    /// Cancellation is not a pause; nothing can be resumed afterwards.
    pub async fn cancel(&self) -> bool {
        let mut state = self.state.lock().await;
        match state.active.take() {
            Some(active) => {
                active.cancel.cancel();
                tracing::info!("[PipelineRunner] Cancelled active pipeline");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self) -> bool {
        self.state.lock().await.active.is_some()
    }

    /// Copy of the active step list and index, for display.
    pub async fn active_steps(&self) -> Option<(Vec<Step>, usize)> {
        let state = self.state.lock().await;
        state
            .active
            .as_ref()
            .map(|a| (a.steps.clone(), a.current_index))
    }

    fn activate(
        state: &mut RunnerState,
        steps: &[Step],
        start_index: usize,
        options: RunOptions,
        observer: Arc<dyn PipelineObserver>,
    ) -> Result<RunContext, PipelineError> {
        if state.active.is_some() {
            return Err(PipelineError::AlreadyRunning);
        }
        state.next_run_id += 1;
        let run_id = state.next_run_id;
        let cancel = CancellationToken::new();
        state.active = Some(ActiveExecution {
            run_id,
            steps: steps.to_vec(),
            current_index: start_index,
            cancel: cancel.clone(),
            pause_request: None,
        });
        Ok(RunContext {
            run_id,
            cancel,
            options,
            observer,
        })
    }

    fn drive(self, ctx: RunContext, mut steps: Vec<Step>, start_index: usize) -> BoxFuture<RunOutcome> {
        Box::pin(async move {
            let mut previous_success = previous_success_before(&steps, start_index);

            for i in start_index..steps.len() {
                if ctx.cancel.is_cancelled() {
                    return RunOutcome::Cancelled(steps);
                }

                // 1. Manual pause
                if let Some((pipeline_id, reason)) = self.take_pause_request(&ctx).await {
                    if steps[i].status == StepStatus::Pending {
                        steps[i].mark_paused(None);
                        let pipeline_id = self
                            .store_pause(&ctx, Some(pipeline_id), reason, &steps, i, None)
                            .await;
                        return RunOutcome::Paused {
                            pipeline_id,
                            reason,
                            steps,
                        };
                    }
                    // Not applicable here; keep it for the next pending step.
                    self.restore_pause_request(&ctx, pipeline_id, reason).await;
                }

                // 2. Condition / check gate
                let gate = condition::evaluate(
                    self.executor.as_ref(),
                    steps[i].check.as_deref(),
                    steps[i].condition,
                    previous_success,
                    &ctx.options.working_dir,
                    &ctx.cancel,
                )
                .await;
                if ctx.cancel.is_cancelled() {
                    return RunOutcome::Cancelled(steps);
                }
                if !gate.should_run {
                    let reason = gate.reason.unwrap_or_else(|| "Skipped".to_string());
                    tracing::info!("[PipelineRunner] Skipping '{}': {}", steps[i].label(), reason);
                    steps[i].mark_skipped(reason);
                    self.publish(&ctx, &steps, i).await;
                    continue;
                }

                // 3. Running
                steps[i].mark_running();
                self.publish(&ctx, &steps, i).await;

                // 4. Session chaining
                let resume_session = chained_session(&steps, i);
                if let Some(from) = steps[i].resume_from_step_id.as_deref() {
                    match &resume_session {
                        Some(session) => tracing::debug!(
                            "[PipelineRunner] '{}' continues session {} of '{}'",
                            steps[i].label(),
                            session,
                            from
                        ),
                        None => tracing::debug!(
                            "[PipelineRunner] '{}' has no completed session to resume from '{}', starting fresh",
                            steps[i].label(),
                            from
                        ),
                    }
                }

                // 5. Invoke
                let attempt = {
                    let invocation = AgentInvocation {
                        prompt: &steps[i].prompt,
                        model: steps[i].model.as_deref(),
                        resume_session: resume_session.as_deref(),
                        options: &ctx.options,
                    };
                    attempt_step(
                        self.executor.as_ref(),
                        self.builder.as_ref(),
                        &invocation,
                        &ctx.cancel,
                    )
                    .await
                };

                match attempt {
                    StepAttempt::Cancelled => return RunOutcome::Cancelled(steps),
                    StepAttempt::Completed {
                        output, session_id, ..
                    } => {
                        steps[i].mark_completed(output, session_id);
                        previous_success = true;
                        self.publish(&ctx, &steps, i).await;
                    }
                    // 6a. Rate limited
                    StepAttempt::RateLimited { reset_time_ms, .. } => {
                        steps[i].mark_paused(Some(reset_time_ms));
                        // A manual pause requested meanwhile shares this snapshot.
                        let pipeline_id = self
                            .store_pause(
                                &ctx,
                                None,
                                PauseReason::RateLimit,
                                &steps,
                                i,
                                Some(reset_time_ms),
                            )
                            .await;
                        let delay = delay_until(reset_time_ms);
                        tracing::warn!(
                            "[PipelineRunner] Rate limited on '{}', resuming {} in {}s",
                            steps[i].label(),
                            pipeline_id,
                            delay.as_secs()
                        );
                        self.schedule_auto_resume(&pipeline_id, delay);
                        return RunOutcome::Paused {
                            pipeline_id,
                            reason: PauseReason::RateLimit,
                            steps,
                        };
                    }
                    // 6b. Failed, keep going
                    StepAttempt::Failed { error, exit_code } => {
                        tracing::warn!(
                            "[PipelineRunner] Step '{}' failed (exit {:?}): {}",
                            steps[i].label(),
                            exit_code,
                            error
                        );
                        steps[i].mark_error(error);
                        previous_success = false;
                        self.publish(&ctx, &steps, i).await;
                    }
                }
            }

            // 7. Done
            self.deactivate(&ctx).await;
            let first_error = steps
                .iter()
                .find(|s| s.status == StepStatus::Error)
                .map(|s| s.results.clone().unwrap_or_default());
            match first_error {
                Some(error) => {
                    ctx.observer.on_error(&error, &steps);
                    RunOutcome::Failed { error, steps }
                }
                None => {
                    ctx.observer.on_complete(&steps);
                    RunOutcome::Completed(steps)
                }
            }
        })
    }

    /// Mirror the step list into the active execution, then notify.
    async fn publish(&self, ctx: &RunContext, steps: &[Step], index: usize) {
        {
            let mut state = self.state.lock().await;
            if let Some(active) = state.active.as_mut().filter(|a| a.run_id == ctx.run_id) {
                active.steps = steps.to_vec();
                active.current_index = index;
            }
        }
        ctx.observer.on_progress(steps, index);
    }

    async fn take_pause_request(&self, ctx: &RunContext) -> Option<(String, PauseReason)> {
        let mut state = self.state.lock().await;
        state
            .active
            .as_mut()
            .filter(|a| a.run_id == ctx.run_id)
            .and_then(|a| a.pause_request.take())
    }

    async fn restore_pause_request(&self, ctx: &RunContext, pipeline_id: String, reason: PauseReason) {
        let mut state = self.state.lock().await;
        if let Some(active) = state.active.as_mut().filter(|a| a.run_id == ctx.run_id) {
            active.pause_request = Some((pipeline_id, reason));
        }
    }

    /// Store the snapshot, release the active slot and notify the observer
    /// under one lock, so a resume cannot start before the pause is delivered.
    ///
    /// Without an explicit id, a pending pause request donates its reserved
    /// id; otherwise a fresh one is minted. Returns the id used.
    async fn store_pause(
        &self,
        ctx: &RunContext,
        pipeline_id: Option<String>,
        reason: PauseReason,
        steps: &[Step],
        index: usize,
        resume_deadline: Option<i64>,
    ) -> String {
        let mut state = self.state.lock().await;
        let owned = take_active(&mut state, ctx.run_id);
        let requested = owned.and_then(|a| a.pause_request).map(|(id, _)| id);
        let pipeline_id = pipeline_id.or(requested).unwrap_or_else(new_pipeline_id);

        let snapshot = PausedExecution {
            pipeline_id: pipeline_id.clone(),
            steps: steps.to_vec(),
            current_index: index,
            reason,
            paused_at: Utc::now().timestamp_millis(),
            resume_deadline,
            options: ctx.options.clone(),
        };
        state.paused.insert(
            pipeline_id.clone(),
            PausedEntry {
                snapshot,
                observer: ctx.observer.clone(),
            },
        );

        ctx.observer.on_progress(steps, index);
        ctx.observer.on_paused(&pipeline_id, reason, steps);
        pipeline_id
    }

    async fn deactivate(&self, ctx: &RunContext) {
        let mut state = self.state.lock().await;
        let Some(active) = take_active(&mut state, ctx.run_id) else {
            return;
        };
        if let Some((pipeline_id, reason)) = active.pause_request {
            tracing::info!(
                "[PipelineRunner] Dropping {} pause request {}: no pending step left",
                reason.as_str(),
                pipeline_id
            );
        }
    }

    fn schedule_auto_resume(&self, pipeline_id: &str, delay: Duration) {
        let runner = self.clone();
        let id = pipeline_id.to_string();
        self.scheduler.schedule(pipeline_id, delay, async move {
            match runner.resume(&id).await {
                Ok(_) => {}
                Err(PipelineError::AlreadyRunning) => {
                    tracing::info!(
                        "[PipelineRunner] Runner busy, retrying resume of {} in {}s",
                        id,
                        BUSY_RETRY.as_secs()
                    );
                    runner.schedule_auto_resume(&id, BUSY_RETRY);
                }
                Err(e) => tracing::debug!("[PipelineRunner] Automatic resume skipped: {}", e),
            }
        });
    }
}

/// Release the active slot if it still belongs to `run_id`.
fn take_active(state: &mut RunnerState, run_id: u64) -> Option<ActiveExecution> {
    if state.active.as_ref().is_some_and(|a| a.run_id == run_id) {
        state.active.take()
    } else {
        None
    }
}

fn new_pipeline_id() -> String {
    format!("pipeline-{}", uuid::Uuid::new_v4())
}

fn delay_until(deadline_ms: i64) -> Duration {
    let remaining = deadline_ms - Utc::now().timestamp_millis();
    Duration::from_millis(remaining.max(0) as u64)
}

/// The session a step continues: the referenced step's, once that step completed.
fn chained_session(steps: &[Step], index: usize) -> Option<String> {
    let from = steps[index].resume_from_step_id.as_deref()?;
    steps
        .iter()
        .find(|s| s.id == from)
        .and_then(Step::resumable_session)
        .map(str::to_string)
}

/// Outcome of the last executed (non-skipped) step before `index`.
pub(crate) fn previous_success_before(steps: &[Step], index: usize) -> bool {
    steps[..index.min(steps.len())]
        .iter()
        .rev()
        .find_map(|s| match s.status {
            StepStatus::Completed => Some(true),
            StepStatus::Error => Some(false),
            _ => None,
        })
        .unwrap_or(true)
}
