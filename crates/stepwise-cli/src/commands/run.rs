//! `stepwise run`: Run a pipeline file (a list of steps) to completion.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stepwise_core::agent::{ClaudeCommandBuilder, ShellExecutor};
use stepwise_core::models::{PauseReason, PipelineFile, Step};
use stepwise_core::pipeline::{PipelineEvent, PipelineRunner, RunOutcome};
use stepwise_core::EngineConfig;
use tokio::sync::mpsc::UnboundedReceiver;

use super::progress::{print_summary, ConsoleObserver};

/// Run the steps in `file`. Rate-limit pauses are waited out in-process;
/// Ctrl-C cancels the run.
pub async fn run(
    config: &EngineConfig,
    file: &Path,
    model: Option<String>,
    cwd: Option<PathBuf>,
    start_index: usize,
) -> Result<(), String> {
    let pipeline = PipelineFile::from_file(file).map_err(|e| e.to_string())?;
    if pipeline.steps.is_empty() {
        return Err(format!("Pipeline '{}' has no steps", file.display()));
    }
    let options = super::run_options(config, model, pipeline.model.clone(), cwd)?;

    println!(
        "📄 Loaded pipeline: {} ({} step(s))",
        file.display(),
        pipeline.steps.len()
    );
    println!("   Working directory: {}", options.working_dir.display());
    println!();

    let runner = PipelineRunner::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(ClaudeCommandBuilder::from_config(config)),
    );
    let (observer, mut events) = ConsoleObserver::forwarding();

    let run = runner.run(pipeline.steps, options, Arc::new(observer), start_index);
    tokio::pin!(run);
    let outcome = tokio::select! {
        outcome = &mut run => outcome,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[CLI] Ctrl-C received, cancelling pipeline");
            eprintln!("\nCancelling…");
            runner.cancel().await;
            run.await
        }
    };
    let outcome = outcome.map_err(|e| e.to_string())?;

    let outcome = match outcome {
        RunOutcome::Paused {
            reason: PauseReason::RateLimit,
            ..
        } => {
            tracing::info!("[CLI] Waiting for the scheduled resume");
            wait_for_resume(&runner, &mut events).await?
        }
        other => other,
    };

    finish(outcome)
}

/// Block until an automatically resumed run completes or fails.
async fn wait_for_resume(
    runner: &PipelineRunner,
    events: &mut UnboundedReceiver<PipelineEvent>,
) -> Result<RunOutcome, String> {
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(PipelineEvent::Complete { steps }) => return Ok(RunOutcome::Completed(steps)),
                Some(PipelineEvent::Error { error, steps }) => {
                    return Ok(RunOutcome::Failed { error, steps })
                }
                // Progress and further pauses: keep waiting
                Some(_) => {}
                None => return Err("Pipeline runner stopped unexpectedly".to_string()),
            },
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\nCancelling…");
                runner.cancel().await;
                let paused = runner.list_paused_executions().await;
                for entry in &paused {
                    runner.discard_paused(&entry.pipeline_id).await;
                }
                let steps: Vec<Step> = paused.into_iter().next().map(|p| p.steps).unwrap_or_default();
                return Ok(RunOutcome::Cancelled(steps));
            }
        }
    }
}

fn finish(outcome: RunOutcome) -> Result<(), String> {
    print_summary(outcome.steps());
    match outcome {
        RunOutcome::Completed(_) => {
            println!("\n🎉 Pipeline completed successfully!");
            Ok(())
        }
        RunOutcome::Failed { error, .. } => Err(format!("Pipeline finished with errors: {}", error)),
        RunOutcome::Cancelled(_) => Err("Pipeline cancelled".to_string()),
        RunOutcome::Paused { pipeline_id, .. } => Err(format!(
            "Pipeline paused ({}) and cannot be resumed after this process exits",
            pipeline_id
        )),
    }
}
