//! `stepwise workflow`: Run and inspect YAML-defined workflows.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use console::style;
use stepwise_core::agent::{ClaudeCommandBuilder, ShellExecutor};
use stepwise_core::joblog::{self, JobStepStatus};
use stepwise_core::workflow::{WorkflowDefinition, WorkflowExecutor, WorkflowStatus};
use stepwise_core::{EngineConfig, PipelineError};

use super::progress::ConsoleObserver;

/// Parse repeated `--input key=value` flags.
pub fn parse_inputs(raw: &[String]) -> Result<HashMap<String, String>, String> {
    let mut inputs = HashMap::new();
    for item in raw {
        let (key, value) = item
            .split_once('=')
            .ok_or_else(|| format!("Invalid --input '{}': expected key=value", item))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("Invalid --input '{}': empty key", item));
        }
        inputs.insert(key.to_string(), value.to_string());
    }
    Ok(inputs)
}

/// Run a workflow, resuming from its job log unless `fresh` is set.
pub async fn run(
    config: &EngineConfig,
    workflow_file: &Path,
    inputs: &[String],
    cwd: Option<PathBuf>,
    fresh: bool,
) -> Result<(), String> {
    let inputs = parse_inputs(inputs)?;
    let workflow = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;
    let options = super::run_options(config, None, None, cwd)?;

    println!("📄 Loaded workflow: {} ({})", workflow.name, workflow_file.display());
    println!(
        "   {} job(s), {} step(s)",
        workflow.jobs.len(),
        workflow.step_count()
    );
    println!();

    let log_path = joblog::log_path_for(workflow_file);
    if fresh && joblog::remove(&log_path).map_err(|e| e.to_string())? {
        tracing::info!("[CLI] Removed job log {} (--fresh)", log_path.display());
        println!("   Discarded previous job log {}", log_path.display());
    }

    let executor = WorkflowExecutor::new(
        Arc::new(ShellExecutor::new()),
        Arc::new(ClaudeCommandBuilder::from_config(config)),
        options,
    )
    .with_observer(Arc::new(ConsoleObserver::new()));

    let cancel = executor.cancel_token();
    let ctrl_c = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("[CLI] Ctrl-C received, cancelling workflow");
            eprintln!("\nCancelling…");
            cancel.cancel();
        }
    });

    let result = executor
        .resume_from_log(&workflow, workflow_file, &inputs)
        .await;
    ctrl_c.abort();

    match result {
        Ok(execution) if execution.status == WorkflowStatus::Completed => {
            println!("\n🎉 Workflow completed successfully!");
            Ok(())
        }
        Ok(execution) => {
            let failed: Vec<&str> = execution
                .outputs
                .iter()
                .filter(|(_, outputs)| {
                    outputs.get("status").and_then(|v| v.as_str()) == Some("failed")
                })
                .map(|(id, _)| id.as_str())
                .collect();
            Err(format!("Workflow failed. Failed steps: {}", failed.join(", ")))
        }
        Err(PipelineError::Cancelled) => Err(format!(
            "Workflow cancelled; run it again to resume from {}",
            log_path.display()
        )),
        Err(e) => Err(e.to_string()),
    }
}

/// Validate a workflow YAML file without executing it.
pub fn validate(workflow_file: &Path) -> Result<(), String> {
    let workflow = WorkflowDefinition::from_file(workflow_file).map_err(|e| e.to_string())?;
    workflow.validate().map_err(|e| e.to_string())?;

    println!("✅ Workflow '{}' is valid", workflow.name);
    if let Some(description) = &workflow.description {
        println!("   {}", description);
    }
    for (name, input) in &workflow.inputs {
        let mut line = format!("   input {}", name);
        if input.required {
            line.push_str(" (required)");
        }
        if let Some(default) = &input.default {
            line.push_str(&format!(" [default: {}]", default));
        }
        println!("{}", line);
    }

    let mut n = 0;
    for job in &workflow.jobs {
        println!("   job {}", job.name.as_deref().unwrap_or(&job.id));
        for step in &job.steps {
            n += 1;
            let condition = step
                .condition
                .map(|c| format!(" [{}]", c.as_str()))
                .unwrap_or_default();
            println!("     {}. {}{}", n, step.label(), condition);
        }
    }
    Ok(())
}

/// Print the job log next to `workflow_file`.
pub fn status(workflow_file: &Path, json: bool) -> Result<(), String> {
    let log_path = joblog::log_path_for(workflow_file);
    let Some(log) = joblog::load(&log_path).map_err(|e| e.to_string())? else {
        if json {
            println!("null");
        } else {
            println!("No job log for {} (nothing to resume)", workflow_file.display());
        }
        return Ok(());
    };

    if json {
        let text = serde_json::to_string_pretty(&log)
            .map_err(|e| format!("Failed to serialize job log: {}", e))?;
        println!("{}", text);
        return Ok(());
    }

    println!("Workflow:    {}", log.workflow_name);
    println!("Execution:   {}", log.execution_id);
    println!("Status:      {}", log.status.as_str());
    println!("Started:     {}", log.start_time.to_rfc3339());
    println!("Updated:     {}", log.last_update_time.to_rfc3339());
    println!(
        "Progress:    {}/{} step(s), next run starts at step {}",
        log.last_completed_step + 1,
        log.total_steps,
        joblog::resume_step_index(&log) + 1
    );
    println!();

    for step in &log.steps {
        let marker = match step.status {
            JobStepStatus::Completed => style("✓").green(),
            JobStepStatus::Failed => style("✗").red(),
            JobStepStatus::Skipped => style("⏭").dim(),
            JobStepStatus::Paused => style("⏸").yellow(),
            JobStepStatus::Running => style("▶").cyan(),
        };
        let duration = step
            .duration
            .map(|ms| format!(" ({:.1}s)", ms as f64 / 1000.0))
            .unwrap_or_default();
        println!(
            "  {} {}. {} {}{}",
            marker,
            step.index + 1,
            step.name.as_deref().unwrap_or(&step.id),
            step.status.as_str(),
            duration
        );
        if let Some(error) = &step.error {
            println!("       {}", error.lines().next().unwrap_or_default());
        }
    }
    Ok(())
}

/// Delete the job log so the next run starts fresh.
pub fn clean(workflow_file: &Path) -> Result<(), String> {
    let log_path = joblog::log_path_for(workflow_file);
    if joblog::remove(&log_path).map_err(|e| e.to_string())? {
        println!("🧹 Removed {}", log_path.display());
    } else {
        println!("No job log at {}", log_path.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_inputs() {
        let inputs = parse_inputs(&["target=src".to_string(), "query=a=b".to_string()]).unwrap();
        assert_eq!(inputs["target"], "src");
        assert_eq!(inputs["query"], "a=b");

        assert!(parse_inputs(&["novalue".to_string()]).is_err());
        assert!(parse_inputs(&["=x".to_string()]).is_err());
    }
}
