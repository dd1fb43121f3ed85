//! Terminal progress output for pipeline and workflow runs.

use chrono::{Local, TimeZone};
use console::style;

use stepwise_core::models::{PauseReason, Step, StepStatus};
use stepwise_core::pipeline::{ChannelObserver, PipelineEvent, PipelineObserver};

/// Prints each step transition, optionally forwarding events to a channel.
pub struct ConsoleObserver {
    forward: Option<ChannelObserver>,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        Self { forward: None }
    }

    /// An observer that prints and also delivers every event to the receiver.
    pub fn forwarding() -> (Self, tokio::sync::mpsc::UnboundedReceiver<PipelineEvent>) {
        let (forward, rx) = ChannelObserver::new();
        (
            Self {
                forward: Some(forward),
            },
            rx,
        )
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineObserver for ConsoleObserver {
    fn on_progress(&self, steps: &[Step], current_index: usize) {
        if let Some(step) = steps.get(current_index) {
            println!(
                "{} {}",
                style(format!("[{}/{}]", current_index + 1, steps.len())).dim(),
                describe_step(step)
            );
        }
        if let Some(forward) = &self.forward {
            forward.on_progress(steps, current_index);
        }
    }

    fn on_complete(&self, steps: &[Step]) {
        if let Some(forward) = &self.forward {
            forward.on_complete(steps);
        }
    }

    fn on_error(&self, error: &str, steps: &[Step]) {
        if let Some(forward) = &self.forward {
            forward.on_error(error, steps);
        }
    }

    fn on_paused(&self, pipeline_id: &str, reason: PauseReason, steps: &[Step]) {
        match reason {
            PauseReason::RateLimit => {
                let until = steps
                    .iter()
                    .find_map(|s| s.paused_until)
                    .map(format_time)
                    .unwrap_or_else(|| "the reset time".to_string());
                println!(
                    "{} Rate limited; resuming {} automatically at {}",
                    style("⏸").yellow(),
                    pipeline_id,
                    until
                );
            }
            PauseReason::Manual => {
                println!("{} Paused {}", style("⏸").yellow(), pipeline_id);
            }
        }
        if let Some(forward) = &self.forward {
            forward.on_paused(pipeline_id, reason, steps);
        }
    }
}

/// One-line description of a step in its current state.
pub fn describe_step(step: &Step) -> String {
    let label = step.label();
    match step.status {
        StepStatus::Pending => format!("{} {}", style("·").dim(), label),
        StepStatus::Running => format!("{} {} running…", style("▶").cyan(), label),
        StepStatus::Completed => format!("{} {}", style("✓").green(), label),
        StepStatus::Error => format!(
            "{} {}: {}",
            style("✗").red(),
            label,
            first_line(step.results.as_deref().unwrap_or_default())
        ),
        StepStatus::Skipped => format!(
            "{} {} skipped ({})",
            style("⏭").dim(),
            label,
            step.skip_reason.as_deref().unwrap_or("no reason")
        ),
        StepStatus::Paused => match step.paused_until {
            Some(until) => format!("{} {} paused until {}", style("⏸").yellow(), label, format_time(until)),
            None => format!("{} {} paused", style("⏸").yellow(), label),
        },
    }
}

/// Final per-step summary after a run.
pub fn print_summary(steps: &[Step]) {
    let count = |status: StepStatus| steps.iter().filter(|s| s.status == status).count();
    println!();
    for (i, step) in steps.iter().enumerate() {
        println!("  {}. {}", i + 1, describe_step(step));
        if step.status == StepStatus::Completed {
            if let Some(session) = &step.session_id {
                println!("     {}", style(format!("session {}", session)).dim());
            }
        }
    }
    println!(
        "\n  {} completed, {} failed, {} skipped",
        count(StepStatus::Completed),
        count(StepStatus::Error),
        count(StepStatus::Skipped)
    );
}

pub fn format_time(epoch_ms: i64) -> String {
    match Local.timestamp_millis_opt(epoch_ms).single() {
        Some(time) => time.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => epoch_ms.to_string(),
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default()
}
