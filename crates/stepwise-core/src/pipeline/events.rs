//! Progress reporting for pipeline runs.
//!
//! Observers are called synchronously from inside the runner loop, in step
//! order. They must return quickly; anything slow belongs on the other side
//! of a `ChannelObserver`.

use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::models::{PauseReason, Step};

pub trait PipelineObserver: Send + Sync {
    fn on_progress(&self, steps: &[Step], current_index: usize);
    fn on_complete(&self, steps: &[Step]);
    fn on_error(&self, error: &str, steps: &[Step]);

    /// Called after a pause snapshot has been stored.
    fn on_paused(&self, _pipeline_id: &str, _reason: PauseReason, _steps: &[Step]) {}
}

/// Discards every notification.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl PipelineObserver for NoopObserver {
    fn on_progress(&self, _steps: &[Step], _current_index: usize) {}
    fn on_complete(&self, _steps: &[Step]) {}
    fn on_error(&self, _error: &str, _steps: &[Step]) {}
}

/// Logs each transition through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingObserver;

impl PipelineObserver for LoggingObserver {
    fn on_progress(&self, steps: &[Step], current_index: usize) {
        if let Some(step) = steps.get(current_index) {
            tracing::info!(
                "[Pipeline] Step {}/{} '{}' → {}",
                current_index + 1,
                steps.len(),
                step.label(),
                step.status
            );
        }
    }

    fn on_complete(&self, steps: &[Step]) {
        tracing::info!("[Pipeline] Completed ({} step(s))", steps.len());
    }

    fn on_error(&self, error: &str, _steps: &[Step]) {
        tracing::warn!("[Pipeline] Finished with errors: {}", error);
    }

    fn on_paused(&self, pipeline_id: &str, reason: PauseReason, _steps: &[Step]) {
        tracing::info!("[Pipeline] Paused {} ({})", pipeline_id, reason.as_str());
    }
}

/// A typed runner notification, as delivered by `ChannelObserver`.
#[derive(Debug, Clone)]
pub enum PipelineEvent {
    Progress {
        steps: Vec<Step>,
        current_index: usize,
    },
    Complete {
        steps: Vec<Step>,
    },
    Error {
        error: String,
        steps: Vec<Step>,
    },
    Paused {
        pipeline_id: String,
        reason: PauseReason,
        steps: Vec<Step>,
    },
}

/// Forwards runner notifications into an unbounded channel.
///
/// Sending never blocks the runner; events are dropped once the receiver
/// is gone.
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    tx: mpsc::UnboundedSender<PipelineEvent>,
}

impl ChannelObserver {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<PipelineEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Same as `new`, with the receiving side wrapped as a `Stream`.
    pub fn with_stream() -> (Self, UnboundedReceiverStream<PipelineEvent>) {
        let (observer, rx) = Self::new();
        (observer, UnboundedReceiverStream::new(rx))
    }

    fn send(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }
}

impl PipelineObserver for ChannelObserver {
    fn on_progress(&self, steps: &[Step], current_index: usize) {
        self.send(PipelineEvent::Progress {
            steps: steps.to_vec(),
            current_index,
        });
    }

    fn on_complete(&self, steps: &[Step]) {
        self.send(PipelineEvent::Complete {
            steps: steps.to_vec(),
        });
    }

    fn on_error(&self, error: &str, steps: &[Step]) {
        self.send(PipelineEvent::Error {
            error: error.to_string(),
            steps: steps.to_vec(),
        });
    }

    fn on_paused(&self, pipeline_id: &str, reason: PauseReason, steps: &[Step]) {
        self.send(PipelineEvent::Paused {
            pipeline_id: pipeline_id.to_string(),
            reason,
            steps: steps.to_vec(),
        });
    }
}
