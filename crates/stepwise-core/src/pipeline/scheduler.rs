//! Deferred resume timers keyed by pipeline id.
//!
//! Each paused pipeline owns at most one timer. Scheduling again replaces the
//! previous timer; a manual resume cancels it so the pipeline never resumes twice.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::task::JoinHandle;

#[derive(Clone, Default)]
pub struct ResumeScheduler {
    timers: Arc<Mutex<HashMap<String, JoinHandle<()>>>>,
}

impl ResumeScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `task` after `delay`. A zero delay still runs on a separate task.
    pub fn schedule<F>(&self, pipeline_id: &str, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        // Hold the map while spawning so a zero-delay timer cannot finish
        // before its entry exists.
        let mut timers = self.lock();
        let shared = self.timers.clone();
        let id = pipeline_id.to_string();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Drop our own entry before running so the task can reschedule.
            if let Ok(mut timers) = shared.lock() {
                timers.remove(&id);
            }
            task.await;
        });
        if let Some(previous) = timers.insert(pipeline_id.to_string(), handle) {
            previous.abort();
        }
        drop(timers);
        tracing::debug!(
            "[ResumeScheduler] Scheduled resume of {} in {:?}",
            pipeline_id,
            delay
        );
    }

    /// Cancel the timer for `pipeline_id`. Returns whether one was pending.
    pub fn cancel(&self, pipeline_id: &str) -> bool {
        match self.lock().remove(pipeline_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) {
        for (_, handle) in self.lock().drain() {
            handle.abort();
        }
    }

    /// Ids of pipelines with a live timer.
    pub fn pending(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, JoinHandle<()>>> {
        self.timers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
