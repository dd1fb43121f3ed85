//! Scripted executor for engine tests.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::agent::{ExecOutput, ExecRequest, ProcessExecutor};

/// Replays canned agent outputs in call order and records every request.
///
/// Shell check commands (`sh -c ...`) are answered from a separate table and
/// succeed unless scripted otherwise. Once the agent queue is empty every
/// call succeeds with a fresh `session-<n>` id.
#[derive(Default)]
pub struct FakeExecutor {
    agent_outputs: Mutex<VecDeque<ExecOutput>>,
    check_outputs: Mutex<HashMap<String, ExecOutput>>,
    calls: Mutex<Vec<ExecRequest>>,
    block_when_empty: AtomicBool,
    latency: Mutex<Option<Duration>>,
    sessions: AtomicUsize,
}

impl FakeExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, output: ExecOutput) -> &Self {
        self.agent_outputs.lock().unwrap().push_back(output);
        self
    }

    pub fn push_result(&self, text: &str, session_id: &str) -> &Self {
        self.push(agent_result(text, session_id))
    }

    pub fn push_failure(&self, stderr: &str) -> &Self {
        self.push(ExecOutput::failed(1, "", stderr))
    }

    pub fn script_check(&self, script: &str, output: ExecOutput) -> &Self {
        self.check_outputs
            .lock()
            .unwrap()
            .insert(script.to_string(), output);
        self
    }

    /// Once the queue is drained, hang until cancelled.
    pub fn block_when_empty(&self) -> &Self {
        self.block_when_empty.store(true, Ordering::SeqCst);
        self
    }

    /// Every agent call sleeps this long before answering.
    pub fn delay_agent_calls(&self, latency: Duration) -> &Self {
        *self.latency.lock().unwrap() = Some(latency);
        self
    }

    /// Argv of every agent (non-check) invocation, in order.
    pub fn agent_calls(&self) -> Vec<Vec<String>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| !is_check(r))
            .map(|r| r.argv.clone())
            .collect()
    }

    /// Value following `flag` in the n-th agent invocation.
    pub fn flag_value(&self, call: usize, flag: &str) -> Option<String> {
        let calls = self.agent_calls();
        let argv = calls.get(call)?;
        let pos = argv.iter().position(|a| a == flag)?;
        argv.get(pos + 1).cloned()
    }
}

pub fn agent_result(text: &str, session_id: &str) -> ExecOutput {
    ExecOutput::ok(
        serde_json::json!({
            "type": "result",
            "subtype": "success",
            "is_error": false,
            "result": text,
            "session_id": session_id,
        })
        .to_string(),
    )
}

fn is_check(request: &ExecRequest) -> bool {
    matches!(request.program(), "sh" | "cmd")
}

#[async_trait]
impl ProcessExecutor for FakeExecutor {
    async fn execute(&self, request: &ExecRequest, cancel: &CancellationToken) -> ExecOutput {
        self.calls.lock().unwrap().push(request.clone());

        if is_check(request) {
            let script = request.argv.last().cloned().unwrap_or_default();
            return self
                .check_outputs
                .lock()
                .unwrap()
                .get(&script)
                .cloned()
                .unwrap_or_else(|| ExecOutput::ok(""));
        }

        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.agent_outputs.lock().unwrap().pop_front();
        if let Some(output) = scripted {
            return output;
        }
        if self.block_when_empty.load(Ordering::SeqCst) {
            cancel.cancelled().await;
            return ExecOutput::cancelled();
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst);
        agent_result("ok", &format!("session-{}", n))
    }
}
