//! Agent output parsing.
//!
//! With `--output-format json` the agent prints one result object:
//!
//! ```json
//! {"type":"result","subtype":"success","is_error":false,"result":"...","session_id":"..."}
//! ```
//!
//! Stream-json output is NDJSON where the last `result` line carries the same
//! fields and a `system`/`init` line announces the session id first.

use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
struct AgentOutputMessage {
    #[serde(rename = "type", default)]
    msg_type: String,
    subtype: Option<String>,
    session_id: Option<String>,
    result: Option<String>,
    is_error: Option<bool>,
}

/// What a step keeps from a successful agent run.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AgentOutput {
    pub text: String,
    pub session_id: Option<String>,
    /// The agent reported an error even though the process may have exited 0
    pub is_error: bool,
}

pub fn parse_agent_output(stdout: &str) -> AgentOutput {
    let trimmed = stdout.trim();

    if trimmed.starts_with('{') {
        if let Ok(msg) = serde_json::from_str::<AgentOutputMessage>(trimmed) {
            if msg.msg_type == "result" || msg.result.is_some() {
                return from_result(msg, None);
            }
        }
    }

    let mut init_session: Option<String> = None;
    let mut last_result: Option<AgentOutputMessage> = None;
    for line in trimmed.lines() {
        let line = clear_ansi(line.trim());
        if !line.starts_with('{') {
            continue;
        }
        match serde_json::from_str::<AgentOutputMessage>(&line) {
            Ok(msg) if msg.msg_type == "system" && msg.subtype.as_deref() == Some("init") => {
                if msg.session_id.is_some() {
                    init_session = msg.session_id;
                }
            }
            Ok(msg) if msg.msg_type == "result" => last_result = Some(msg),
            Ok(_) => {}
            Err(e) => {
                tracing::debug!("[AgentOutput] Skipping unparsable line: {}", e);
            }
        }
    }

    match last_result {
        Some(msg) => from_result(msg, init_session),
        None => AgentOutput {
            text: clear_ansi(trimmed),
            session_id: init_session,
            is_error: false,
        },
    }
}

fn from_result(msg: AgentOutputMessage, fallback_session: Option<String>) -> AgentOutput {
    let is_error = msg.is_error.unwrap_or(false)
        || msg.subtype.as_deref().is_some_and(|s| s.starts_with("error"));
    AgentOutput {
        text: msg.result.unwrap_or_default(),
        session_id: msg.session_id.filter(|s| !s.is_empty()).or(fallback_session),
        is_error,
    }
}

fn clear_ansi(text: &str) -> String {
    static ANSI: OnceLock<Regex> = OnceLock::new();
    let re = ANSI.get_or_init(|| Regex::new(r"\x1b\[[0-9;]*m").unwrap());
    re.replace_all(text, "").to_string()
}
