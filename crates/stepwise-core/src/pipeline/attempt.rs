//! One agent invocation for one step, classified for the runner loop.

use tokio_util::sync::CancellationToken;

use crate::agent::{parse_agent_output, AgentInvocation, CommandBuilder, ExecRequest, ProcessExecutor};
use crate::pipeline::rate_limit;

#[derive(Debug, Clone, PartialEq)]
pub enum StepAttempt {
    Completed {
        output: String,
        session_id: Option<String>,
        exit_code: Option<i32>,
    },
    Failed {
        error: String,
        exit_code: Option<i32>,
    },
    /// Transient backpressure; retry after `reset_time_ms` (epoch-ms)
    RateLimited {
        reset_time_ms: i64,
        error: String,
    },
    Cancelled,
}

pub async fn attempt_step(
    executor: &dyn ProcessExecutor,
    builder: &dyn CommandBuilder,
    invocation: &AgentInvocation<'_>,
    cancel: &CancellationToken,
) -> StepAttempt {
    let argv = builder.build(invocation);
    let request = ExecRequest::new(argv, invocation.options.working_dir.clone());
    let output = executor.execute(&request, cancel).await;

    if cancel.is_cancelled() {
        return StepAttempt::Cancelled;
    }

    let error = if output.success {
        let parsed = parse_agent_output(&output.stdout);
        if !parsed.is_error {
            return StepAttempt::Completed {
                output: parsed.text,
                session_id: parsed.session_id,
                exit_code: output.exit_code,
            };
        }
        if parsed.text.trim().is_empty() {
            output.error_text()
        } else {
            parsed.text
        }
    } else {
        output.error_text()
    };

    let limit = rate_limit::detect_in_output(&output.stdout, &output.stderr);
    match limit.reset_time_ms {
        Some(reset_time_ms) if limit.is_rate_limited => StepAttempt::RateLimited {
            reset_time_ms,
            error,
        },
        _ => StepAttempt::Failed {
            error,
            exit_code: output.exit_code,
        },
    }
}
