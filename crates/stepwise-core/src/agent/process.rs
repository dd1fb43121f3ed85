//! Process executor: runs one external command and captures its output.
//!
//! The executor has no retry logic. A non-zero exit is reported through
//! `ExecOutput::success`, never as an `Err`; spawn failures (missing binary,
//! permission denied) come back the same way with a distinguishing message.
//!
//! Cancelling a run kills the child outright: the wait future is dropped and
//! `kill_on_drop` sends SIGKILL on Unix. There is no SIGTERM grace period, so
//! an agent cannot flush anything on cancel. Its session survives on the
//! agent side and a later step can still `--resume` it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

/// A fully materialized command invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecRequest {
    pub argv: Vec<String>,
    pub working_dir: PathBuf,
    pub env: HashMap<String, String>,
}

impl ExecRequest {
    pub fn new(argv: Vec<String>, working_dir: impl Into<PathBuf>) -> Self {
        Self {
            argv,
            working_dir: working_dir.into(),
            env: HashMap::new(),
        }
    }

    /// A `sh -c <script>` invocation (`cmd /C` on Windows).
    pub fn shell(script: &str, working_dir: impl Into<PathBuf>) -> Self {
        let argv = if cfg!(windows) {
            vec!["cmd".to_string(), "/C".to_string(), script.to_string()]
        } else {
            vec!["sh".to_string(), "-c".to_string(), script.to_string()]
        };
        Self::new(argv, working_dir)
    }

    pub fn program(&self) -> &str {
        self.argv.first().map(String::as_str).unwrap_or("")
    }
}

/// Captured result of one invocation.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ExecOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process never ran or was killed by a signal
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    pub fn failed(exit_code: i32, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: stdout.into(),
            stderr: stderr.into(),
            exit_code: Some(exit_code),
        }
    }

    pub fn spawn_failure(program: &str, error: &str) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: format!("Failed to spawn '{}' - is it installed? Error: {}", program, error),
            exit_code: None,
        }
    }

    pub fn cancelled() -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: "Cancelled".to_string(),
            exit_code: None,
        }
    }

    /// Best human-readable failure text: stderr, else stdout, else the exit code.
    pub fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        let stdout = self.stdout.trim();
        if !stdout.is_empty() {
            return stdout.to_string();
        }
        match self.exit_code {
            Some(code) => format!("Process exited with code {}", code),
            None => "Process terminated without an exit code".to_string(),
        }
    }
}

/// Runs external commands on behalf of the pipeline runner.
#[async_trait]
pub trait ProcessExecutor: Send + Sync {
    /// Run the command to completion, or until `cancel` fires.
    async fn execute(&self, request: &ExecRequest, cancel: &CancellationToken) -> ExecOutput;
}

/// Production executor backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct ShellExecutor;

impl ShellExecutor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessExecutor for ShellExecutor {
    async fn execute(&self, request: &ExecRequest, cancel: &CancellationToken) -> ExecOutput {
        let Some((program, args)) = request.argv.split_first() else {
            return ExecOutput::spawn_failure("", "empty command line");
        };

        let mut cmd = Command::new(program);
        cmd.args(args);
        cmd.envs(&request.env);
        cmd.current_dir(&request.working_dir);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        // Dropping the wait future on cancel kills the child.
        cmd.kill_on_drop(true);

        tracing::debug!(
            "[ShellExecutor] Spawning: {} ({} arg(s), cwd: {})",
            program,
            args.len(),
            request.working_dir.display()
        );

        let child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!("[ShellExecutor] Failed to spawn '{}': {}", program, e);
                return ExecOutput::spawn_failure(program, &e.to_string());
            }
        };

        tokio::select! {
            output = child.wait_with_output() => match output {
                Ok(output) => ExecOutput {
                    success: output.status.success(),
                    stdout: String::from_utf8_lossy(&output.stdout).to_string(),
                    stderr: String::from_utf8_lossy(&output.stderr).to_string(),
                    exit_code: output.status.code(),
                },
                Err(e) => ExecOutput {
                    success: false,
                    stdout: String::new(),
                    stderr: format!("Failed to wait for '{}': {}", program, e),
                    exit_code: None,
                },
            },
            _ = cancel.cancelled() => {
                tracing::info!("[ShellExecutor] Cancelled '{}', terminating process", program);
                ExecOutput::cancelled()
            }
        }
    }
}

/// Run a check command through the shell in `working_dir`.
pub async fn run_check(
    executor: &dyn ProcessExecutor,
    command: &str,
    working_dir: &Path,
    cancel: &CancellationToken,
) -> ExecOutput {
    executor
        .execute(&ExecRequest::shell(command, working_dir), cancel)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_text_prefers_stderr() {
        let out = ExecOutput::failed(2, "partial", "  boom \n");
        assert_eq!(out.error_text(), "boom");

        let out = ExecOutput::failed(3, "only stdout", "");
        assert_eq!(out.error_text(), "only stdout");

        let out = ExecOutput::failed(4, "", "");
        assert_eq!(out.error_text(), "Process exited with code 4");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_executor_captures_exit_code() {
        let dir = tempfile::tempdir().unwrap();
        let executor = ShellExecutor::new();
        let cancel = CancellationToken::new();

        let out = run_check(&executor, "echo hello && exit 3", dir.path(), &cancel).await;
        assert!(!out.success);
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stdout.trim(), "hello");

        let out = run_check(&executor, "true", dir.path(), &cancel).await;
        assert!(out.success);
    }

    #[tokio::test]
    async fn test_spawn_failure_is_reported_not_raised() {
        let dir = tempfile::tempdir().unwrap();
        let request = ExecRequest::new(
            vec!["definitely-not-a-real-binary-4821".to_string()],
            dir.path(),
        );
        let out = ShellExecutor::new()
            .execute(&request, &CancellationToken::new())
            .await;
        assert!(!out.success);
        assert_eq!(out.exit_code, None);
        assert!(out.stderr.starts_with("Failed to spawn 'definitely-not-a-real-binary-4821'"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_cancel_terminates_running_process() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let out = run_check(&ShellExecutor::new(), "sleep 30", dir.path(), &cancel).await;
        assert!(!out.success);
        assert_eq!(out.stderr, "Cancelled");
        assert_eq!(out.exit_code, None);
        assert!(started.elapsed() < std::time::Duration::from_secs(10));
    }
}
