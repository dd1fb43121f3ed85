//! Command builder: turns a resolved step into an agent argv.

use crate::config::EngineConfig;
use crate::models::RunOptions;

/// Everything needed to invoke the agent for one step.
#[derive(Debug, Clone, Copy)]
pub struct AgentInvocation<'a> {
    pub prompt: &'a str,
    /// Step model, falling back to the run default when `None`
    pub model: Option<&'a str>,
    /// Session to continue instead of starting a fresh conversation
    pub resume_session: Option<&'a str>,
    pub options: &'a RunOptions,
}

pub trait CommandBuilder: Send + Sync {
    fn build(&self, invocation: &AgentInvocation<'_>) -> Vec<String>;
}

/// Builds `claude -p <prompt> --output-format json ...` command lines.
///
/// Arguments are passed as separate argv entries, never through a shell, so
/// prompts need no escaping.
#[derive(Debug, Clone)]
pub struct ClaudeCommandBuilder {
    /// Command to run (usually "claude")
    pub command: String,
    /// Permission mode used when the run options do not set one
    pub permission_mode: Option<String>,
    /// Arguments appended to every invocation
    pub extra_args: Vec<String>,
}

impl Default for ClaudeCommandBuilder {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            permission_mode: Some("bypassPermissions".to_string()),
            extra_args: Vec::new(),
        }
    }
}

impl ClaudeCommandBuilder {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            command: config.agent_command.clone(),
            permission_mode: config.permission_mode.clone(),
            extra_args: config.extra_args.clone(),
        }
    }
}

impl CommandBuilder for ClaudeCommandBuilder {
    fn build(&self, invocation: &AgentInvocation<'_>) -> Vec<String> {
        let mut argv = vec![
            self.command.clone(),
            "-p".to_string(),
            invocation.prompt.to_string(),
            "--output-format".to_string(),
            "json".to_string(),
        ];

        let model = invocation.model.or(invocation.options.model.as_deref());
        if let Some(model) = model.filter(|m| !m.is_empty()) {
            argv.push("--model".to_string());
            argv.push(model.to_string());
        }

        if let Some(session) = invocation.resume_session.filter(|s| !s.is_empty()) {
            argv.push("--resume".to_string());
            argv.push(session.to_string());
        }

        let permission_mode = invocation
            .options
            .permission_mode
            .as_deref()
            .or(self.permission_mode.as_deref());
        match permission_mode {
            Some("bypassPermissions") => argv.push("--dangerously-skip-permissions".to_string()),
            Some(mode) => {
                argv.push("--permission-mode".to_string());
                argv.push(mode.to_string());
            }
            None => {}
        }

        argv.extend(self.extra_args.iter().cloned());
        argv.extend(invocation.options.extra_args.iter().cloned());
        argv
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_fresh_session() {
        let options = RunOptions::new("/tmp").with_model("sonnet");
        let argv = ClaudeCommandBuilder::default().build(&AgentInvocation {
            prompt: "say \"hi\"; rm -rf /",
            model: None,
            resume_session: None,
            options: &options,
        });
        assert_eq!(
            argv,
            vec![
                "claude",
                "-p",
                "say \"hi\"; rm -rf /",
                "--output-format",
                "json",
                "--model",
                "sonnet",
                "--dangerously-skip-permissions",
            ]
        );
    }

    #[test]
    fn test_build_resume_and_step_model_override() {
        let mut options = RunOptions::new("/tmp").with_model("sonnet");
        options.permission_mode = Some("acceptEdits".to_string());
        options.extra_args = vec!["--verbose".to_string()];
        let argv = ClaudeCommandBuilder::default().build(&AgentInvocation {
            prompt: "continue",
            model: Some("opus"),
            resume_session: Some("abc"),
            options: &options,
        });
        let joined = argv.join(" ");
        assert!(joined.contains("--model opus"));
        assert!(!joined.contains("sonnet"));
        assert!(joined.contains("--resume abc"));
        assert!(joined.contains("--permission-mode acceptEdits"));
        assert_eq!(argv.last().map(String::as_str), Some("--verbose"));
    }
}
