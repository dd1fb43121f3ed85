//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and drives the
//! stepwise-core engine directly.

pub mod progress;
pub mod run;
pub mod workflow;

use std::path::{Path, PathBuf};

use stepwise_core::models::RunOptions;
use stepwise_core::EngineConfig;

/// Load the engine config (explicit path, project, home, defaults).
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig, String> {
    EngineConfig::load(path)
}

/// Run options from CLI flags, falling back to the config.
///
/// Model precedence: `--model`, then `file_model`, then `default_model`.
pub fn run_options(
    config: &EngineConfig,
    model: Option<String>,
    file_model: Option<String>,
    cwd: Option<PathBuf>,
) -> Result<RunOptions, String> {
    let working_dir = match cwd {
        Some(dir) => dir,
        None => std::env::current_dir()
            .map_err(|e| format!("Cannot determine the current directory: {}", e))?,
    };
    if !working_dir.is_dir() {
        return Err(format!(
            "Working directory '{}' does not exist",
            working_dir.display()
        ));
    }

    let mut options = RunOptions::new(working_dir);
    options.model = model.or(file_model).or_else(|| config.default_model.clone());
    Ok(options)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_precedence() {
        let config = EngineConfig {
            default_model: Some("haiku".into()),
            ..EngineConfig::default()
        };
        let cwd = Some(std::env::temp_dir());

        let options = run_options(&config, Some("opus".into()), Some("sonnet".into()), cwd.clone()).unwrap();
        assert_eq!(options.model.as_deref(), Some("opus"));

        let options = run_options(&config, None, Some("sonnet".into()), cwd.clone()).unwrap();
        assert_eq!(options.model.as_deref(), Some("sonnet"));

        let options = run_options(&config, None, None, cwd).unwrap();
        assert_eq!(options.model.as_deref(), Some("haiku"));
    }

    #[test]
    fn test_missing_working_dir() {
        let err = run_options(
            &EngineConfig::default(),
            None,
            None,
            Some(PathBuf::from("/definitely/not/here")),
        )
        .unwrap_err();
        assert!(err.contains("does not exist"));
    }
}
