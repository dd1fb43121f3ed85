//! Engine configuration.
//!
//! Resolution order (later wins):
//! 1. built-in defaults
//! 2. the first config file found: explicit path, `./.stepwise/config.yaml`,
//!    `~/.stepwise/config.yaml`
//! 3. `STEPWISE_AGENT_COMMAND` / `STEPWISE_MODEL` environment variables
//!
//! ```yaml
//! agent_command: claude
//! default_model: sonnet
//! permission_mode: acceptEdits
//! extra_args: ["--verbose"]
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

pub const CONFIG_DIR: &str = ".stepwise";
pub const CONFIG_FILE: &str = "config.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Agent executable (usually "claude")
    #[serde(default = "default_agent_command")]
    pub agent_command: String,

    /// Model used when neither the step nor the run names one
    #[serde(default)]
    pub default_model: Option<String>,

    /// Permission mode: "bypassPermissions" | "acceptEdits" | "plan" | ...
    #[serde(default = "default_permission_mode")]
    pub permission_mode: Option<String>,

    /// Extra arguments appended to every agent invocation
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_agent_command() -> String {
    "claude".to_string()
}

fn default_permission_mode() -> Option<String> {
    Some("bypassPermissions".to_string())
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            agent_command: default_agent_command(),
            default_model: None,
            permission_mode: default_permission_mode(),
            extra_args: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, String> {
        serde_yaml::from_str(yaml).map_err(|e| format!("Failed to parse config YAML: {}", e))
    }

    pub fn from_file(path: &Path) -> Result<Self, String> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file '{}': {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Load the effective configuration. An explicit path must exist; the
    /// default locations are optional.
    pub fn load(explicit: Option<&Path>) -> Result<Self, String> {
        let mut config = match explicit {
            Some(path) => Self::from_file(path)?,
            None => match default_locations().into_iter().find(|p| p.is_file()) {
                Some(path) => {
                    tracing::info!("[Config] Loaded configuration from '{}'", path.display());
                    Self::from_file(&path)?
                }
                None => Self::default(),
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(command) = lookup("STEPWISE_AGENT_COMMAND").filter(|v| !v.is_empty()) {
            self.agent_command = command;
        }
        if let Some(model) = lookup("STEPWISE_MODEL").filter(|v| !v.is_empty()) {
            self.default_model = Some(model);
        }
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_DIR).join(CONFIG_FILE)];
    if let Some(home) = dirs::home_dir() {
        paths.push(home.join(CONFIG_DIR).join(CONFIG_FILE));
    }
    paths
}
