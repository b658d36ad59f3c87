//! Settings manager implementation
//!
//! Handles loading, merging, and accessing settings from multiple sources.

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::types::{CommandPatternConfig, ExecutionConfig, Result, ToolError, ToolServerConfig};

/// Settings file names
const USER_SETTINGS_DIR: &str = ".toolhost";
const PROJECT_SETTINGS_DIR: &str = ".toolhost";
const SETTINGS_FILE: &str = "settings.json";
const LOCAL_SETTINGS_FILE: &str = "settings.local.json";

/// Tool host settings structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    /// Shell binary used for command execution
    #[serde(default)]
    pub shell: Option<String>,

    /// Allow-list for command execution
    #[serde(default)]
    pub allowed_commands: Option<Vec<CommandPatternConfig>>,

    /// External tool servers by name
    #[serde(default)]
    pub mcp_servers: Option<HashMap<String, McpServerConfig>>,

    /// Environment variables for spawned commands and tool servers
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Additional settings as raw JSON
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// External tool server entry as written in settings files
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct McpServerConfig {
    /// Command to start the server
    pub command: String,

    /// Arguments for the command
    #[serde(default)]
    pub args: Vec<String>,

    /// Environment variables for the server
    #[serde(default)]
    pub env: Option<HashMap<String, String>>,

    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,

    /// Whether the server is disabled
    #[serde(default)]
    pub disabled: bool,
}

impl Settings {
    /// Create empty settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge another settings into this one
    ///
    /// Values from `other` take precedence over `self`. Allow-list entries
    /// from all sources are concatenated.
    pub fn merge(&mut self, other: Settings) {
        if other.shell.is_some() {
            self.shell = other.shell;
        }
        if let Some(other_allowed) = other.allowed_commands {
            let allowed = self.allowed_commands.get_or_insert_with(Vec::new);
            for pattern in other_allowed {
                if !allowed.iter().any(|p| p.pattern == pattern.pattern) {
                    allowed.push(pattern);
                }
            }
        }
        if let Some(other_servers) = other.mcp_servers {
            let servers = self.mcp_servers.get_or_insert_with(HashMap::new);
            servers.extend(other_servers);
        }
        if let Some(other_env) = other.env {
            let env = self.env.get_or_insert_with(HashMap::new);
            env.extend(other_env);
        }
        self.extra.extend(other.extra);
    }
}

/// Settings manager for loading and accessing settings
#[derive(Debug, Default)]
pub struct SettingsManager {
    /// The merged settings
    settings: Settings,
}

impl SettingsManager {
    /// Create a new settings manager and load settings
    ///
    /// # Arguments
    ///
    /// * `project_dir` - The project working directory
    pub fn new(project_dir: impl AsRef<Path>) -> Result<Self> {
        Self::with_extra_file(project_dir, None)
    }

    /// Create a settings manager that also merges an explicit file
    ///
    /// The explicit file must exist and parse; it has the highest priority.
    pub fn with_extra_file(project_dir: impl AsRef<Path>, extra_file: Option<&Path>) -> Result<Self> {
        let settings = Self::load_all_settings(project_dir.as_ref(), extra_file)?;
        Ok(Self { settings })
    }

    /// Load and merge all settings sources
    ///
    /// Priority: Explicit > Local > Project > User
    fn load_all_settings(project_dir: &Path, extra_file: Option<&Path>) -> Result<Settings> {
        let mut settings = Settings::new();

        if let Some(user_settings) = Self::load_user_settings() {
            tracing::debug!("Loaded user settings");
            settings.merge(user_settings);
        }

        let project_path = project_dir.join(PROJECT_SETTINGS_DIR).join(SETTINGS_FILE);
        if let Some(project_settings) = Self::load_settings_file(&project_path) {
            tracing::debug!("Loaded project settings from {:?}", project_dir);
            settings.merge(project_settings);
        }

        let local_path = project_dir
            .join(PROJECT_SETTINGS_DIR)
            .join(LOCAL_SETTINGS_FILE);
        if let Some(local_settings) = Self::load_settings_file(&local_path) {
            tracing::debug!("Loaded local settings from {:?}", project_dir);
            settings.merge(local_settings);
        }

        if let Some(path) = extra_file {
            let content = std::fs::read_to_string(path).map_err(|e| {
                ToolError::config_error(format!("cannot read {}: {}", path.display(), e))
            })?;
            let explicit: Settings = serde_json::from_str(&content).map_err(|e| {
                ToolError::config_error(format!("cannot parse {}: {}", path.display(), e))
            })?;
            tracing::debug!("Loaded explicit settings from {:?}", path);
            settings.merge(explicit);
        }

        Ok(settings)
    }

    /// Load user settings from ~/.toolhost/settings.json
    fn load_user_settings() -> Option<Settings> {
        let home = dirs::home_dir()?;
        let path = home.join(USER_SETTINGS_DIR).join(SETTINGS_FILE);
        Self::load_settings_file(&path)
    }

    /// Load settings from a file, skipping missing or malformed files
    fn load_settings_file(path: &Path) -> Option<Settings> {
        if !path.exists() {
            return None;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match serde_json::from_str(&content) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    tracing::warn!("Failed to parse settings file {:?}: {}", path, e);
                    None
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read settings file {:?}: {}", path, e);
                None
            }
        }
    }

    /// Get the merged settings
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Build the command execution config
    ///
    /// Falls back to the shipped allow-list when no source provides one.
    /// `env` from settings is passed to every spawned command.
    pub fn execution_config(&self) -> ExecutionConfig {
        let defaults = ExecutionConfig::default();
        let allowed_patterns = self
            .settings
            .allowed_commands
            .clone()
            .unwrap_or(defaults.allowed_patterns);

        ExecutionConfig::new(
            ExecutionConfig::resolve_shell(self.settings.shell.as_deref()),
            allowed_patterns,
        )
        .with_env(self.settings.env.clone().unwrap_or_default())
    }

    /// Enabled tool servers, sorted by name
    ///
    /// Each server's `env` is layered over the top-level `env`.
    pub fn tool_server_configs(&self) -> Vec<ToolServerConfig> {
        let Some(servers) = &self.settings.mcp_servers else {
            return Vec::new();
        };

        let mut configs: Vec<ToolServerConfig> = servers
            .iter()
            .filter(|(_, server)| !server.disabled)
            .map(|(name, server)| {
                let mut env = self.settings.env.clone().unwrap_or_default();
                env.extend(server.env.clone().unwrap_or_default());
                ToolServerConfig {
                    name: name.clone(),
                    description: server.description.clone(),
                    command: server.command.clone(),
                    args: server.args.clone(),
                    env,
                }
            })
            .collect();
        configs.sort_by(|a, b| a.name.cmp(&b.name));
        configs
    }
}
