//! Command execution and tool-server configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Environment variable overriding the configured shell
pub const SHELL_ENV_VAR: &str = "TOOLHOST_SHELL";

/// Shell used when neither settings nor environment name one
pub const FALLBACK_SHELL: &str = "/bin/bash";

/// Allow-list pattern shipped when no settings file provides one
pub const DEFAULT_ALLOWED_PATTERN: &str = "gh pr *";

/// One allow-list entry: `command [arg|*]*`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandPatternConfig {
    /// Space separated command template
    pub pattern: String,
    /// Human readable explanation shown next to the pattern
    #[serde(default)]
    pub description: String,
}

impl CommandPatternConfig {
    /// Create a new pattern entry
    pub fn new(pattern: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            pattern: pattern.into(),
            description: description.into(),
        }
    }
}

/// Settings consumed by the command execution engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionConfig {
    /// Commands the engine may run
    pub allowed_patterns: Vec<CommandPatternConfig>,
    /// Shell binary invoked as `<shell> -ic <command line>`
    pub shell: String,
    /// Extra environment variables for every spawned command
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            allowed_patterns: vec![CommandPatternConfig::new(
                DEFAULT_ALLOWED_PATTERN,
                "Read and comment on GitHub pull requests",
            )],
            shell: FALLBACK_SHELL.to_string(),
            env: HashMap::new(),
        }
    }
}

impl ExecutionConfig {
    /// Create a config with an explicit shell and allow-list
    pub fn new(shell: impl Into<String>, allowed_patterns: Vec<CommandPatternConfig>) -> Self {
        Self {
            allowed_patterns,
            shell: shell.into(),
            env: HashMap::new(),
        }
    }

    /// Set the environment passed to spawned commands
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    /// Resolve the shell to use
    ///
    /// Priority: `TOOLHOST_SHELL` > configured value > `$SHELL` > `/bin/bash`.
    pub fn resolve_shell(configured: Option<&str>) -> String {
        std::env::var(SHELL_ENV_VAR)
            .ok()
            .filter(|s| !s.trim().is_empty())
            .or_else(|| configured.map(str::to_string))
            .or_else(|| std::env::var("SHELL").ok().filter(|s| !s.trim().is_empty()))
            .unwrap_or_else(|| FALLBACK_SHELL.to_string())
    }
}

/// External tool server launch configuration
///
/// Identity for change detection is `{name, command, args, env}`;
/// `description` does not participate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerConfig {
    /// Unique server name
    pub name: String,
    /// Free-form description
    #[serde(default)]
    pub description: Option<String>,
    /// Executable to launch
    pub command: String,
    /// Arguments passed to the executable
    #[serde(default)]
    pub args: Vec<String>,
    /// Extra environment variables for the server process
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl ToolServerConfig {
    /// Create a config with no environment and no description
    pub fn new(name: impl Into<String>, command: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            command: command.into(),
            args,
            env: HashMap::new(),
        }
    }

    /// Add an environment variable
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn test_default_execution_config() {
        let config = ExecutionConfig::default();
        assert_eq!(config.allowed_patterns.len(), 1);
        assert_eq!(config.allowed_patterns[0].pattern, "gh pr *");
    }

    #[test]
    #[serial]
    fn test_resolve_shell_env_override() {
        // SAFETY: serialised with the other environment tests
        unsafe { std::env::set_var(SHELL_ENV_VAR, "/bin/zsh") };
        assert_eq!(ExecutionConfig::resolve_shell(Some("/bin/sh")), "/bin/zsh");
        unsafe { std::env::remove_var(SHELL_ENV_VAR) };
    }

    #[test]
    #[serial]
    fn test_resolve_shell_configured() {
        unsafe { std::env::remove_var(SHELL_ENV_VAR) };
        assert_eq!(ExecutionConfig::resolve_shell(Some("/bin/sh")), "/bin/sh");
    }

    #[test]
    fn test_tool_server_config_deserialize() {
        let config: ToolServerConfig = serde_json::from_str(
            r#"{"name": "fs", "command": "npx", "args": ["-y", "server-fs"], "env": {"A": "1"}}"#,
        )
        .unwrap();
        assert_eq!(config.name, "fs");
        assert_eq!(config.args, vec!["-y", "server-fs"]);
        assert_eq!(config.env.get("A").map(String::as_str), Some("1"));
        assert!(config.description.is_none());
    }
}
