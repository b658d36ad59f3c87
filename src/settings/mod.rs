//! Settings management
//!
//! Loads and merges settings from multiple sources:
//! - User settings: `~/.toolhost/settings.json`
//! - Project settings: `.toolhost/settings.json`
//! - Local settings: `.toolhost/settings.local.json`
//! - An explicit file passed with `--settings`
//!
//! Priority: Explicit > Local > Project > User

mod allowlist;
mod manager;

pub use allowlist::{ParsedPattern, contains_shell_operator, is_command_allowed};
pub use manager::{McpServerConfig, Settings, SettingsManager};
