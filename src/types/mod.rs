//! Public types for the tool host
//!
//! This module contains the shared types used across the crate.

mod config;
mod error;
mod tool;

pub use config::{
    CommandPatternConfig, DEFAULT_ALLOWED_PATTERN, ExecutionConfig, FALLBACK_SHELL, SHELL_ENV_VAR,
    ToolServerConfig,
};
pub use error::{ErrorCode, Result, ToolError};
pub use tool::{ToolKind, ToolSpec};
