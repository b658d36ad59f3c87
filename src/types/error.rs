//! Error types for the tool host

use thiserror::Error;

use crate::mcp::ToolServerError;
use crate::process::CommandError;

/// Tool host error codes
///
/// Standard JSON-RPC error codes and host-specific codes, reported on the
/// tool-invocation boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Standard JSON-RPC errors (-32xxx)
    /// Parse error: Invalid JSON
    ParseError = -32700,
    /// Invalid params
    InvalidParams = -32602,
    /// Internal error
    InternalError = -32603,

    // Host-specific errors (-32000 to -32099)
    /// Unknown tool type
    UnknownTool = -32001,
    /// Command rejected by the allow-list
    NotAllowed = -32002,
    /// Command process failed
    CommandFailed = -32003,
    /// Command timed out
    Timeout = -32004,
    /// No tracked process for the given pid
    ProcessNotFound = -32005,
    /// Tool server failure
    ToolServerFailed = -32006,
    /// Configuration error
    ConfigError = -32010,
}

impl ErrorCode {
    /// Get the error code value
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Code reported for a command execution error
    pub fn for_command(error: &CommandError) -> Self {
        match error {
            CommandError::NotAllowed(_) => ErrorCode::NotAllowed,
            CommandError::Timeout { .. } => ErrorCode::Timeout,
            CommandError::NoSuchProcess(_) | CommandError::NotRunning(_) => {
                ErrorCode::ProcessNotFound
            }
            _ => ErrorCode::CommandFailed,
        }
    }
}

/// Main error type for the tool host
#[derive(Debug, Error)]
pub enum ToolError {
    /// The invocation named a tool nobody provides
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// The invocation payload does not have a usable shape
    #[error("Invalid input format: {0}")]
    InvalidInput(String),

    /// Command execution error
    #[error(transparent)]
    Command(#[from] CommandError),

    /// External tool server error
    #[error(transparent)]
    ToolServer(#[from] ToolServerError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for the tool host
pub type Result<T> = std::result::Result<T, ToolError>;

impl ToolError {
    /// Get the error code for this error
    pub fn error_code(&self) -> ErrorCode {
        match self {
            ToolError::UnknownTool(_) => ErrorCode::UnknownTool,
            ToolError::InvalidInput(_) => ErrorCode::InvalidParams,
            ToolError::Command(e) => ErrorCode::for_command(e),
            ToolError::ToolServer(ToolServerError::InvalidConfig { .. }) => ErrorCode::ConfigError,
            ToolError::ToolServer(_) => ErrorCode::ToolServerFailed,
            ToolError::Config(_) => ErrorCode::ConfigError,
            ToolError::Io(_) => ErrorCode::InternalError,
            ToolError::Json(_) => ErrorCode::ParseError,
            ToolError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Check if this error is worth retrying by the caller
    ///
    /// Nothing is retried automatically; this only informs the caller.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ToolError::Command(CommandError::Timeout { .. })
                | ToolError::ToolServer(
                    ToolServerError::Timeout(_) | ToolServerError::Request(_)
                )
        )
    }

    /// Check if this error is a client error (caused by invalid input)
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ToolError::UnknownTool(_)
                | ToolError::InvalidInput(_)
                | ToolError::Command(
                    CommandError::NotAllowed(_)
                        | CommandError::NoSuchProcess(_)
                        | CommandError::NotRunning(_)
                )
        )
    }

    // === Constructor helpers ===

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        ToolError::Internal(msg.into())
    }

    /// Create an unknown tool error
    pub fn unknown_tool(name: impl Into<String>) -> Self {
        ToolError::UnknownTool(name.into())
    }

    /// Create an invalid input error
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        ToolError::InvalidInput(msg.into())
    }

    /// Create a configuration error
    pub fn config_error(msg: impl Into<String>) -> Self {
        ToolError::Config(msg.into())
    }
}
