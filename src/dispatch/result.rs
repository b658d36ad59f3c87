//! Uniform tool result shape

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::mcp::ToolInvocationResult;
use crate::process::{CommandError, CommandOutput};
use crate::types::ErrorCode;

/// Maximum command output returned in one result, in bytes
pub const MAX_OUTPUT_SIZE: usize = 30_000;

/// Cut `text` to [`MAX_OUTPUT_SIZE`] on a char boundary; true when cut
fn truncate_output(text: &mut String) -> bool {
    if text.len() <= MAX_OUTPUT_SIZE {
        return false;
    }
    let mut end = MAX_OUTPUT_SIZE;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text.truncate(end);
    text.push_str("\n... (output truncated)");
    true
}

/// Tool execution result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolResult {
    /// Result status
    pub status: ToolStatus,
    /// Output content
    pub content: String,
    /// Whether this is an error
    pub is_error: bool,
    /// Additional metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

impl ToolResult {
    /// Create a successful result
    pub fn success(content: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Success,
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    /// Create an error result
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Error,
            content: message.into(),
            is_error: true,
            metadata: None,
        }
    }

    /// Create a result for work that is still going on
    pub fn running(content: impl Into<String>) -> Self {
        Self {
            status: ToolStatus::Running,
            content: content.into(),
            is_error: false,
            metadata: None,
        }
    }

    /// Create a result with metadata
    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    /// Result of a command execution or input round-trip
    pub fn from_command(output: &CommandOutput) -> Self {
        let mut content = output.stdout.clone();
        if !output.stderr.is_empty() {
            if !content.is_empty() && !content.ends_with('\n') {
                content.push('\n');
            }
            content.push_str("[stderr]\n");
            content.push_str(&output.stderr);
        }
        if output.requires_input {
            if let Some(prompt) = &output.prompt {
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push_str(&format!(
                    "[process {} is waiting for input: {}]",
                    output.pid,
                    prompt.trim_end()
                ));
            }
        }

        let truncated = truncate_output(&mut content);
        let base = if output.is_running() {
            Self::running(content)
        } else {
            Self::success(content)
        };
        base.with_metadata(json!({
            "pid": output.pid,
            "state": output.state.as_str(),
            "exitCode": output.exit_code,
            "requiresInput": output.requires_input,
            "prompt": output.prompt,
            "truncated": truncated,
        }))
    }

    /// Result for a command that was rejected or failed
    pub fn from_command_error(error: &CommandError) -> Self {
        let code = match error {
            CommandError::Failed { exit_code, .. } => *exit_code,
            _ => None,
        };
        let mut content = error.to_string();
        let truncated = truncate_output(&mut content);
        Self::error(content).with_metadata(json!({
            "errorCode": ErrorCode::for_command(error).code(),
            "exitCode": code,
            "truncated": truncated,
        }))
    }

    /// Result of an external tool invocation
    pub fn from_invocation(invocation: &ToolInvocationResult) -> Self {
        let metadata = serde_json::to_value(invocation).unwrap_or_default();
        if invocation.success {
            Self::success(invocation.message.clone()).with_metadata(metadata)
        } else {
            let content = match &invocation.error {
                Some(error) => format!("{}: {}", invocation.message, error),
                None => invocation.message.clone(),
            };
            Self::error(content).with_metadata(metadata)
        }
    }
}

/// Tool execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Tool executed successfully
    Success,
    /// Tool execution failed
    Error,
    /// The underlying process is still running (waiting for input or serving)
    Running,
}
