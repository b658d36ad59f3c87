//! Write a text file

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::base::{Tool, ToolContext};
use crate::dispatch::ToolResult;
use crate::types::{Result, ToolError, ToolKind};

/// Write tool, creating parent directories as needed
#[derive(Debug, Default)]
pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteFileInput {
    path: String,
    content: String,
}

impl WriteFileTool {
    /// Create a new write_file tool
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for WriteFileTool {
    fn name(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        "Writes text to a file, replacing existing content. Missing parent directories are created."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "Full new content of the file"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Edit
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult> {
        let params: WriteFileInput = serde_json::from_value(input)
            .map_err(|e| ToolError::invalid_input(format!("write_file: {e}")))?;
        let path = context.resolve(&params.path);

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return Ok(ToolResult::error(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                )));
            }
        }

        if let Err(e) = tokio::fs::write(&path, params.content.as_bytes()).await {
            return Ok(ToolResult::error(format!(
                "Failed to write {}: {}",
                path.display(),
                e
            )));
        }

        let bytes = params.content.len();
        tracing::debug!(path = %path.display(), bytes, "Wrote file");
        Ok(
            ToolResult::success(format!("Wrote {bytes} bytes to {}", path.display()))
                .with_metadata(json!({
                    "path": path.display().to_string(),
                    "bytes": bytes,
                })),
        )
    }
}
