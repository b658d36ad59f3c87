//! Read a text file

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::base::{Tool, ToolContext};
use crate::dispatch::ToolResult;
use crate::types::{Result, ToolError, ToolKind};

/// Maximum output size in characters
const MAX_OUTPUT_CHARS: usize = 100_000;

/// Read tool for reading file contents
#[derive(Debug, Default)]
pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadFileInput {
    path: String,
}

impl ReadFileTool {
    /// Create a new read_file tool
    pub fn new() -> Self {
        Self
    }
}

/// Cut `text` to at most `max` characters
fn truncate_chars(text: &str, max: usize) -> Option<String> {
    let (cut, _) = text.char_indices().nth(max)?;
    Some(text[..cut].to_string())
}

#[async_trait]
impl Tool for ReadFileTool {
    fn name(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        "Reads a text file. Relative paths resolve against the working directory. \
         Very large files are truncated."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file to read"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult> {
        let params: ReadFileInput = serde_json::from_value(input)
            .map_err(|e| ToolError::invalid_input(format!("read_file: {e}")))?;
        let path = context.resolve(&params.path);

        let text = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) => {
                return Ok(ToolResult::error(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        let total_chars = text.chars().count();
        let (content, truncated) = match truncate_chars(&text, MAX_OUTPUT_CHARS) {
            Some(mut head) => {
                head.push_str(&format!(
                    "\n... (truncated, showing {MAX_OUTPUT_CHARS} of {total_chars} characters)"
                ));
                (head, true)
            }
            None => (text, false),
        };

        Ok(ToolResult::success(content).with_metadata(json!({
            "path": path.display().to_string(),
            "totalChars": total_chars,
            "truncated": truncated,
        })))
    }
}
