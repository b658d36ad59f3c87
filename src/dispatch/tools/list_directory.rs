//! List directory entries

use async_trait::async_trait;
use globset::Glob;
use serde::Deserialize;
use serde_json::{Value, json};
use walkdir::WalkDir;

use super::base::{Tool, ToolContext};
use crate::dispatch::ToolResult;
use crate::types::{Result, ToolError, ToolKind};

/// Maximum entries to return
const MAX_ENTRIES: usize = 1000;

/// Directory listing, optionally recursive and glob-filtered
#[derive(Debug, Default)]
pub struct ListDirectoryTool;

#[derive(Debug, Deserialize)]
struct ListDirectoryInput {
    #[serde(default)]
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    pattern: Option<String>,
}

impl ListDirectoryTool {
    /// Create a new list_directory tool
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ListDirectoryTool {
    fn name(&self) -> &str {
        "list_directory"
    }

    fn description(&self) -> &str {
        "Lists files and subdirectories (directories end with '/'). \
         Can recurse and filter entries by a glob pattern such as '*.rs'."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list (defaults to the working directory)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Descend into subdirectories"
                },
                "pattern": {
                    "type": "string",
                    "description": "Glob applied to paths relative to the listed directory"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Read
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult> {
        let params: ListDirectoryInput = serde_json::from_value(input)
            .map_err(|e| ToolError::invalid_input(format!("list_directory: {e}")))?;
        let root = context.resolve(params.path.as_deref().unwrap_or("."));

        if !root.is_dir() {
            return Ok(ToolResult::error(format!(
                "Path is not a directory: {}",
                root.display()
            )));
        }

        let matcher = match params.pattern.as_deref().map(Glob::new).transpose() {
            Ok(glob) => glob.map(|g| g.compile_matcher()),
            Err(e) => return Ok(ToolResult::error(format!("Invalid glob pattern: {e}"))),
        };

        let mut walker = WalkDir::new(&root)
            .min_depth(1)
            .follow_links(false)
            .sort_by_file_name();
        if !params.recursive {
            walker = walker.max_depth(1);
        }

        let mut entries = Vec::new();
        let mut truncated = false;
        for entry in walker.into_iter().filter_map(|e| e.ok()) {
            let Ok(relative) = entry.path().strip_prefix(&root) else {
                continue;
            };
            if let Some(matcher) = &matcher {
                if !matcher.is_match(relative) {
                    continue;
                }
            }

            if entries.len() == MAX_ENTRIES {
                truncated = true;
                break;
            }
            let mut name = relative.display().to_string();
            if entry.file_type().is_dir() {
                name.push('/');
            }
            entries.push(name);
        }

        let output = if entries.is_empty() {
            format!("No entries in {}", root.display())
        } else {
            let mut output = entries.join("\n");
            if truncated {
                output.push_str(&format!("\n\n... (truncated at {MAX_ENTRIES} entries)"));
            }
            output
        };

        Ok(ToolResult::success(output).with_metadata(json!({
            "path": root.display().to_string(),
            "count": entries.len(),
            "truncated": truncated,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::CommandExecutionEngine;
    use crate::types::ExecutionConfig;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn fixture() -> (TempDir, ToolContext) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/bin")).unwrap();
        std::fs::write(dir.path().join("Cargo.toml"), "").unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/bin/main.rs"), "").unwrap();
        std::fs::write(dir.path().join("src/notes.md"), "").unwrap();

        let context = ToolContext::new(
            dir.path(),
            Arc::new(CommandExecutionEngine::new(ExecutionConfig::default())),
        );
        (dir, context)
    }

    #[tokio::test]
    async fn test_flat_listing() {
        let (_dir, context) = fixture();
        let result = ListDirectoryTool::new()
            .execute(json!({}), &context)
            .await
            .unwrap();
        assert_eq!(result.content, "Cargo.toml\nsrc/");
    }

    #[tokio::test]
    async fn test_recursive_with_pattern() {
        let (_dir, context) = fixture();
        let result = ListDirectoryTool::new()
            .execute(json!({"recursive": true, "pattern": "*.rs"}), &context)
            .await
            .unwrap();
        assert_eq!(result.content, "src/bin/main.rs\nsrc/lib.rs");
        assert_eq!(result.metadata.unwrap()["count"], 2);
    }

    #[tokio::test]
    async fn test_not_a_directory() {
        let (_dir, context) = fixture();
        let result = ListDirectoryTool::new()
            .execute(json!({"path": "Cargo.toml"}), &context)
            .await
            .unwrap();
        assert!(result.is_error);
    }

    #[tokio::test]
    async fn test_invalid_pattern() {
        let (_dir, context) = fixture();
        let result = ListDirectoryTool::new()
            .execute(json!({"pattern": "[unclosed"}), &context)
            .await
            .unwrap();
        assert!(result.is_error);
        assert!(result.content.starts_with("Invalid glob pattern"));
    }
}
