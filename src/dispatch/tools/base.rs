//! Base tool trait definition

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;

use crate::dispatch::ToolResult;
use crate::process::CommandExecutionEngine;
use crate::types::{Result, ToolKind, ToolSpec};

/// Everything a built-in tool may touch
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Working directory relative paths resolve against
    pub cwd: PathBuf,
    engine: Arc<CommandExecutionEngine>,
}

impl ToolContext {
    /// Create a new tool context
    pub fn new(cwd: impl Into<PathBuf>, engine: Arc<CommandExecutionEngine>) -> Self {
        Self {
            cwd: cwd.into(),
            engine,
        }
    }

    /// The command execution engine
    pub fn engine(&self) -> &CommandExecutionEngine {
        &self.engine
    }

    /// Resolve a possibly relative path against the working directory
    pub fn resolve(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.cwd.join(path)
        }
    }
}

/// A tool implemented inside the host
///
/// Operational failures (missing file, rejected command) are reported as
/// error results. `Err` is reserved for invocations whose input has no
/// usable shape.
#[async_trait]
pub trait Tool: Send + Sync + std::fmt::Debug {
    /// Get the tool name
    fn name(&self) -> &str;

    /// Get the tool description
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's input parameters
    fn input_schema(&self) -> serde_json::Value;

    /// Execute the tool with the given input
    async fn execute(&self, input: serde_json::Value, context: &ToolContext) -> Result<ToolResult>;

    /// Get the tool category/kind
    fn kind(&self) -> ToolKind {
        ToolKind::Other
    }

    /// Descriptor advertised to the model
    fn spec(&self) -> ToolSpec {
        ToolSpec::new(self.name(), self.description(), self.input_schema())
    }
}
