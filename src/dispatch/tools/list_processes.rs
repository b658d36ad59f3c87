//! Report live command processes and the allow-list

use async_trait::async_trait;
use serde_json::{Value, json};

use super::base::{Tool, ToolContext};
use crate::dispatch::ToolResult;
use crate::types::{Result, ToolKind};

/// Snapshot of the command engine
#[derive(Debug, Default)]
pub struct ListProcessesTool;

impl ListProcessesTool {
    /// Create a new list_processes tool
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ListProcessesTool {
    fn name(&self) -> &str {
        "list_processes"
    }

    fn description(&self) -> &str {
        "Lists commands that are still running and the command patterns that may be executed."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {}
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Execute
    }

    async fn execute(&self, _input: Value, context: &ToolContext) -> Result<ToolResult> {
        let engine = context.engine();
        let processes = engine.running_processes().await;
        let allowed = engine.allowed_commands();

        let mut output = String::new();
        if processes.is_empty() {
            output.push_str("No running processes.\n");
        } else {
            output.push_str("Running processes:\n");
            for p in &processes {
                output.push_str(&format!(
                    "  {} [{}] {} (since {})\n",
                    p.pid,
                    p.state.as_str(),
                    p.command,
                    p.started_at.format("%H:%M:%S")
                ));
            }
        }
        output.push_str("\nAllowed commands:\n");
        for pattern in allowed {
            if pattern.description.is_empty() {
                output.push_str(&format!("  {}\n", pattern.pattern));
            } else {
                output.push_str(&format!("  {} - {}\n", pattern.pattern, pattern.description));
            }
        }

        Ok(ToolResult::success(output).with_metadata(json!({
            "processes": processes,
            "allowedCommands": allowed,
        })))
    }
}
