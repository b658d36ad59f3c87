//! Run allow-listed shell commands and talk to them afterwards

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};

use super::base::{Tool, ToolContext};
use crate::dispatch::ToolResult;
use crate::types::{Result, ToolError, ToolKind};

/// Command tool: run, send input, or stop
#[derive(Debug, Default)]
pub struct ExecuteCommandTool;

#[derive(Debug, Deserialize)]
struct ExecuteCommandInput {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    cwd: Option<String>,
    #[serde(default)]
    pid: Option<u32>,
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    stop: bool,
}

/// What an execute_command invocation asks for
#[derive(Debug, PartialEq, Eq)]
enum CommandRequest {
    Run { command: String, cwd: Option<String> },
    SendInput { pid: u32, text: String },
    Stop { pid: u32 },
}

impl ExecuteCommandInput {
    fn into_request(self) -> Result<CommandRequest> {
        match self {
            Self {
                command: Some(command),
                pid: None,
                input: None,
                stop: false,
                cwd,
            } if !command.trim().is_empty() => Ok(CommandRequest::Run { command, cwd }),
            Self {
                command: None,
                pid: Some(pid),
                input: Some(text),
                stop: false,
                cwd: None,
            } => Ok(CommandRequest::SendInput { pid, text }),
            Self {
                command: None,
                pid: Some(pid),
                input: None,
                stop: true,
                cwd: None,
            } => Ok(CommandRequest::Stop { pid }),
            _ => Err(ToolError::invalid_input(
                "execute_command expects {command, cwd?}, {pid, input} or {pid, stop: true}",
            )),
        }
    }
}

impl ExecuteCommandTool {
    /// Create a new execute_command tool
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Runs an allow-listed shell command. If the command asks a question or starts a server \
         it keeps running: answer it with {pid, input} or end it with {pid, stop: true}."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "Command line to run"
                },
                "cwd": {
                    "type": "string",
                    "description": "Working directory for a new command"
                },
                "pid": {
                    "type": "integer",
                    "description": "Process id returned by an earlier call"
                },
                "input": {
                    "type": "string",
                    "description": "Line to send to the process's standard input"
                },
                "stop": {
                    "type": "boolean",
                    "description": "Terminate the process group of pid"
                }
            }
        })
    }

    fn kind(&self) -> ToolKind {
        ToolKind::Execute
    }

    async fn execute(&self, input: Value, context: &ToolContext) -> Result<ToolResult> {
        let params: ExecuteCommandInput = serde_json::from_value(input)
            .map_err(|e| ToolError::invalid_input(format!("execute_command: {e}")))?;
        let engine = context.engine();

        let result = match params.into_request()? {
            CommandRequest::Run { command, cwd } => {
                let cwd = cwd.map_or_else(|| context.cwd.clone(), |dir| context.resolve(&dir));
                engine
                    .execute_command(&command, &cwd)
                    .await
                    .map(|output| ToolResult::from_command(&output))
            }
            CommandRequest::SendInput { pid, text } => engine
                .send_input(pid, &text)
                .await
                .map(|output| ToolResult::from_command(&output)),
            CommandRequest::Stop { pid } => engine.stop_process(pid).await.map(|info| {
                ToolResult::success(format!("Stopped process {pid} ({})", info.command))
                    .with_metadata(json!({
                        "pid": pid,
                        "state": info.state.as_str(),
                    }))
            }),
        };

        Ok(result.unwrap_or_else(|e| ToolResult::from_command_error(&e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ToolStatus;
    use crate::process::CommandExecutionEngine;
    use crate::types::{CommandPatternConfig, ExecutionConfig};
    use std::sync::Arc;
    use tempfile::TempDir;

    fn parse(value: Value) -> Result<CommandRequest> {
        serde_json::from_value::<ExecuteCommandInput>(value)
            .unwrap()
            .into_request()
    }

    #[test]
    fn test_request_shapes() {
        assert_eq!(
            parse(json!({"type": "execute_command", "command": "gh pr list"})).unwrap(),
            CommandRequest::Run {
                command: "gh pr list".into(),
                cwd: None
            }
        );
        assert_eq!(
            parse(json!({"pid": 12, "input": "y"})).unwrap(),
            CommandRequest::SendInput {
                pid: 12,
                text: "y".into()
            }
        );
        assert_eq!(
            parse(json!({"pid": 12, "stop": true})).unwrap(),
            CommandRequest::Stop { pid: 12 }
        );
    }

    #[test]
    fn test_invalid_request_shapes() {
        for value in [
            json!({}),
            json!({"command": "  "}),
            json!({"pid": 1}),
            json!({"input": "y"}),
            json!({"command": "ls", "pid": 1}),
            json!({"pid": 1, "input": "y", "stop": true}),
            json!({"stop": true}),
        ] {
            let err = parse(value.clone()).unwrap_err();
            assert!(matches!(err, ToolError::InvalidInput(_)), "{value}");
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_and_reject() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("hi.sh"), "echo hi\n").unwrap();
        let engine = CommandExecutionEngine::new(ExecutionConfig::new(
            "/bin/sh",
            vec![CommandPatternConfig::new("sh *", "")],
        ));
        let context = ToolContext::new(dir.path(), Arc::new(engine));
        let tool = ExecuteCommandTool::new();

        let result = tool
            .execute(json!({"command": "sh hi.sh"}), &context)
            .await
            .unwrap();
        assert_eq!(result.status, ToolStatus::Success);
        assert!(result.content.contains("hi"));

        let rejected = tool
            .execute(json!({"command": "curl example.com"}), &context)
            .await
            .unwrap();
        assert!(rejected.is_error);
        assert!(rejected.content.starts_with("Command not allowed"));

        let missing = tool
            .execute(json!({"pid": 999_999, "stop": true}), &context)
            .await
            .unwrap();
        assert!(missing.is_error);
    }
}
