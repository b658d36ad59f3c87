//! Stdio tool-server client
//!
//! Connections are driven by `rmcp`: the child process is wrapped in a
//! [`TokioChildProcess`] transport and the MCP handshake, `tools/list` and
//! `tools/call` go through an rmcp client service.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use rmcp::ClientHandler;
use rmcp::model::CallToolRequestParam;
use rmcp::service::{Peer, RoleClient, RunningService, ServiceExt};
use rmcp::transport::{ConfigureCommandExt, TokioChildProcess};
use serde_json::{Value, json};
use tokio::process::Command;
use tokio::sync::Mutex;

use crate::types::{ToolServerConfig, ToolSpec};

/// Bound on handshake plus tool listing
pub const LAUNCH_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a server may take to stop once its service is cancelled
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// A live connection to one tool server
#[async_trait]
pub trait ToolServerClient: Send + Sync + fmt::Debug {
    /// Server name from its configuration
    fn name(&self) -> &str;

    /// Tools advertised by the server, unprefixed
    fn tools(&self) -> &[ToolSpec];

    /// Invoke a tool and return the raw `tools/call` result
    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolServerError>;

    /// Close the connection and stop the server
    async fn shutdown(&self) -> Result<(), ToolServerError>;
}

/// Starts tool-server connections from configuration
#[async_trait]
pub trait ToolServerLauncher: Send + Sync + fmt::Debug {
    /// Launch a server and complete its handshake
    async fn launch(
        &self,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolServerClient>, ToolServerError>;
}

/// Launcher for child-process servers over stdio
#[derive(Debug, Clone, Default)]
pub struct StdioLauncher {
    cwd: Option<PathBuf>,
}

impl StdioLauncher {
    /// Create a launcher that starts servers in the current directory
    pub fn new() -> Self {
        Self::default()
    }

    /// Start servers in `cwd`
    pub fn with_cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }
}

#[async_trait]
impl ToolServerLauncher for StdioLauncher {
    async fn launch(
        &self,
        config: &ToolServerConfig,
    ) -> Result<Box<dyn ToolServerClient>, ToolServerError> {
        let client = StdioToolServerClient::connect(config, self.cwd.as_deref()).await?;
        Ok(Box::new(client))
    }
}

/// Client handler with no callbacks; the host only lists and calls tools
#[derive(Debug, Clone, Copy, Default)]
struct HostClientHandler;

impl ClientHandler for HostClientHandler {}

/// Tool-server connection over a child process's stdio
pub struct StdioToolServerClient {
    name: String,
    tools: Vec<ToolSpec>,
    peer: Peer<RoleClient>,
    service: Mutex<Option<RunningService<RoleClient, HostClientHandler>>>,
}

impl fmt::Debug for StdioToolServerClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StdioToolServerClient")
            .field("name", &self.name)
            .field("tools", &self.tools.len())
            .finish_non_exhaustive()
    }
}

impl StdioToolServerClient {
    /// Spawn the server, perform the handshake and list its tools
    ///
    /// Handshake and listing together are bounded by [`LAUNCH_TIMEOUT`].
    pub async fn connect(
        config: &ToolServerConfig,
        cwd: Option<&Path>,
    ) -> Result<Self, ToolServerError> {
        let args = config.args.clone();
        let env = config.env.clone();
        let cwd = cwd.map(Path::to_path_buf);

        let transport = TokioChildProcess::new(Command::new(&config.command).configure(
            move |cmd| {
                cmd.args(&args).envs(&env).stderr(Stdio::null());
                if let Some(cwd) = &cwd {
                    cmd.current_dir(cwd);
                }
            },
        ))
        .map_err(|e| ToolServerError::SpawnFailed {
            command: config.command.clone(),
            error: e.to_string(),
        })?;

        let handshake = async {
            let service = HostClientHandler
                .serve(transport)
                .await
                .map_err(|e| ToolServerError::Handshake(e.to_string()))?;

            match service.list_all_tools().await {
                Ok(tools) => Ok::<_, ToolServerError>((service, tools)),
                Err(e) => {
                    if let Err(cancel) = service.cancel().await {
                        tracing::debug!(error = %cancel, "Cancelling failed tool server");
                    }
                    Err(ToolServerError::Request(e.to_string()))
                }
            }
        };

        // Dropping the pending handshake drops the transport and its child
        let (service, listed) = tokio::time::timeout(LAUNCH_TIMEOUT, handshake)
            .await
            .map_err(|_| {
                ToolServerError::Timeout(format!(
                    "server '{}' did not finish its handshake within {}s",
                    config.name,
                    LAUNCH_TIMEOUT.as_secs()
                ))
            })??;

        let listed = serde_json::to_value(&listed)
            .map_err(|e| ToolServerError::Deserialization(e.to_string()))?;
        let tools = parse_tools(&listed);

        tracing::info!(
            server = %config.name,
            tools = tools.len(),
            "Connected to tool server"
        );

        Ok(Self {
            name: config.name.clone(),
            tools,
            peer: service.peer().clone(),
            service: Mutex::new(Some(service)),
        })
    }
}

#[async_trait]
impl ToolServerClient for StdioToolServerClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn tools(&self) -> &[ToolSpec] {
        &self.tools
    }

    async fn call_tool(&self, tool: &str, arguments: Value) -> Result<Value, ToolServerError> {
        let params: CallToolRequestParam = serde_json::from_value(call_params(tool, arguments))
            .map_err(|e| ToolServerError::Serialization(e.to_string()))?;

        let result = self
            .peer
            .call_tool(params)
            .await
            .map_err(|e| ToolServerError::Request(e.to_string()))?;
        let result = serde_json::to_value(&result)
            .map_err(|e| ToolServerError::Deserialization(e.to_string()))?;

        if result.get("isError").and_then(Value::as_bool) == Some(true) {
            let message = content_text(&result).unwrap_or_else(|| result.to_string());
            return Err(ToolServerError::ToolFailed(message));
        }
        Ok(result)
    }

    async fn shutdown(&self) -> Result<(), ToolServerError> {
        let Some(service) = self.service.lock().await.take() else {
            return Ok(());
        };

        match tokio::time::timeout(SHUTDOWN_GRACE, service.cancel()).await {
            Ok(Ok(reason)) => {
                tracing::debug!(server = %self.name, ?reason, "Tool server stopped");
                Ok(())
            }
            Ok(Err(e)) => Err(ToolServerError::Request(e.to_string())),
            Err(_) => Err(ToolServerError::Timeout(format!(
                "server '{}' did not stop within {}s",
                self.name,
                SHUTDOWN_GRACE.as_secs()
            ))),
        }
    }
}

/// `tools/call` parameters; a null input means no arguments
fn call_params(tool: &str, arguments: Value) -> Value {
    match arguments {
        Value::Null => json!({ "name": tool }),
        arguments => json!({ "name": tool, "arguments": arguments }),
    }
}

/// Extract tool descriptors from a serialized tool list
fn parse_tools(listed: &Value) -> Vec<ToolSpec> {
    let Some(tools) = listed.as_array() else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|t| {
            let name = t.get("name")?.as_str()?;
            let description = t
                .get("description")
                .and_then(Value::as_str)
                .unwrap_or_default();
            let input_schema = t
                .get("inputSchema")
                .cloned()
                .unwrap_or_else(|| json!({"type": "object"}));
            Some(ToolSpec::new(name, description, input_schema))
        })
        .collect()
}

/// Join the text parts of an MCP `content` array
pub fn content_text(result: &Value) -> Option<String> {
    let content = result.get("content")?.as_array()?;
    let text: Vec<&str> = content
        .iter()
        .filter(|c| c.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|c| c.get("text").and_then(Value::as_str))
        .collect();
    Some(text.join("\n"))
}

/// Errors for tool-server operations
#[derive(Debug, thiserror::Error)]
pub enum ToolServerError {
    /// Failed to spawn the server process
    #[error("Failed to spawn tool server '{command}': {error}")]
    SpawnFailed { command: String, error: String },

    /// The MCP handshake failed
    #[error("Tool server handshake failed: {0}")]
    Handshake(String),

    /// A request failed in transport or was rejected by the server
    #[error("Tool server request failed: {0}")]
    Request(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The server reported a failed tool call
    #[error("Tool call failed: {0}")]
    ToolFailed(String),

    /// An operation did not finish in time
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Malformed server configuration
    #[error("Invalid tool server config '{name}': {reason}")]
    InvalidConfig { name: String, reason: String },
}
