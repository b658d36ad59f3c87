//! Route tool invocations to their backend

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

use super::ToolResult;
use super::tools::{BuiltinTools, ToolContext};
use crate::mcp::{EXTERNAL_TOOL_PREFIX, ToolServerRegistry};
use crate::process::CommandExecutionEngine;
use crate::types::{Result, ToolError, ToolServerConfig, ToolSpec};

/// Entry point for `{type: <tool>, ...}` invocations
///
/// Built-in names win; names carrying [`EXTERNAL_TOOL_PREFIX`] go to the
/// tool-server registry with the prefix stripped; anything else is an
/// unknown tool.
#[derive(Debug)]
pub struct ToolDispatcher {
    builtins: BuiltinTools,
    context: ToolContext,
    registry: Arc<ToolServerRegistry>,
    servers: RwLock<Vec<ToolServerConfig>>,
}

impl ToolDispatcher {
    /// Create a dispatcher with the standard built-in tools
    pub fn new(
        cwd: impl Into<PathBuf>,
        engine: Arc<CommandExecutionEngine>,
        registry: Arc<ToolServerRegistry>,
        servers: Vec<ToolServerConfig>,
    ) -> Self {
        Self {
            builtins: BuiltinTools::standard(),
            context: ToolContext::new(cwd, engine),
            registry,
            servers: RwLock::new(servers),
        }
    }

    /// Working directory for built-in tools
    pub fn cwd(&self) -> &Path {
        &self.context.cwd
    }

    /// The command execution engine
    pub fn engine(&self) -> &CommandExecutionEngine {
        self.context.engine()
    }

    /// The tool-server registry
    pub fn registry(&self) -> &ToolServerRegistry {
        &self.registry
    }

    /// Replace the desired tool-server set; applied on the next external call
    pub async fn set_tool_servers(&self, servers: Vec<ToolServerConfig>) {
        *self.servers.write().await = servers;
    }

    /// Dispatch one invocation
    pub async fn dispatch(&self, request: Value) -> Result<ToolResult> {
        let tool_name = request
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| ToolError::invalid_input("missing string field 'type'"))?
            .to_string();

        if let Some(tool) = self.builtins.get(&tool_name) {
            tracing::debug!(tool = %tool_name, "Dispatching built-in tool");
            return tool.execute(request, &self.context).await;
        }

        if let Some(external) = tool_name.strip_prefix(EXTERNAL_TOOL_PREFIX) {
            let arguments = external_arguments(request);
            let servers = self.servers.read().await.clone();
            tracing::debug!(tool = %external, "Dispatching external tool");
            let invocation = self.registry.invoke(external, arguments, &servers).await?;
            return Ok(ToolResult::from_invocation(&invocation));
        }

        Err(ToolError::unknown_tool(tool_name))
    }

    /// Built-in descriptors followed by the prefixed external ones
    pub async fn tool_definitions(&self) -> Result<Vec<ToolSpec>> {
        let mut specs = self.builtins.specs();
        let servers = self.servers.read().await.clone();
        specs.extend(self.registry.tool_specs(&servers).await?);
        Ok(specs)
    }

    /// Stop live commands and tool servers
    pub async fn shutdown(&self) {
        self.context.engine().shutdown().await;
        self.registry.shutdown().await;
    }
}

/// The invocation minus its `type` discriminator
fn external_arguments(request: Value) -> Value {
    match request {
        Value::Object(mut fields) => {
            fields.remove("type");
            Value::Object(fields)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::ToolStatus;
    use crate::mcp::{ToolServerClient, ToolServerError, ToolServerLauncher};
    use crate::types::ExecutionConfig;
    use async_trait::async_trait;
    use serde_json::json;
    use tempfile::TempDir;

    #[derive(Debug)]
    struct EchoClient {
        tools: Vec<ToolSpec>,
    }

    #[async_trait]
    impl ToolServerClient for EchoClient {
        fn name(&self) -> &str {
            "echo"
        }

        fn tools(&self) -> &[ToolSpec] {
            &self.tools
        }

        async fn call_tool(&self, _tool: &str, arguments: Value) -> std::result::Result<Value, ToolServerError> {
            Ok(json!({"content": [{"type": "text", "text": arguments.to_string()}]}))
        }

        async fn shutdown(&self) -> std::result::Result<(), ToolServerError> {
            Ok(())
        }
    }

    #[derive(Debug)]
    struct EchoLauncher;

    #[async_trait]
    impl ToolServerLauncher for EchoLauncher {
        async fn launch(
            &self,
            _config: &ToolServerConfig,
        ) -> std::result::Result<Box<dyn ToolServerClient>, ToolServerError> {
            Ok(Box::new(EchoClient {
                tools: vec![ToolSpec::new("echo", "Echo arguments", json!({"type": "object"}))],
            }))
        }
    }

    fn dispatcher(dir: &TempDir) -> ToolDispatcher {
        ToolDispatcher::new(
            dir.path(),
            Arc::new(CommandExecutionEngine::new(ExecutionConfig::default())),
            Arc::new(ToolServerRegistry::new(Arc::new(EchoLauncher))),
            vec![ToolServerConfig::new("echo", "echo-server", vec![])],
        )
    }

    #[tokio::test]
    async fn test_unknown_tool_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = dispatcher(&dir)
            .dispatch(json!({"type": "teleport"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(name) if name == "teleport"));
    }

    #[tokio::test]
    async fn test_missing_type_is_invalid_input() {
        let dir = TempDir::new().unwrap();
        let err = dispatcher(&dir)
            .dispatch(json!({"command": "ls"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_malformed_command_input_is_fatal() {
        let dir = TempDir::new().unwrap();
        let err = dispatcher(&dir)
            .dispatch(json!({"type": "execute_command", "pid": 3}))
            .await
            .unwrap_err();
        assert!(err.to_string().starts_with("Invalid input format"));
    }

    #[tokio::test]
    async fn test_builtin_routing() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha").unwrap();

        let result = dispatcher(&dir)
            .dispatch(json!({"type": "read_file", "path": "a.txt"}))
            .await
            .unwrap();
        assert_eq!(result.status, ToolStatus::Success);
        assert_eq!(result.content, "alpha");
    }

    #[tokio::test]
    async fn test_external_routing_strips_prefix_and_type() {
        let dir = TempDir::new().unwrap();
        let result = dispatcher(&dir)
            .dispatch(json!({"type": "mcp_echo", "text": "hi"}))
            .await
            .unwrap();
        assert!(!result.is_error);
        assert_eq!(result.content, r#"{"text":"hi"}"#);
        assert_eq!(result.metadata.unwrap()["name"], "echo");
    }

    #[tokio::test]
    async fn test_external_not_found_is_error_result() {
        let dir = TempDir::new().unwrap();
        let result = dispatcher(&dir)
            .dispatch(json!({"type": "mcp_missing"}))
            .await
            .unwrap();
        assert!(result.is_error);
        assert_eq!(result.metadata.unwrap()["found"], false);
    }

    #[tokio::test]
    async fn test_tool_definitions() {
        let dir = TempDir::new().unwrap();
        let dispatcher = dispatcher(&dir);
        let names: Vec<String> = dispatcher
            .tool_definitions()
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.name)
            .collect();

        assert_eq!(names.len(), 6);
        assert_eq!(names.last().map(String::as_str), Some("mcp_echo"));
        assert!(names.contains(&"execute_command".to_string()));

        dispatcher.set_tool_servers(Vec::new()).await;
        assert_eq!(dispatcher.tool_definitions().await.unwrap().len(), 5);
    }
}
