//! One-off tool-server connection checks

use std::time::Instant;

use serde::Serialize;

use super::client::ToolServerLauncher;
use crate::types::ToolServerConfig;

/// Likely cause of a failed connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureHint {
    /// The server executable could not be found
    MissingBinary,
    /// The server did not answer in time
    Timeout,
    /// The OS refused to run the executable or open a resource
    PermissionDenied,
    /// The server wanted a port that is taken
    PortInUse,
    /// Nothing recognisable in the error text
    Unknown,
}

impl FailureHint {
    /// Classify an error message
    pub fn classify(message: &str) -> Self {
        let message = message.to_lowercase();
        let any = |needles: &[&str]| needles.iter().any(|n| message.contains(n));

        if any(&["enoent", "no such file", "not found", "cannot find"]) {
            Self::MissingBinary
        } else if any(&["timed out", "timeout"]) {
            Self::Timeout
        } else if any(&["permission denied", "eacces", "eperm"]) {
            Self::PermissionDenied
        } else if any(&["eaddrinuse", "address already in use"]) {
            Self::PortInUse
        } else {
            Self::Unknown
        }
    }

    /// Advice shown to the user
    pub fn advice(self) -> &'static str {
        match self {
            Self::MissingBinary => {
                "The server command was not found. Check that it is installed and on PATH."
            }
            Self::Timeout => {
                "The server did not respond in time. Check that it speaks the stdio protocol."
            }
            Self::PermissionDenied => {
                "Permission denied. Check that the command is executable by the current user."
            }
            Self::PortInUse => "A port the server needs is already in use. Stop the other process.",
            Self::Unknown => "Check the server command, arguments and environment.",
        }
    }
}

/// Report of a standalone connection attempt
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionDiagnostic {
    /// Whether the server started and listed its tools
    pub success: bool,
    /// Server name from the config
    pub server_name: String,
    /// Number of advertised tools
    pub tool_count: usize,
    /// Advertised tool names
    pub tools: Vec<String>,
    /// Wall time of the attempt
    pub elapsed_ms: u64,
    /// Summary line
    pub message: String,
    /// Error text on failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Classified failure cause
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<FailureHint>,
}

/// Launch `config`, list its tools and shut it down again
pub async fn check_connection(
    launcher: &dyn ToolServerLauncher,
    config: &ToolServerConfig,
) -> ConnectionDiagnostic {
    let started = Instant::now();
    let outcome = launcher.launch(config).await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match outcome {
        Ok(client) => {
            let tools: Vec<String> = client.tools().iter().map(|t| t.name.clone()).collect();
            if let Err(e) = client.shutdown().await {
                tracing::warn!(server = %config.name, error = %e, "Failed to shut down checked server");
            }
            tracing::info!(server = %config.name, tools = tools.len(), elapsed_ms, "Connection test passed");

            ConnectionDiagnostic {
                success: true,
                server_name: config.name.clone(),
                tool_count: tools.len(),
                message: format!(
                    "Connected to '{}' in {elapsed_ms}ms, {} tool(s) available",
                    config.name,
                    tools.len()
                ),
                tools,
                elapsed_ms,
                error: None,
                hint: None,
            }
        }
        Err(e) => {
            let error = e.to_string();
            let hint = FailureHint::classify(&error);
            tracing::warn!(server = %config.name, error = %error, ?hint, "Connection test failed");

            ConnectionDiagnostic {
                success: false,
                server_name: config.name.clone(),
                tool_count: 0,
                tools: Vec::new(),
                elapsed_ms,
                message: hint.advice().to_string(),
                error: Some(error),
                hint: Some(hint),
            }
        }
    }
}
