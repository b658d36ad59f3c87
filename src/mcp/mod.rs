//! External tool servers
//!
//! Tool servers are child processes speaking MCP over stdio, driven by `rmcp`. The
//! [`ToolServerRegistry`] keeps one connection per configured server and
//! relaunches the set when its configuration changes.

mod client;
mod diagnostics;
mod registry;

pub use client::{
    LAUNCH_TIMEOUT, SHUTDOWN_GRACE, StdioLauncher, StdioToolServerClient,
    ToolServerClient, ToolServerError, ToolServerLauncher, content_text,
};
pub use diagnostics::{ConnectionDiagnostic, FailureHint, check_connection};
pub use registry::{
    EXTERNAL_TOOL_PREFIX, TOOL_CALL_TIMEOUT, ToolInvocationResult, ToolServerRegistry,
};
