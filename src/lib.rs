//! Assistant tool host
//!
//! Executes tool invocations requested by a language model and returns a
//! normalized [`ToolResult`]. Invocations are routed to one of three backends:
//!
//! - built-in filesystem tools (`read_file`, `write_file`, `list_directory`)
//! - the [`CommandExecutionEngine`], which runs allow-listed shell commands,
//!   detects prompts and ready servers in their output, and keeps
//!   interactive processes addressable by pid
//! - external tool servers (child processes speaking JSON-RPC over stdio),
//!   managed by the [`ToolServerRegistry`] and exposed as `mcp_<tool>`
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use toolhost::{
//!     CommandExecutionEngine, SettingsManager, StdioLauncher, ToolDispatcher, ToolServerRegistry,
//! };
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let cwd = std::env::current_dir()?;
//!     let settings = SettingsManager::new(&cwd)?;
//!
//!     let engine = Arc::new(CommandExecutionEngine::new(settings.execution_config()));
//!     let registry = Arc::new(ToolServerRegistry::new(Arc::new(StdioLauncher::new())));
//!     let dispatcher = ToolDispatcher::new(cwd, engine, registry, settings.tool_server_configs());
//!
//!     let result = dispatcher
//!         .dispatch(json!({"type": "execute_command", "command": "gh pr list"}))
//!         .await?;
//!     println!("{}", result.content);
//!
//!     dispatcher.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Environment Variables
//!
//! - `TOOLHOST_SHELL`: Shell used for commands when settings name none
//! - `SHELL`: Fallback shell
//! - `RUST_LOG`: Log filter, overrides `-v`/`-q`
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (with the `otel` feature)
//!
//! ## Settings
//!
//! Settings files are merged in this order (later wins):
//! - `~/.toolhost/settings.json` (user settings)
//! - `.toolhost/settings.json` (project settings)
//! - `.toolhost/settings.local.json` (local settings)
//! - the file passed with `--settings`
//!
//! ### Example settings.json
//!
//! ```json
//! {
//!   "shell": "/bin/zsh",
//!   "allowedCommands": [
//!     {"pattern": "gh pr *", "description": "GitHub pull requests"},
//!     {"pattern": "npm run dev", "description": "Dev server"}
//!   ],
//!   "mcpServers": {
//!     "docs": {
//!       "command": "docs-server",
//!       "args": ["--stdio"],
//!       "env": {"DOCS_ROOT": "./docs"}
//!     }
//!   }
//! }
//! ```

pub mod cli;
pub mod dispatch;
pub mod host;
pub mod mcp;
pub mod process;
pub mod settings;
pub mod tracing;
pub mod types;

pub use cli::Cli;
pub use dispatch::{ToolDispatcher, ToolResult, ToolStatus};
pub use host::{run, shutdown_otel};
pub use mcp::{StdioLauncher, ToolServerRegistry};
pub use process::CommandExecutionEngine;
pub use settings::{Settings, SettingsManager};
pub use types::{Result, ToolError};
