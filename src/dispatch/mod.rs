//! Tool invocation dispatch
//!
//! Turns a `{type, ...}` request from the conversation loop into a call on
//! a built-in tool, the command engine, or an external tool server, and
//! normalises the outcome into a [`ToolResult`].

mod dispatcher;
mod result;
pub mod tools;

pub use dispatcher::ToolDispatcher;
pub use result::{ToolResult, ToolStatus};
pub use tools::{BuiltinTools, Tool, ToolContext};
