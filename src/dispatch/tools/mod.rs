//! Built-in tools
//!
//! - **File Tools**: read_file, write_file, list_directory
//! - **Command Tools**: execute_command, list_processes

mod base;
mod execute_command;
mod list_directory;
mod list_processes;
mod read_file;
mod write_file;

use std::collections::BTreeMap;
use std::sync::Arc;

pub use base::{Tool, ToolContext};
pub use execute_command::ExecuteCommandTool;
pub use list_directory::ListDirectoryTool;
pub use list_processes::ListProcessesTool;
pub use read_file::ReadFileTool;
pub use write_file::WriteFileTool;

use crate::types::ToolSpec;

/// Table of built-in tools by name
#[derive(Debug, Default)]
pub struct BuiltinTools {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl BuiltinTools {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
        }
    }

    /// Table with every built-in tool registered
    pub fn standard() -> Self {
        let mut tools = Self::new();
        tools.register(ReadFileTool::new());
        tools.register(WriteFileTool::new());
        tools.register(ListDirectoryTool::new());
        tools.register(ExecuteCommandTool::new());
        tools.register(ListProcessesTool::new());
        tools
    }

    /// Register a tool
    pub fn register<T: Tool + 'static>(&mut self, tool: T) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// Descriptors for all registered tools, sorted by name
    pub fn specs(&self) -> Vec<ToolSpec> {
        self.tools.values().map(|tool| tool.spec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ToolKind;

    #[test]
    fn test_standard_tools() {
        let tools = BuiltinTools::standard();
        let names: Vec<String> = tools.specs().into_iter().map(|s| s.name).collect();
        assert_eq!(
            names,
            vec![
                "execute_command",
                "list_directory",
                "list_processes",
                "read_file",
                "write_file"
            ]
        );
        assert!(tools.get("mcp_search").is_none());
    }

    #[test]
    fn test_specs_have_object_schemas() {
        for spec in BuiltinTools::standard().specs() {
            assert_eq!(spec.input_schema["type"], "object", "{}", spec.name);
            assert!(!spec.description.is_empty());
        }
    }

    #[test]
    fn test_tool_kinds() {
        let tools = BuiltinTools::standard();
        assert_eq!(tools.get("read_file").unwrap().kind(), ToolKind::Read);
        assert_eq!(tools.get("write_file").unwrap().kind(), ToolKind::Edit);
        assert_eq!(tools.get("execute_command").unwrap().kind(), ToolKind::Execute);
    }

    #[test]
    fn test_empty_table() {
        let tools = BuiltinTools::new();
        assert!(tools.specs().is_empty());
        assert!(tools.get("read_file").is_none());
    }
}
