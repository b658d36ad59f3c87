//! Tool descriptor types shared by built-in and external tools

use serde::{Deserialize, Serialize};

/// Tool kind for categorizing tools in the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolKind {
    /// File read operations
    Read,
    /// File edit/write operations
    Edit,
    /// Command execution
    Execute,
    /// Tools provided by an external tool server
    External,
    /// Other/unknown tool types
    #[default]
    Other,
}

impl ToolKind {
    /// Get a human-readable label for the kind
    pub fn label(&self) -> &'static str {
        match self {
            ToolKind::Read => "Read",
            ToolKind::Edit => "Edit",
            ToolKind::Execute => "Execute",
            ToolKind::External => "External",
            ToolKind::Other => "Tool",
        }
    }
}

/// Tool descriptor advertised to the language model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSpec {
    /// Tool name
    pub name: String,
    /// Tool description
    pub description: String,
    /// JSON Schema for input
    pub input_schema: serde_json::Value,
}

impl ToolSpec {
    /// Create a new tool descriptor
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: serde_json::Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }

    /// Copy of this descriptor under a prefixed name
    pub fn prefixed(&self, prefix: &str) -> Self {
        Self {
            name: format!("{prefix}{}", self.name),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tool_kind_label() {
        assert_eq!(ToolKind::Execute.label(), "Execute");
        assert_eq!(ToolKind::default().label(), "Tool");
    }

    #[test]
    fn test_prefixed_keeps_schema() {
        let spec = ToolSpec::new("search", "Search docs", json!({"type": "object"}));
        let prefixed = spec.prefixed("mcp_");
        assert_eq!(prefixed.name, "mcp_search");
        assert_eq!(prefixed.input_schema, spec.input_schema);
        assert_eq!(spec.name, "search");
    }

    #[test]
    fn test_serialize_camel_case() {
        let spec = ToolSpec::new("a", "b", json!({}));
        let value = serde_json::to_value(&spec).unwrap();
        assert!(value.get("inputSchema").is_some());
    }
}
