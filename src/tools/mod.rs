//! Tool registry.
//!
//! Core document tools live in [`items`]; read-only container exploration
//! helpers live in [`explore`]. Both register into one [`ToolRegistry`] that
//! is built at startup and never mutated afterwards.

pub mod explore;
pub mod items;

use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};
use crate::session::McpSession;
use crate::validate::ArgSchema;

/// A tool definition for the MCP tools/list response.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    /// Tool name (e.g., "get_item")
    pub name: String,
    /// Tool description
    pub description: String,
    /// Schema for the input parameters
    #[serde(rename = "inputSchema")]
    pub input_schema: ArgSchema,
}

impl ToolDef {
    /// Create a new tool definition.
    pub fn new(name: &str, description: &str, input_schema: ArgSchema) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// Handler for one tool. Receives arguments that already passed validation
/// and returns the serialized success payload.
pub type ToolHandler = fn(&McpSession, Map<String, JsonValue>) -> Result<String>;

/// A registered tool.
pub struct ToolEntry {
    def: ToolDef,
    handler: ToolHandler,
}

impl ToolEntry {
    /// The tool's definition.
    pub fn def(&self) -> &ToolDef {
        &self.def
    }

    /// The tool's handler.
    pub fn handler(&self) -> ToolHandler {
        self.handler
    }
}

/// Registry of available MCP tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<ToolEntry>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    /// A registry with no tools.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create the registry with every built-in tool.
    pub fn new() -> Result<Self> {
        let mut registry = Self::empty();
        items::register(&mut registry)?;
        explore::register(&mut registry)?;
        Ok(registry)
    }

    /// Add a tool. Registering a name twice is a configuration error.
    pub fn register(&mut self, def: ToolDef, handler: ToolHandler) -> Result<()> {
        if self.index.contains_key(&def.name) {
            return Err(McpError::Config(format!(
                "tool '{}' is already registered",
                def.name
            )));
        }
        self.index.insert(def.name.clone(), self.tools.len());
        self.tools.push(ToolEntry { def, handler });
        Ok(())
    }

    /// Find a tool by name.
    pub fn lookup(&self, name: &str) -> Result<&ToolEntry> {
        self.index
            .get(name)
            .map(|&i| &self.tools[i])
            .ok_or_else(|| McpError::UnknownTool(name.to_string()))
    }

    /// All tool definitions, in registration order.
    pub fn definitions(&self) -> Vec<&ToolDef> {
        self.tools.iter().map(|entry| &entry.def).collect()
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// Helper macro for declaring tool argument schemas.
#[macro_export]
macro_rules! schema {
    // Object with required and optional properties
    (object {
        required: { $($req_name:literal : $req_type:tt),* $(,)? },
        optional: { $($opt_name:literal : $opt_type:tt),* $(,)? }
    }) => {{
        $crate::ArgSchema::new()
            $(.required($req_name, $crate::schema!(@kind $req_type)))*
            $(.optional($opt_name, $crate::schema!(@kind $opt_type)))*
    }};

    // Object with only required properties
    (object {
        required: { $($req_name:literal : $req_type:tt),* $(,)? }
    }) => {{
        $crate::ArgSchema::new()
            $(.required($req_name, $crate::schema!(@kind $req_type)))*
    }};

    // Object with only optional properties
    (object {
        optional: { $($opt_name:literal : $opt_type:tt),* $(,)? }
    }) => {{
        $crate::ArgSchema::new()
            $(.optional($opt_name, $crate::schema!(@kind $opt_type)))*
    }};

    // Empty object (no parameters)
    (object {}) => {{
        $crate::ArgSchema::new()
    }};

    // Kind mappings
    (@kind string) => { $crate::Kind::String };
    (@kind integer) => { $crate::Kind::Integer };
    (@kind number) => { $crate::Kind::Number };
    (@kind boolean) => { $crate::Kind::Boolean };
    (@kind object) => { $crate::Kind::Object };
    (@kind array) => { $crate::Kind::Array };
    (@kind any) => { $crate::Kind::Any };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::Kind;

    fn noop(_: &McpSession, _: Map<String, JsonValue>) -> Result<String> {
        Ok(String::new())
    }

    #[test]
    fn test_builtin_tools_registered_once() {
        let registry = ToolRegistry::new().unwrap();
        let names: Vec<&str> = registry
            .definitions()
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(
            &names[..4],
            &["get_item", "put_item", "update_item", "query_container"]
        );
        assert_eq!(registry.len(), 12);
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ToolRegistry::empty();
        let def = ToolDef::new("echo", "Echo", schema!(object {}));
        registry.register(def.clone(), noop).unwrap();
        let err = registry.register(def, noop).unwrap_err();
        assert!(matches!(err, McpError::Config(_)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unknown() {
        let registry = ToolRegistry::empty();
        let err = registry.lookup("drop_database").err().unwrap();
        assert_eq!(err.to_string(), "Unknown tool: drop_database");
    }

    #[test]
    fn test_schema_macro() {
        let schema = schema!(object {
            required: { "containerName": string, "item": object },
            optional: { "limit": integer }
        });
        let kinds: Vec<(&str, Kind, bool)> = schema
            .properties()
            .iter()
            .map(|p| (p.name.as_str(), p.kind, p.required))
            .collect();
        assert_eq!(
            kinds,
            vec![
                ("containerName", Kind::String, true),
                ("item", Kind::Object, true),
                ("limit", Kind::Integer, false),
            ]
        );
    }

    #[test]
    fn test_tool_def_serializes_input_schema() {
        let def = ToolDef::new(
            "get_item",
            "Read",
            schema!(object { required: { "id": string } }),
        );
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["inputSchema"]["required"], serde_json::json!(["id"]));
        assert_eq!(json["inputSchema"]["properties"]["id"]["type"], "string");
    }
}
