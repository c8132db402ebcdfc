//! Tool invocation.
//!
//! [`Dispatcher::invoke`] is the single entry point for tool calls: resolve
//! the tool, validate arguments, run the handler, and fold whatever happened
//! into a [`ToolResult`]. Nothing escapes this boundary as an `Err` or a
//! panic.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};
use crate::session::McpSession;
use crate::tools::{ToolDef, ToolRegistry};
use crate::validate::validate;

/// One tool invocation request (`tools/call` params).
#[derive(Debug, Clone, Deserialize)]
pub struct ToolCall {
    /// Tool name
    pub name: String,
    /// Argument bag; absent means empty
    #[serde(default)]
    pub arguments: Map<String, JsonValue>,
}

impl ToolCall {
    /// Build a call from a name and a JSON object of arguments.
    ///
    /// Non-object `arguments` are treated as empty.
    pub fn new(name: impl Into<String>, arguments: JsonValue) -> Self {
        Self {
            name: name.into(),
            arguments: match arguments {
                JsonValue::Object(map) => map,
                _ => Map::new(),
            },
        }
    }
}

/// Uniform result envelope returned for every tool call.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    /// Payload on success, error message on failure
    pub text: String,
    /// Whether the call failed
    pub is_error: bool,
}

#[derive(Serialize)]
struct TextContent<'a> {
    #[serde(rename = "type")]
    kind: &'static str,
    text: &'a str,
}

impl ToolResult {
    /// A successful result carrying `text`.
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_error: false,
        }
    }

    /// A failed result describing `err`.
    pub fn failure(err: &McpError) -> Self {
        Self {
            text: format!("Error: {}", err),
            is_error: true,
        }
    }

    /// MCP `CallToolResult` JSON.
    pub fn to_json(&self) -> JsonValue {
        serde_json::json!({
            "content": [TextContent { kind: "text", text: &self.text }],
            "isError": self.is_error,
        })
    }

    /// Parse the success payload as JSON.
    pub fn json(&self) -> Result<JsonValue> {
        Ok(serde_json::from_str(&self.text)?)
    }
}

/// Resolves, validates and runs tool calls against one session.
///
/// Holds no mutable state; safe to share across threads.
pub struct Dispatcher {
    registry: ToolRegistry,
    session: McpSession,
}

impl Dispatcher {
    /// Create a dispatcher from a fully built registry.
    pub fn new(registry: ToolRegistry, session: McpSession) -> Self {
        Self { registry, session }
    }

    /// Registered tool definitions.
    pub fn tools(&self) -> Vec<&ToolDef> {
        self.registry.definitions()
    }

    /// The session tool handlers run against.
    pub fn session(&self) -> &McpSession {
        &self.session
    }

    /// Run one tool call to completion.
    pub fn invoke(&self, call: ToolCall) -> ToolResult {
        let span = tracing::info_span!("tool_call", tool = %call.name);
        let _guard = span.enter();
        tracing::debug!("invoking tool");

        let outcome = catch_unwind(AssertUnwindSafe(|| self.try_invoke(call)))
            .unwrap_or_else(|_| Err(McpError::Internal("tool handler panicked".to_string())));

        match outcome {
            Ok(payload) => ToolResult::success(payload),
            Err(err) => {
                tracing::warn!(error = %err, validation = err.is_validation(), "tool call failed");
                ToolResult::failure(&err)
            }
        }
    }

    fn try_invoke(&self, call: ToolCall) -> Result<String> {
        let entry = self.registry.lookup(&call.name)?;
        validate(&entry.def().input_schema, &call.arguments)?;
        (entry.handler())(&self.session, call.arguments)
    }
}
