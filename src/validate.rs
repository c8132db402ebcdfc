//! Argument schemas and shape validation.
//!
//! Each tool declares an [`ArgSchema`]: a flat object whose properties have a
//! kind and a required flag. [`validate`] checks an incoming argument bag
//! against it before any handler runs. This is a shape check only; there are
//! no unions, formats or ranges.

use std::fmt;

use serde::{Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};

/// Expected shape of one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    /// JSON string
    String,
    /// JSON number without a fractional part
    Integer,
    /// Any JSON number
    Number,
    /// JSON boolean
    Boolean,
    /// JSON object
    Object,
    /// JSON array
    Array,
    /// Anything, including null
    Any,
}

impl Kind {
    /// Whether `value` has this shape.
    pub fn matches(self, value: &JsonValue) -> bool {
        match self {
            Kind::String => value.is_string(),
            Kind::Integer => value.is_i64() || value.is_u64(),
            Kind::Number => value.is_number(),
            Kind::Boolean => value.is_boolean(),
            Kind::Object => value.is_object(),
            Kind::Array => value.is_array(),
            Kind::Any => true,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Kind::String => "string",
            Kind::Integer => "integer",
            Kind::Number => "number",
            Kind::Boolean => "boolean",
            Kind::Object => "object",
            Kind::Array => "array",
            Kind::Any => "any",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// JSON kind name of a value, as used in error messages and reports.
pub fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// One declared argument.
#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    /// Argument name
    pub name: String,
    /// Expected shape
    pub kind: Kind,
    /// Whether the argument must be present
    pub required: bool,
    /// Human-readable description advertised to callers
    pub description: Option<String>,
}

/// Schema of a tool's argument object.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArgSchema {
    properties: Vec<Property>,
}

impl ArgSchema {
    /// An object schema with no properties.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(mut self, name: &str, kind: Kind, required: bool) -> Self {
        self.properties.push(Property {
            name: name.to_string(),
            kind,
            required,
            description: None,
        });
        self
    }

    /// Add a required property.
    pub fn required(self, name: &str, kind: Kind) -> Self {
        self.push(name, kind, true)
    }

    /// Add an optional property.
    pub fn optional(self, name: &str, kind: Kind) -> Self {
        self.push(name, kind, false)
    }

    /// Attach a description to an already-declared property.
    pub fn describe(mut self, name: &str, description: &str) -> Self {
        if let Some(prop) = self.properties.iter_mut().find(|p| p.name == name) {
            prop.description = Some(description.to_string());
        }
        self
    }

    /// Declared properties, in declaration order.
    pub fn properties(&self) -> &[Property] {
        &self.properties
    }

    /// Render as a JSON Schema object for `tools/list`.
    pub fn to_json(&self) -> JsonValue {
        let mut props = Map::new();
        for prop in &self.properties {
            let mut entry = Map::new();
            if prop.kind != Kind::Any {
                entry.insert("type".to_string(), JsonValue::from(prop.kind.as_str()));
            }
            if let Some(description) = &prop.description {
                entry.insert("description".to_string(), JsonValue::from(description.as_str()));
            }
            props.insert(prop.name.clone(), JsonValue::Object(entry));
        }
        let required: Vec<&str> = self
            .properties
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();
        serde_json::json!({
            "type": "object",
            "properties": props,
            "required": required,
        })
    }
}

impl Serialize for ArgSchema {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

/// Check `args` against `schema`.
///
/// Properties are checked in declaration order and the first offending one is
/// reported. Unknown extra properties are ignored. A `null` value counts as
/// absent.
pub fn validate(schema: &ArgSchema, args: &Map<String, JsonValue>) -> Result<()> {
    for prop in schema.properties() {
        match args.get(&prop.name) {
            None | Some(JsonValue::Null) => {
                if prop.required {
                    return Err(McpError::MissingArg(prop.name.clone()));
                }
            }
            Some(value) if !prop.kind.matches(value) => {
                return Err(McpError::InvalidArg {
                    name: prop.name.clone(),
                    reason: format!("expected {}, got {}", prop.kind, json_kind(value)),
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}
