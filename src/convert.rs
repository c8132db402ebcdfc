//! Conversion utilities between tool arguments, documents and payload text.
//!
//! Argument bags arrive as loose JSON maps; once validated they are decoded
//! into typed request structs with [`parse_args`]. Results go back to the
//! caller as text via [`to_payload`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};

use crate::error::{McpError, Result};

/// Decode a validated argument bag into a typed request.
pub fn parse_args<T: DeserializeOwned>(args: Map<String, JsonValue>) -> Result<T> {
    serde_json::from_value(JsonValue::Object(args)).map_err(|e| McpError::InvalidArg {
        name: "arguments".to_string(),
        reason: e.to_string(),
    })
}

/// Serialize a success payload as pretty JSON text.
pub fn to_payload<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    Ok(serde_json::to_string_pretty(value)?)
}

/// Overwrite top-level keys of `current` with `updates`.
///
/// Keys absent from `updates` are kept. Nested objects are replaced wholesale,
/// never merged recursively.
pub fn shallow_merge(current: &mut Map<String, JsonValue>, updates: Map<String, JsonValue>) {
    for (key, value) in updates {
        current.insert(key, value);
    }
}

/// The string `id` of a document, if it has one.
pub fn document_id(doc: &Map<String, JsonValue>) -> Option<&str> {
    doc.get("id").and_then(|v| v.as_str())
}

/// Check a caller-supplied field path before it is spliced into query text.
///
/// Accepts dotted identifiers such as `address.city`.
pub fn check_field_path(arg: &str, path: &str) -> Result<()> {
    let valid = !path.is_empty()
        && path.split('.').all(|segment| {
            let mut chars = segment.chars();
            matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
                && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        });
    if valid {
        Ok(())
    } else {
        Err(McpError::InvalidArg {
            name: arg.to_string(),
            reason: format!("'{}' is not a valid field name", path),
        })
    }
}

/// Check that an integer argument falls within `min..=max`.
///
/// Takes the raw signed value so negative input is reported against `arg`
/// instead of failing request decoding.
pub fn check_range(arg: &str, value: i64, min: usize, max: usize) -> Result<usize> {
    usize::try_from(value)
        .ok()
        .filter(|v| (min..=max).contains(v))
        .ok_or_else(|| McpError::InvalidArg {
            name: arg.to_string(),
            reason: format!("must be between {} and {}, got {}", min, max, value),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    fn obj(value: JsonValue) -> Map<String, JsonValue> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_shallow_merge_replaces_nested_objects() {
        let mut current = obj(json!({"id": "x", "a": 1, "b": {"c": 2}, "keep": true}));
        shallow_merge(&mut current, obj(json!({"a": 5, "b": {"d": 9}, "new": "n"})));
        assert_eq!(
            JsonValue::Object(current),
            json!({"id": "x", "a": 5, "b": {"d": 9}, "keep": true, "new": "n"})
        );
    }

    #[test]
    fn test_parse_args_into_struct() {
        #[derive(Deserialize)]
        struct Req {
            #[serde(rename = "containerName")]
            container_name: String,
            limit: Option<u64>,
        }
        let req: Req = parse_args(obj(json!({"containerName": "c", "extra": 1}))).unwrap();
        assert_eq!(req.container_name, "c");
        assert_eq!(req.limit, None);

        let err = parse_args::<Req>(obj(json!({"containerName": 3}))).err().unwrap();
        assert!(err.is_validation());
    }

    #[test]
    fn test_field_path_check() {
        assert!(check_field_path("fieldName", "City").is_ok());
        assert!(check_field_path("fieldName", "address.zip_code").is_ok());
        for bad in ["", "1abc", "a b", "c.City = 'x' OR 1=1", "a..b", "a-b"] {
            assert!(check_field_path("fieldName", bad).is_err(), "{:?}", bad);
        }
    }

    #[test]
    fn test_range_check() {
        assert_eq!(check_range("limit", 1, 1, 100).unwrap(), 1);
        assert_eq!(check_range("limit", 100, 1, 100).unwrap(), 100);
        assert!(check_range("limit", 0, 1, 100).is_err());
        assert!(check_range("limit", 101, 1, 100).is_err());

        let err = check_range("limit", -5, 1, 100).unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid argument 'limit': must be between 1 and 100, got -5"
        );
    }
}
