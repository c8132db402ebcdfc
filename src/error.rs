//! Error types for the MCP server.

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;

/// Result type alias for MCP operations.
pub type Result<T> = std::result::Result<T, McpError>;

/// Errors raised while serving tool calls.
///
/// Every variant except [`McpError::Config`] is caught at the dispatcher
/// boundary and reported to the caller as an error result.
#[derive(Error, Debug)]
pub enum McpError {
    /// No tool is registered under the requested name.
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    /// A required argument was absent (or null).
    #[error("Missing required argument: {0}")]
    MissingArg(String),

    /// An argument was present but had the wrong shape or value.
    #[error("Invalid argument '{name}': {reason}")]
    InvalidArg {
        /// Argument name
        name: String,
        /// What was wrong with it
        reason: String,
    },

    /// The addressed document does not exist.
    #[error("Item not found: '{id}' in container '{container}'")]
    ItemNotFound {
        /// Container that was searched
        container: String,
        /// Document id
        id: String,
    },

    /// Any other failure reported by the document store.
    #[error("Store error: {0}")]
    Store(StoreError),

    /// The store did not answer within the configured timeout.
    #[error("{operation} timed out after {}s", .after.as_secs_f64())]
    Timeout {
        /// Store operation that was waiting
        operation: String,
        /// Configured limit
        after: Duration,
    },

    /// A query produced more items than the configured cap.
    #[error("Query returned more than {limit} items; narrow the query or raise --max-query-items")]
    ResultLimit {
        /// Configured cap
        limit: usize,
    },

    /// A write was attempted against a read-only server.
    #[error("Access denied: {0} rejected, server is read-only")]
    AccessDenied(String),

    /// Startup configuration problem. Fatal.
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failure.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O failure on the transport.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal condition.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl McpError {
    /// Whether the error came from argument validation rather than execution.
    pub fn is_validation(&self) -> bool {
        matches!(self, McpError::MissingArg(_) | McpError::InvalidArg { .. })
    }

    /// JSON-RPC error code for protocol-level failures.
    pub fn code(&self) -> i64 {
        match self {
            McpError::UnknownTool(_) => -32601,
            McpError::MissingArg(_) | McpError::InvalidArg { .. } => -32602,
            McpError::Json(_) => -32700,
            McpError::ItemNotFound { .. } => -32001,
            McpError::AccessDenied(_) => -32003,
            McpError::Timeout { .. } => -32004,
            _ => -32000,
        }
    }
}

impl From<StoreError> for McpError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { container, id } => McpError::ItemNotFound { container, id },
            other => McpError::Store(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_not_found_becomes_item_not_found() {
        let err: McpError = StoreError::NotFound {
            container: "orders".to_string(),
            id: "42".to_string(),
        }
        .into();
        assert!(matches!(err, McpError::ItemNotFound { .. }));
        assert_eq!(err.to_string(), "Item not found: '42' in container 'orders'");
    }

    #[test]
    fn test_other_store_errors_are_wrapped() {
        let err: McpError = StoreError::Http {
            status: 429,
            message: "Request rate is large".to_string(),
        }
        .into();
        assert!(matches!(err, McpError::Store(_)));
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Request rate is large"));
    }

    #[test]
    fn test_validation_classification() {
        assert!(McpError::MissingArg("item".to_string()).is_validation());
        assert!(!McpError::UnknownTool("nope".to_string()).is_validation());
        assert_eq!(McpError::MissingArg("item".to_string()).code(), -32602);
    }
}
