//! Document store capability.
//!
//! The tool layer only talks to a [`DocumentStore`]: a handle bound to one
//! logical database that can read, upsert, replace and query documents in its
//! containers. Two implementations ship with the crate:
//!
//! - [`CosmosStore`]: Azure Cosmos DB over its REST API (feature `cosmos`)
//! - [`MemoryStore`]: in-process store used by `--in-memory` and the tests

#[cfg(feature = "cosmos")]
mod cosmos;
mod memory;
pub(crate) mod sql;

#[cfg(feature = "cosmos")]
pub use cosmos::{CosmosConfig, CosmosStore};
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Failures reported by a document store.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    /// No document with this id (and partition key) exists.
    #[error("document '{id}' not found in container '{container}'")]
    NotFound {
        /// Container name
        container: String,
        /// Document id
        id: String,
    },

    /// The container itself does not exist.
    #[error("container '{0}' not found")]
    ContainerNotFound(String),

    /// An `If-Match` condition did not hold.
    #[error("document '{id}' was modified concurrently (etag mismatch)")]
    PreconditionFailed {
        /// Document id
        id: String,
    },

    /// The query text could not be executed.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// Non-success HTTP status from the service.
    #[error("HTTP {status}: {message}")]
    Http {
        /// Status code
        status: u16,
        /// Service-provided message
        message: String,
    },

    /// Connection-level failure (DNS, TLS, reset).
    #[error("transport failure: {0}")]
    Transport(String),

    /// Response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

/// Address of a single document.
///
/// Containers partitioned on `/id` use the document id as the partition key
/// value; [`ItemRef::new`] assumes that. Other containers need an explicit
/// value via [`ItemRef::with_partition_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRef {
    /// Container name
    pub container: String,
    /// Document id
    pub id: String,
    /// Partition key value
    pub partition_key: String,
}

impl ItemRef {
    /// Reference a document in a container partitioned on its id.
    pub fn new(container: impl Into<String>, id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            container: container.into(),
            partition_key: id.clone(),
            id,
        }
    }

    /// Override the partition key value.
    pub fn with_partition_key(mut self, partition_key: Option<String>) -> Self {
        if let Some(pk) = partition_key {
            self.partition_key = pk;
        }
        self
    }
}

/// A document as read from the store.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Document body (always a JSON object)
    pub body: Map<String, JsonValue>,
    /// Concurrency token issued by the store
    pub etag: Option<String>,
}

/// Query text with named parameters (`@name`).
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SqlQuery {
    /// Query text
    pub query: String,
    /// Bound parameters
    pub parameters: Vec<SqlParameter>,
}

/// A single named query parameter.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlParameter {
    /// Parameter name including the leading `@`
    pub name: String,
    /// Bound value
    pub value: JsonValue,
}

impl SqlQuery {
    /// A query without parameters.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            parameters: Vec::new(),
        }
    }

    /// Bind a named parameter.
    pub fn bind(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.parameters.push(SqlParameter {
            name: name.into(),
            value,
        });
        self
    }
}

/// Container metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerInfo {
    /// Container id
    pub id: String,
    /// Partition key paths, e.g. `["/id"]`
    pub partition_key_paths: Vec<String>,
    /// Partition key kind (`Hash`, `MultiHash`)
    pub partition_key_kind: String,
    /// Partition key version
    pub partition_key_version: u64,
    /// Raw indexing policy
    pub indexing_policy: JsonValue,
}

/// A client bound to one logical database.
///
/// Implementations must be safe for concurrent use; the server shares one
/// handle across all in-flight tool calls.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs.
    fn kind(&self) -> &'static str;

    /// Point read by id and partition key.
    async fn read_item(&self, item: &ItemRef) -> StoreResult<Document>;

    /// Insert or replace a document keyed by its own `id`.
    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        body: &Map<String, JsonValue>,
    ) -> StoreResult<()>;

    /// Replace an existing document, optionally only if its etag matches.
    async fn replace_item(
        &self,
        item: &ItemRef,
        body: &Map<String, JsonValue>,
        if_match: Option<&str>,
    ) -> StoreResult<()>;

    /// Run a query and collect results.
    ///
    /// With `limit` set, implementations may stop after that many items.
    async fn query_items(
        &self,
        container: &str,
        query: &SqlQuery,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JsonValue>>;

    /// List containers in the database.
    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>>;

    /// Read one container's metadata.
    async fn read_container(&self, container: &str) -> StoreResult<ContainerInfo>;
}
