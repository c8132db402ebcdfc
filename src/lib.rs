//! # cosmos-mcp
//!
//! MCP (Model Context Protocol) server for Azure Cosmos DB.
//!
//! This crate exposes document-database operations as tools for AI agents. It
//! implements the MCP protocol over stdin/stdout using JSON-RPC 2.0.
//!
//! ## Tools
//!
//! Documents: `get_item`, `put_item`, `update_item`, `query_container`
//!
//! Exploration: `list_containers`, `describe_container`, `get_sample_documents`,
//! `count_documents`, `list_distinct_values`, `get_partition_key_info`,
//! `get_indexing_policy`, `find_implied_links`
//!
//! Every call returns a result envelope (`content` + `isError`); callers check
//! the flag rather than relying on transport errors.
//!
//! ## Usage
//!
//! ```json
//! {
//!   "mcpServers": {
//!     "cosmos": {
//!       "command": "/path/to/cosmos-mcp",
//!       "env": {
//!         "COSMOS_URI": "https://myaccount.documents.azure.com:443/",
//!         "COSMOS_KEY": "<key>",
//!         "COSMOS_DATABASE": "inventory"
//!       }
//!     }
//!   }
//! }
//! ```
//!
//! ## Library Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use cosmos_mcp::{Dispatcher, McpServer, McpSession, MemoryStore, SessionSettings, ToolRegistry};
//!
//! let store = Arc::new(MemoryStore::with_containers(["orders"]));
//! let session = McpSession::new(store, SessionSettings::default()).expect("runtime");
//! let registry = ToolRegistry::new().expect("registry");
//! let server = McpServer::new(Dispatcher::new(registry, session));
//!
//! // Run the server (reads from stdin, writes to stdout)
//! // server.run_sync().expect("Server error");
//! ```

#![warn(missing_docs)]

mod convert;
mod dispatch;
mod error;
mod server;
mod session;
pub mod store;
mod tools;
mod validate;

pub use dispatch::{Dispatcher, ToolCall, ToolResult};
pub use error::{McpError, Result};
pub use server::{
    JsonRpcRequest, JsonRpcResponse, McpServer, DEFAULT_MAX_IN_FLIGHT, PROTOCOL_VERSION,
};
pub use session::{McpSession, SessionSettings, DEFAULT_TIMEOUT};
#[cfg(feature = "cosmos")]
pub use store::{CosmosConfig, CosmosStore};
pub use store::{
    ContainerInfo, Document, DocumentStore, ItemRef, MemoryStore, SqlQuery, StoreError,
    StoreResult,
};
pub use tools::{ToolDef, ToolEntry, ToolHandler, ToolRegistry};
pub use validate::{validate, ArgSchema, Kind, Property};
