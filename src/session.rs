//! MCP session management.
//!
//! Wraps the injected document store with the runtime that drives it and the
//! per-process settings every tool call shares.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Runtime;

use crate::error::{McpError, Result};
use crate::store::{DocumentStore, StoreResult};

/// Default per-call store timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Settings shared by every tool call.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Per-call store timeout; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Cap on materialized query results; `None` is unbounded.
    pub max_query_items: Option<usize>,
    /// Guard `update_item` writes with the etag from its read.
    pub optimistic_updates: bool,
    /// Reject write tools.
    pub read_only: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            timeout: Some(DEFAULT_TIMEOUT),
            max_query_items: None,
            optimistic_updates: false,
            read_only: false,
        }
    }
}

/// MCP session state.
///
/// Holds the store handle and a dedicated tokio runtime. Tool handlers are
/// synchronous; they hand store futures to [`McpSession::execute`], which
/// blocks the calling thread until the store answers or the timeout fires.
/// The session holds no mutable state and is shared across worker threads.
pub struct McpSession {
    store: Arc<dyn DocumentStore>,
    settings: SessionSettings,
    /// Runtime driving store I/O; dropped off-thread.
    runtime: Option<Arc<Runtime>>,
}

impl Drop for McpSession {
    fn drop(&mut self) {
        // A runtime cannot be dropped from inside another runtime's context.
        if let Some(runtime) = self.runtime.take() {
            let _ = std::thread::spawn(move || drop(runtime));
        }
    }
}

impl McpSession {
    /// Create a session over a store.
    pub fn new(store: Arc<dyn DocumentStore>, settings: SessionSettings) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .thread_name("cosmos-mcp-io")
            .enable_all()
            .build()
            .map_err(|e| McpError::Config(format!("failed to start runtime: {}", e)))?;
        Ok(Self {
            store,
            settings,
            runtime: Some(Arc::new(runtime)),
        })
    }

    /// The injected store.
    pub fn store(&self) -> &dyn DocumentStore {
        self.store.as_ref()
    }

    /// Session settings.
    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Returns `true` if write tools are disabled.
    pub fn is_read_only(&self) -> bool {
        self.settings.read_only
    }

    /// Reject write operations when the server is read-only.
    pub fn check_write_access(&self, operation: &str) -> Result<()> {
        if self.is_read_only() {
            return Err(McpError::AccessDenied(operation.to_string()));
        }
        Ok(())
    }

    /// Block on a store future, applying the configured timeout.
    ///
    /// Must not be called from inside an async context.
    pub fn execute<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = StoreResult<T>>,
    {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| McpError::Internal("session runtime already shut down".to_string()))?;

        let outcome = match self.settings.timeout {
            Some(after) => runtime
                .handle()
                .block_on(async { tokio::time::timeout(after, fut).await })
                .map_err(|_| McpError::Timeout {
                    operation: operation.to_string(),
                    after,
                })?,
            None => runtime.handle().block_on(fut),
        };
        outcome.map_err(McpError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{ItemRef, MemoryStore, StoreError};

    #[test]
    fn test_execute_maps_store_errors() {
        let session = McpSession::new(
            Arc::new(MemoryStore::with_containers(["c"])),
            SessionSettings::default(),
        )
        .unwrap();
        let item = ItemRef::new("c", "missing");
        let err = session
            .execute("read_item", session.store().read_item(&item))
            .unwrap_err();
        assert!(matches!(err, McpError::ItemNotFound { .. }));
    }

    #[test]
    fn test_execute_times_out() {
        let settings = SessionSettings {
            timeout: Some(Duration::from_millis(20)),
            ..SessionSettings::default()
        };
        let session = McpSession::new(Arc::new(MemoryStore::new()), settings).unwrap();
        let err = session
            .execute("slow", async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok::<_, StoreError>(())
            })
            .unwrap_err();
        assert!(matches!(err, McpError::Timeout { .. }));
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let settings = SessionSettings {
            read_only: true,
            ..SessionSettings::default()
        };
        let session = McpSession::new(Arc::new(MemoryStore::new()), settings).unwrap();
        assert!(matches!(
            session.check_write_access("put_item"),
            Err(McpError::AccessDenied(_))
        ));
    }
}
