//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};

use cosmos_mcp::{
    ContainerInfo, Dispatcher, Document, DocumentStore, ItemRef, McpSession, MemoryStore,
    SessionSettings, SqlQuery, StoreResult, ToolCall, ToolRegistry, ToolResult,
};

pub const CONTAINER: &str = "people";

/// Wraps a [`MemoryStore`] and counts every store call.
#[derive(Debug, Default)]
pub struct CountingStore {
    pub inner: MemoryStore,
    calls: AtomicUsize,
    writes: AtomicUsize,
}

impl CountingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::with_containers([CONTAINER]),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn hit(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for CountingStore {
    fn kind(&self) -> &'static str {
        "counting"
    }

    async fn read_item(&self, item: &ItemRef) -> StoreResult<Document> {
        self.hit();
        self.inner.read_item(item).await
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        body: &Map<String, JsonValue>,
    ) -> StoreResult<()> {
        self.hit();
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.upsert_item(container, partition_key, body).await
    }

    async fn replace_item(
        &self,
        item: &ItemRef,
        body: &Map<String, JsonValue>,
        if_match: Option<&str>,
    ) -> StoreResult<()> {
        self.hit();
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.inner.replace_item(item, body, if_match).await
    }

    async fn query_items(
        &self,
        container: &str,
        query: &SqlQuery,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JsonValue>> {
        self.hit();
        self.inner.query_items(container, query, limit).await
    }

    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>> {
        self.hit();
        self.inner.list_containers().await
    }

    async fn read_container(&self, container: &str) -> StoreResult<ContainerInfo> {
        self.hit();
        self.inner.read_container(container).await
    }
}

/// Simulates a concurrent writer: every read hands back the current
/// document, then bumps its `version` field behind the caller's back.
#[derive(Debug)]
pub struct RacingStore {
    pub inner: MemoryStore,
}

impl RacingStore {
    pub fn new() -> Self {
        Self {
            inner: MemoryStore::with_containers([CONTAINER]),
        }
    }
}

#[async_trait]
impl DocumentStore for RacingStore {
    fn kind(&self) -> &'static str {
        "racing"
    }

    async fn read_item(&self, item: &ItemRef) -> StoreResult<Document> {
        let doc = self.inner.read_item(item).await?;
        let mut racer = doc.body.clone();
        let version = racer.get("version").and_then(|v| v.as_u64()).unwrap_or(0);
        racer.insert("version".to_string(), JsonValue::from(version + 1));
        self.inner
            .upsert_item(&item.container, &item.partition_key, &racer)
            .await?;
        Ok(doc)
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        body: &Map<String, JsonValue>,
    ) -> StoreResult<()> {
        self.inner.upsert_item(container, partition_key, body).await
    }

    async fn replace_item(
        &self,
        item: &ItemRef,
        body: &Map<String, JsonValue>,
        if_match: Option<&str>,
    ) -> StoreResult<()> {
        self.inner.replace_item(item, body, if_match).await
    }

    async fn query_items(
        &self,
        container: &str,
        query: &SqlQuery,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JsonValue>> {
        self.inner.query_items(container, query, limit).await
    }

    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>> {
        self.inner.list_containers().await
    }

    async fn read_container(&self, container: &str) -> StoreResult<ContainerInfo> {
        self.inner.read_container(container).await
    }
}

/// Build a dispatcher with every built-in tool over `store`.
pub fn dispatcher(store: Arc<dyn DocumentStore>, settings: SessionSettings) -> Dispatcher {
    let session = McpSession::new(store, settings).expect("session");
    Dispatcher::new(ToolRegistry::new().expect("registry"), session)
}

/// Invoke a tool with JSON arguments.
pub fn call(dispatcher: &Dispatcher, name: &str, arguments: JsonValue) -> ToolResult {
    dispatcher.invoke(ToolCall::new(name, arguments))
}

/// Invoke a tool and assert it succeeded.
pub fn call_ok(dispatcher: &Dispatcher, name: &str, arguments: JsonValue) -> String {
    let result = call(dispatcher, name, arguments);
    assert!(!result.is_error, "{} failed: {}", name, result.text);
    result.text
}

/// Stored body of a document partitioned on its id.
pub fn stored(store: &MemoryStore, id: &str) -> Option<Map<String, JsonValue>> {
    store.snapshot(&ItemRef::new(CONTAINER, id))
}

pub fn obj(value: JsonValue) -> Map<String, JsonValue> {
    match value {
        JsonValue::Object(map) => map,
        other => panic!("expected object, got {}", other),
    }
}
