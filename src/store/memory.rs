//! In-process document store.
//!
//! Behaves like a single Cosmos DB database. Documents are identified by
//! (partition key value, id), so the same id may exist once per logical
//! partition. Used by `--in-memory` and by the test suite.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value as JsonValue};

use super::sql;
use super::{
    ContainerInfo, Document, DocumentStore, ItemRef, SqlQuery, StoreError, StoreResult,
};

#[derive(Debug, Clone)]
struct StoredItem {
    body: Map<String, JsonValue>,
    etag: String,
}

/// (partition key value, id)
type ItemKey = (String, String);

fn item_key(item: &ItemRef) -> ItemKey {
    (item.partition_key.clone(), item.id.clone())
}

#[derive(Debug, Default)]
struct Container {
    items: BTreeMap<ItemKey, StoredItem>,
}

/// In-memory [`DocumentStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    containers: RwLock<BTreeMap<String, Container>>,
    next_etag: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store with no containers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store with the given (empty) containers.
    pub fn with_containers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let store = Self::new();
        for name in names {
            store.create_container(name);
        }
        store
    }

    /// Create a container if it does not exist yet.
    pub fn create_container(&self, name: impl Into<String>) {
        self.containers.write().entry(name.into()).or_default();
    }

    /// Snapshot of a stored document body, bypassing the async API.
    pub fn snapshot(&self, item: &ItemRef) -> Option<Map<String, JsonValue>> {
        self.containers
            .read()
            .get(&item.container)
            .and_then(|c| c.items.get(&item_key(item)))
            .map(|stored| stored.body.clone())
    }

    /// Number of documents in a container.
    pub fn len(&self, container: &str) -> usize {
        self.containers
            .read()
            .get(container)
            .map_or(0, |c| c.items.len())
    }

    /// Whether a container is empty or missing.
    pub fn is_empty(&self, container: &str) -> bool {
        self.len(container) == 0
    }

    fn issue_etag(&self) -> String {
        let n = self.next_etag.fetch_add(1, Ordering::Relaxed) + 1;
        format!("\"{:016x}\"", n)
    }

    fn info(name: &str) -> ContainerInfo {
        ContainerInfo {
            id: name.to_string(),
            partition_key_paths: vec!["/id".to_string()],
            partition_key_kind: "Hash".to_string(),
            partition_key_version: 2,
            indexing_policy: serde_json::json!({
                "indexingMode": "consistent",
                "automatic": true,
                "includedPaths": [{ "path": "/*" }],
                "excludedPaths": [{ "path": "/\"_etag\"/?" }],
            }),
        }
    }
}

fn document_id(body: &Map<String, JsonValue>) -> StoreResult<String> {
    body.get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| StoreError::Http {
            status: 400,
            message: "The input content is invalid because the required property 'id' is missing"
                .to_string(),
        })
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn read_item(&self, item: &ItemRef) -> StoreResult<Document> {
        let containers = self.containers.read();
        let container = containers
            .get(&item.container)
            .ok_or_else(|| StoreError::ContainerNotFound(item.container.clone()))?;
        container
            .items
            .get(&item_key(item))
            .map(|stored| Document {
                body: stored.body.clone(),
                etag: Some(stored.etag.clone()),
            })
            .ok_or_else(|| StoreError::NotFound {
                container: item.container.clone(),
                id: item.id.clone(),
            })
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        body: &Map<String, JsonValue>,
    ) -> StoreResult<()> {
        let id = document_id(body)?;
        let etag = self.issue_etag();
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(container)
            .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
        container.items.insert(
            (partition_key.to_string(), id),
            StoredItem {
                body: body.clone(),
                etag,
            },
        );
        Ok(())
    }

    async fn replace_item(
        &self,
        item: &ItemRef,
        body: &Map<String, JsonValue>,
        if_match: Option<&str>,
    ) -> StoreResult<()> {
        let etag = self.issue_etag();
        let mut containers = self.containers.write();
        let container = containers
            .get_mut(&item.container)
            .ok_or_else(|| StoreError::ContainerNotFound(item.container.clone()))?;
        let stored = container
            .items
            .get_mut(&item_key(item))
            .ok_or_else(|| StoreError::NotFound {
                container: item.container.clone(),
                id: item.id.clone(),
            })?;
        if let Some(expected) = if_match {
            if stored.etag != expected {
                return Err(StoreError::PreconditionFailed {
                    id: item.id.clone(),
                });
            }
        }
        stored.body = body.clone();
        stored.etag = etag;
        Ok(())
    }

    async fn query_items(
        &self,
        container: &str,
        query: &SqlQuery,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JsonValue>> {
        let docs: Vec<JsonValue> = {
            let containers = self.containers.read();
            let container = containers
                .get(container)
                .ok_or_else(|| StoreError::ContainerNotFound(container.to_string()))?;
            container
                .items
                .values()
                .map(|item| JsonValue::Object(item.body.clone()))
                .collect()
        };
        let mut rows = sql::execute(query, docs)?;
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>> {
        Ok(self
            .containers
            .read()
            .keys()
            .map(|name| Self::info(name))
            .collect())
    }

    async fn read_container(&self, container: &str) -> StoreResult<ContainerInfo> {
        if self.containers.read().contains_key(container) {
            Ok(Self::info(container))
        } else {
            Err(StoreError::ContainerNotFound(container.to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: JsonValue) -> Map<String, JsonValue> {
        match value {
            JsonValue::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn test_upsert_then_read() {
        let store = MemoryStore::with_containers(["orders"]);
        block_on(store.upsert_item("orders", "o1", &body(json!({"id": "o1", "total": 5}))))
            .unwrap();

        let doc = block_on(store.read_item(&ItemRef::new("orders", "o1"))).unwrap();
        assert_eq!(doc.body["total"], json!(5));
        assert!(doc.etag.is_some());
    }

    #[test]
    fn test_read_missing_item_and_container() {
        let store = MemoryStore::with_containers(["orders"]);
        assert!(matches!(
            block_on(store.read_item(&ItemRef::new("orders", "nope"))),
            Err(StoreError::NotFound { .. })
        ));
        assert!(matches!(
            block_on(store.read_item(&ItemRef::new("users", "nope"))),
            Err(StoreError::ContainerNotFound(_))
        ));
    }

    #[test]
    fn test_partition_key_must_match() {
        let store = MemoryStore::with_containers(["orders"]);
        block_on(store.upsert_item("orders", "tenant-a", &body(json!({"id": "o1"})))).unwrap();

        let by_id = ItemRef::new("orders", "o1");
        assert!(block_on(store.read_item(&by_id)).is_err());

        let by_pk = by_id.with_partition_key(Some("tenant-a".to_string()));
        assert!(block_on(store.read_item(&by_pk)).is_ok());
    }

    #[test]
    fn test_same_id_in_two_partitions() {
        let store = MemoryStore::with_containers(["orders"]);
        block_on(store.upsert_item("orders", "t1", &body(json!({"id": "a", "n": 1})))).unwrap();
        block_on(store.upsert_item("orders", "t2", &body(json!({"id": "a", "n": 2})))).unwrap();
        assert_eq!(store.len("orders"), 2);

        let t1 = ItemRef::new("orders", "a").with_partition_key(Some("t1".to_string()));
        let t2 = ItemRef::new("orders", "a").with_partition_key(Some("t2".to_string()));
        assert_eq!(block_on(store.read_item(&t1)).unwrap().body["n"], json!(1));
        assert_eq!(block_on(store.read_item(&t2)).unwrap().body["n"], json!(2));

        block_on(store.replace_item(&t2, &body(json!({"id": "a", "n": 3})), None)).unwrap();
        assert_eq!(store.snapshot(&t1).unwrap()["n"], json!(1));
        assert_eq!(store.snapshot(&t2).unwrap()["n"], json!(3));
    }

    #[test]
    fn test_upsert_requires_string_id() {
        let store = MemoryStore::with_containers(["orders"]);
        let err = block_on(store.upsert_item("orders", "x", &body(json!({"id": 7})))).unwrap_err();
        assert!(matches!(err, StoreError::Http { status: 400, .. }));
    }

    #[test]
    fn test_replace_with_stale_etag_fails() {
        let store = MemoryStore::with_containers(["orders"]);
        let item = ItemRef::new("orders", "o1");
        block_on(store.upsert_item("orders", "o1", &body(json!({"id": "o1", "n": 1})))).unwrap();
        let first = block_on(store.read_item(&item)).unwrap();

        block_on(store.replace_item(&item, &body(json!({"id": "o1", "n": 2})), None)).unwrap();

        let stale = first.etag.as_deref();
        let err = block_on(store.replace_item(&item, &body(json!({"id": "o1", "n": 3})), stale))
            .unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed { .. }));
        assert_eq!(store.snapshot(&item).unwrap()["n"], json!(2));
    }

    #[test]
    fn test_query_respects_limit() {
        let store = MemoryStore::with_containers(["orders"]);
        for i in 0..5 {
            let id = format!("o{}", i);
            block_on(store.upsert_item("orders", &id, &body(json!({"id": id})))).unwrap();
        }
        let rows =
            block_on(store.query_items("orders", &SqlQuery::new("SELECT * FROM c"), Some(3)))
                .unwrap();
        assert_eq!(rows.len(), 3);
    }

    #[test]
    fn test_list_and_read_containers() {
        let store = MemoryStore::with_containers(["b", "a"]);
        let ids: Vec<String> = block_on(store.list_containers())
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(
            block_on(store.read_container("a")).unwrap().partition_key_paths,
            vec!["/id"]
        );
    }
}
