//! Azure Cosmos DB REST client.
//!
//! Talks to the SQL API gateway with master-key authorization. One
//! `reqwest::Client` is shared by every request, so the store can be used from
//! many tool calls at once.
//!
//! The gateway only serves TOP, ORDER BY, OFFSET/LIMIT, DISTINCT and
//! aggregates within a single partition key range, so queries are sent once
//! per range (`/pkranges`) and the pages concatenated. Those clauses therefore
//! apply per range: callers merge partial counts and distinct sets themselves.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue, CONTENT_TYPE, IF_MATCH};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};
use sha2::Sha256;

use super::{ContainerInfo, Document, DocumentStore, ItemRef, SqlQuery, StoreError, StoreResult};
use crate::error::{McpError, Result};

type HmacSha256 = Hmac<Sha256>;

const API_VERSION: &str = "2018-12-31";
const HEADER_CONTINUATION: &str = "x-ms-continuation";
const HEADER_PK_RANGE: &str = "x-ms-documentdb-partitionkeyrangeid";
const HEADER_MAX_ITEMS: &str = "x-ms-max-item-count";
const MAX_PAGE_SIZE: usize = 1000;

/// Connection settings for one Cosmos DB database.
#[derive(Clone)]
pub struct CosmosConfig {
    /// Account endpoint, e.g. `https://myaccount.documents.azure.com:443/`
    pub endpoint: String,
    /// Base64 master key
    pub key: String,
    /// Database id
    pub database: String,
}

impl std::fmt::Debug for CosmosConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CosmosConfig")
            .field("endpoint", &self.endpoint)
            .field("key", &"<redacted>")
            .field("database", &self.database)
            .finish()
    }
}

impl CosmosConfig {
    /// Check that every field is set and the key decodes.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("endpoint (--endpoint or COSMOS_URI)", &self.endpoint),
            ("key (--key or COSMOS_KEY)", &self.key),
            ("database (--database or COSMOS_DATABASE)", &self.database),
        ] {
            if value.trim().is_empty() {
                return Err(McpError::Config(format!("missing {}", name)));
            }
        }
        BASE64
            .decode(self.key.trim())
            .map_err(|e| McpError::Config(format!("account key is not valid base64: {}", e)))?;
        url::Url::parse(&self.endpoint)
            .map_err(|e| McpError::Config(format!("invalid endpoint '{}': {}", self.endpoint, e)))?;
        Ok(())
    }
}

/// [`DocumentStore`] backed by the Cosmos DB REST API.
pub struct CosmosStore {
    http: reqwest::Client,
    endpoint: String,
    database: String,
    key: Vec<u8>,
}

#[derive(Deserialize)]
struct QueryPage {
    #[serde(rename = "Documents", default)]
    documents: Vec<JsonValue>,
}

#[derive(Deserialize)]
struct RangeList {
    #[serde(rename = "PartitionKeyRanges", default)]
    ranges: Vec<PartitionKeyRange>,
}

#[derive(Deserialize)]
struct PartitionKeyRange {
    id: String,
}

#[derive(Deserialize)]
struct ContainerList {
    #[serde(rename = "DocumentCollections", default)]
    collections: Vec<JsonValue>,
}

#[derive(Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

impl CosmosStore {
    /// Build a client from validated settings.
    pub fn new(config: CosmosConfig) -> Result<Self> {
        config.validate()?;
        let key = BASE64
            .decode(config.key.trim())
            .map_err(|e| McpError::Config(e.to_string()))?;
        let http = reqwest::Client::builder()
            .user_agent(concat!("cosmos-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| McpError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            http,
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            database: config.database,
            key,
        })
    }

    fn request(
        &self,
        method: Method,
        resource_type: &str,
        resource_link: &str,
        path: &str,
    ) -> RequestBuilder {
        let date = rfc1123_now();
        let token = auth_token(&self.key, method.as_str(), resource_type, resource_link, &date);
        tracing::debug!(verb = %method, resource = %path, "cosmos request");

        let mut headers = HeaderMap::new();
        headers.insert("x-ms-version", HeaderValue::from_static(API_VERSION));
        if let Ok(v) = HeaderValue::from_str(&date) {
            headers.insert("x-ms-date", v);
        }
        if let Ok(v) = HeaderValue::from_str(&token) {
            headers.insert("authorization", v);
        }
        self.http
            .request(method, format!("{}/{}", self.endpoint, path))
            .headers(headers)
    }

    fn container_link(&self, container: &str) -> String {
        format!("dbs/{}/colls/{}", self.database, container)
    }

    fn doc_link(&self, container: &str, id: &str) -> String {
        format!("{}/docs/{}", self.container_link(container), id)
    }

    async fn send(
        &self,
        builder: RequestBuilder,
        not_found: impl FnOnce() -> StoreError,
        id: &str,
    ) -> StoreResult<Response> {
        let response = builder
            .send()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == StatusCode::NOT_FOUND {
            return Err(not_found());
        }
        if status == StatusCode::PRECONDITION_FAILED {
            return Err(StoreError::PreconditionFailed { id: id.to_string() });
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.message)
            .ok()
            .filter(|m| !m.is_empty())
            .unwrap_or(text);
        Err(StoreError::Http {
            status: status.as_u16(),
            message,
        })
    }

    fn partition_header(partition_key: &str) -> String {
        serde_json::json!([partition_key]).to_string()
    }

    /// Ids of the container's current partition key ranges.
    async fn partition_key_ranges(&self, container: &str) -> StoreResult<Vec<String>> {
        let link = self.container_link(container);
        let path = format!("{}/pkranges", link);
        let mut ids = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut builder = self.request(Method::GET, "pkranges", &link, &path);
            if let Some(token) = &continuation {
                builder = builder.header(HEADER_CONTINUATION, token.as_str());
            }
            let response = self
                .send(
                    builder,
                    || StoreError::ContainerNotFound(container.to_string()),
                    "",
                )
                .await?;
            continuation = continuation_token(&response);
            let page = response
                .json::<RangeList>()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            ids.extend(page.ranges.into_iter().map(|r| r.id));
            if continuation.is_none() {
                break;
            }
        }
        Ok(ids)
    }

    /// Run a query against one partition key range, following continuations.
    async fn query_range(
        &self,
        container: &str,
        query: &SqlQuery,
        range: &str,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JsonValue>> {
        let link = self.container_link(container);
        let path = format!("{}/docs", link);
        let page_size = limit.map_or(MAX_PAGE_SIZE, |n| n.min(MAX_PAGE_SIZE));
        let mut results = Vec::new();
        let mut continuation: Option<String> = None;

        loop {
            let mut builder = self
                .request(Method::POST, "docs", &link, &path)
                .header(CONTENT_TYPE, "application/query+json")
                .header("x-ms-documentdb-isquery", "True")
                .header("x-ms-documentdb-query-enablecrosspartition", "True")
                .header(HEADER_PK_RANGE, range)
                .header(HEADER_MAX_ITEMS, page_size.to_string())
                .json(query);
            if let Some(token) = &continuation {
                builder = builder.header(HEADER_CONTINUATION, token.as_str());
            }

            let response = self
                .send(
                    builder,
                    || StoreError::ContainerNotFound(container.to_string()),
                    "",
                )
                .await?;
            continuation = continuation_token(&response);
            let page = response
                .json::<QueryPage>()
                .await
                .map_err(|e| StoreError::Decode(e.to_string()))?;
            results.extend(page.documents);

            if let Some(limit) = limit {
                if results.len() >= limit {
                    results.truncate(limit);
                    break;
                }
            }
            if continuation.is_none() {
                break;
            }
        }
        Ok(results)
    }
}

fn continuation_token(response: &Response) -> Option<String> {
    response
        .headers()
        .get(HEADER_CONTINUATION)
        .and_then(|v| v.to_str().ok())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

fn container_info(raw: &JsonValue) -> ContainerInfo {
    let pk = raw.get("partitionKey").cloned().unwrap_or(JsonValue::Null);
    ContainerInfo {
        id: raw
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        partition_key_paths: pk
            .get("paths")
            .and_then(|v| v.as_array())
            .map(|paths| {
                paths
                    .iter()
                    .filter_map(|p| p.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default(),
        partition_key_kind: pk
            .get("kind")
            .and_then(|v| v.as_str())
            .unwrap_or("Hash")
            .to_string(),
        partition_key_version: pk.get("version").and_then(|v| v.as_u64()).unwrap_or(1),
        indexing_policy: raw
            .get("indexingPolicy")
            .cloned()
            .unwrap_or_else(|| JsonValue::Object(Map::new())),
    }
}

fn rfc1123_now() -> String {
    chrono::Utc::now()
        .format("%a, %d %b %Y %H:%M:%S GMT")
        .to_string()
}

/// Master-key authorization header value for one request.
fn auth_token(key: &[u8], verb: &str, resource_type: &str, resource_link: &str, date: &str) -> String {
    let payload = format!(
        "{}\n{}\n{}\n{}\n\n",
        verb.to_lowercase(),
        resource_type.to_lowercase(),
        resource_link,
        date.to_lowercase()
    );
    // HMAC accepts keys of any length.
    let mut mac = match HmacSha256::new_from_slice(key) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(payload.as_bytes());
    let signature = BASE64.encode(mac.finalize().into_bytes());
    let token = format!("type=master&ver=1.0&sig={}", signature);
    url::form_urlencoded::byte_serialize(token.as_bytes()).collect()
}

#[async_trait]
impl DocumentStore for CosmosStore {
    fn kind(&self) -> &'static str {
        "cosmos"
    }

    async fn read_item(&self, item: &ItemRef) -> StoreResult<Document> {
        let link = self.doc_link(&item.container, &item.id);
        let builder = self
            .request(Method::GET, "docs", &link, &link)
            .header(
                "x-ms-documentdb-partitionkey",
                Self::partition_header(&item.partition_key),
            );
        let response = self
            .send(
                builder,
                || StoreError::NotFound {
                    container: item.container.clone(),
                    id: item.id.clone(),
                },
                &item.id,
            )
            .await?;
        let etag = response
            .headers()
            .get("etag")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());
        let body = response
            .json::<Map<String, JsonValue>>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let etag = etag.or_else(|| body.get("_etag").and_then(|v| v.as_str()).map(String::from));
        Ok(Document { body, etag })
    }

    async fn upsert_item(
        &self,
        container: &str,
        partition_key: &str,
        body: &Map<String, JsonValue>,
    ) -> StoreResult<()> {
        let link = self.container_link(container);
        let path = format!("{}/docs", link);
        let builder = self
            .request(Method::POST, "docs", &link, &path)
            .header("x-ms-documentdb-is-upsert", "True")
            .header(
                "x-ms-documentdb-partitionkey",
                Self::partition_header(partition_key),
            )
            .json(body);
        let id = body.get("id").and_then(|v| v.as_str()).unwrap_or_default();
        self.send(
            builder,
            || StoreError::ContainerNotFound(container.to_string()),
            id,
        )
        .await?;
        Ok(())
    }

    async fn replace_item(
        &self,
        item: &ItemRef,
        body: &Map<String, JsonValue>,
        if_match: Option<&str>,
    ) -> StoreResult<()> {
        let link = self.doc_link(&item.container, &item.id);
        let mut builder = self
            .request(Method::PUT, "docs", &link, &link)
            .header(
                "x-ms-documentdb-partitionkey",
                Self::partition_header(&item.partition_key),
            )
            .json(body);
        if let Some(etag) = if_match {
            builder = builder.header(IF_MATCH, etag);
        }
        self.send(
            builder,
            || StoreError::NotFound {
                container: item.container.clone(),
                id: item.id.clone(),
            },
            &item.id,
        )
        .await?;
        Ok(())
    }

    async fn query_items(
        &self,
        container: &str,
        query: &SqlQuery,
        limit: Option<usize>,
    ) -> StoreResult<Vec<JsonValue>> {
        let ranges = self.partition_key_ranges(container).await?;
        tracing::debug!(container, ranges = ranges.len(), "query fan-out");

        let mut results = Vec::new();
        for range in &ranges {
            let remaining = match limit {
                Some(limit) if results.len() >= limit => break,
                Some(limit) => Some(limit - results.len()),
                None => None,
            };
            let rows = self.query_range(container, query, range, remaining).await?;
            results.extend(rows);
        }
        Ok(results)
    }

    async fn list_containers(&self) -> StoreResult<Vec<ContainerInfo>> {
        let link = format!("dbs/{}", self.database);
        let path = format!("{}/colls", link);
        let builder = self.request(Method::GET, "colls", &link, &path);
        let database = self.database.clone();
        let response = self
            .send(
                builder,
                || StoreError::Http {
                    status: 404,
                    message: format!("database '{}' not found", database),
                },
                "",
            )
            .await?;
        let list = response
            .json::<ContainerList>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(list.collections.iter().map(container_info).collect())
    }

    async fn read_container(&self, container: &str) -> StoreResult<ContainerInfo> {
        let link = self.container_link(container);
        let builder = self.request(Method::GET, "colls", &link, &link);
        let response = self
            .send(
                builder,
                || StoreError::ContainerNotFound(container.to_string()),
                "",
            )
            .await?;
        let raw = response
            .json::<JsonValue>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(container_info(&raw))
    }
}
