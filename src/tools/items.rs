//! Document tools.
//!
//! - `get_item`       : point read by id
//! - `put_item`       : upsert a whole document
//! - `update_item`    : read, shallow-merge, write back
//! - `query_container`: run a query and return every result
//!
//! Point operations address documents by `id` and use the id as the partition
//! key value unless `partitionKey` is passed. Containers partitioned on some
//! other path need the explicit argument.

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::convert::{document_id, parse_args, shallow_merge, to_payload};
use crate::error::{McpError, Result};
use crate::schema;
use crate::session::McpSession;
use crate::store::{ItemRef, SqlQuery};
use crate::tools::{ToolDef, ToolRegistry};

const PARTITION_KEY_NOTE: &str =
    "Partition key value; defaults to the document id, which only addresses containers \
     partitioned on /id.";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GetItemRequest {
    container_name: String,
    id: String,
    partition_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PutItemRequest {
    container_name: String,
    item: Map<String, JsonValue>,
    partition_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateItemRequest {
    container_name: String,
    id: String,
    updates: Map<String, JsonValue>,
    partition_key: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryContainerRequest {
    container_name: String,
    query: String,
}

/// Register the document tools.
pub fn register(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(
        ToolDef::new(
            "get_item",
            "Retrieves an item from a Cosmos DB container by ID. Returns the document as JSON.",
            schema!(object {
                required: { "containerName": string, "id": string },
                optional: { "partitionKey": string }
            })
            .describe("partitionKey", PARTITION_KEY_NOTE),
        ),
        get_item,
    )?;
    registry.register(
        ToolDef::new(
            "put_item",
            "Inserts or replaces an item in a Cosmos DB container. The item must carry a \
             string 'id'; an existing document with that id is replaced as a whole.",
            schema!(object {
                required: { "containerName": string, "item": object },
                optional: { "partitionKey": string }
            })
            .describe("partitionKey", PARTITION_KEY_NOTE),
        ),
        put_item,
    )?;
    registry.register(
        ToolDef::new(
            "update_item",
            "Updates fields in an existing Cosmos DB item. Top-level keys in 'updates' \
             overwrite or add fields; other fields are kept; nested objects are replaced, \
             not merged.",
            schema!(object {
                required: { "containerName": string, "id": string, "updates": object },
                optional: { "partitionKey": string }
            })
            .describe("partitionKey", PARTITION_KEY_NOTE),
        ),
        update_item,
    )?;
    registry.register(
        ToolDef::new(
            "query_container",
            "Runs a SQL query against a Cosmos DB container and returns all matching \
             documents as a JSON array, e.g. \"SELECT * FROM c WHERE c.city = 'Miami'\".",
            schema!(object {
                required: { "containerName": string, "query": string }
            }),
        ),
        query_container,
    )?;
    Ok(())
}

// ── Get ──────────────────────────────────────────────────────────────────

fn get_item(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: GetItemRequest = parse_args(args)?;
    let item = ItemRef::new(req.container_name, req.id).with_partition_key(req.partition_key);

    let doc = session.execute("read_item", session.store().read_item(&item))?;
    to_payload(&doc.body)
}

// ── Put ──────────────────────────────────────────────────────────────────

fn put_item(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: PutItemRequest = parse_args(args)?;
    session.check_write_access("put_item")?;

    let id = document_id(&req.item).ok_or_else(|| McpError::InvalidArg {
        name: "item".to_string(),
        reason: "item must have a string 'id' field".to_string(),
    })?;
    let partition_key = req.partition_key.as_deref().unwrap_or(id);

    session.execute(
        "upsert_item",
        session
            .store()
            .upsert_item(&req.container_name, partition_key, &req.item),
    )?;
    Ok("Item upserted".to_string())
}

// ── Update ───────────────────────────────────────────────────────────────

fn update_item(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: UpdateItemRequest = parse_args(args)?;
    session.check_write_access("update_item")?;

    if let Some(new_id) = req.updates.get("id") {
        if new_id.as_str() != Some(req.id.as_str()) {
            return Err(McpError::InvalidArg {
                name: "updates".to_string(),
                reason: "updates may not change the document id".to_string(),
            });
        }
    }

    let item = ItemRef::new(req.container_name, req.id).with_partition_key(req.partition_key);
    let mut doc = session.execute("read_item", session.store().read_item(&item))?;
    shallow_merge(&mut doc.body, req.updates);

    // Without --optimistic-updates a concurrent writer between the read above
    // and this replace is silently overwritten.
    let if_match = if session.settings().optimistic_updates {
        doc.etag.as_deref()
    } else {
        None
    };
    session.execute(
        "replace_item",
        session.store().replace_item(&item, &doc.body, if_match),
    )?;
    Ok("Item updated".to_string())
}

// ── Query ────────────────────────────────────────────────────────────────

fn query_container(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: QueryContainerRequest = parse_args(args)?;
    let cap = session.settings().max_query_items;
    tracing::debug!(container = %req.container_name, query = %req.query, "query_container");

    let query = SqlQuery::new(req.query);
    let rows = session.execute(
        "query_items",
        session
            .store()
            .query_items(&req.container_name, &query, cap.map(|n| n.saturating_add(1))),
    )?;
    if let Some(limit) = cap {
        if rows.len() > limit {
            return Err(McpError::ResultLimit { limit });
        }
    }
    to_payload(&rows)
}
