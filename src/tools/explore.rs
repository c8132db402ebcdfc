//! Container exploration tools.
//!
//! Read-only helpers for finding your way around an unfamiliar database:
//! list_containers, describe_container, get_sample_documents, count_documents,
//! list_distinct_values, get_partition_key_info, get_indexing_policy,
//! find_implied_links

use std::collections::BTreeSet;

use serde::Deserialize;
use serde_json::{Map, Value as JsonValue};

use crate::convert::{check_field_path, check_range, parse_args, to_payload};
use crate::error::{McpError, Result};
use crate::schema;
use crate::session::McpSession;
use crate::store::sql::total_order;
use crate::store::SqlQuery;
use crate::tools::{ToolDef, ToolRegistry};
use crate::validate::json_kind;

const SAMPLE_VALUE_CHARS: usize = 100;
const LINK_SAMPLE_SIZE: usize = 10;
const LINK_SUFFIXES: &[&str] = &["_id", "id", "_fk", "_ref", "_key"];

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContainerRequest {
    container_name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SampleRequest {
    container_name: String,
    limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountRequest {
    container_name: String,
    filters: Option<Map<String, JsonValue>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DistinctRequest {
    container_name: String,
    field_name: String,
    limit: Option<i64>,
}

/// Register the exploration tools.
pub fn register(registry: &mut ToolRegistry) -> Result<()> {
    registry.register(
        ToolDef::new(
            "list_containers",
            "List all container names in the current Cosmos DB database.",
            schema!(object {}),
        ),
        list_containers,
    )?;
    registry.register(
        ToolDef::new(
            "describe_container",
            "Describe a container's schema by inspecting a sample document. Returns field \
             names, JSON types and sample values.",
            schema!(object { required: { "containerName": string } }),
        ),
        describe_container,
    )?;
    registry.register(
        ToolDef::new(
            "get_sample_documents",
            "Retrieve a few documents from a container to preview real data. limit defaults \
             to 5 (max 100).",
            schema!(object {
                required: { "containerName": string },
                optional: { "limit": integer }
            }),
        ),
        get_sample_documents,
    )?;
    registry.register(
        ToolDef::new(
            "count_documents",
            "Count documents in a container, optionally with exact-match filters such as \
             {\"City\": \"Miami\"}. A null filter value matches null fields.",
            schema!(object {
                required: { "containerName": string },
                optional: { "filters": object }
            }),
        ),
        count_documents,
    )?;
    registry.register(
        ToolDef::new(
            "list_distinct_values",
            "List unique values of a field in a container. limit defaults to 100 (max 1000).",
            schema!(object {
                required: { "containerName": string, "fieldName": string },
                optional: { "limit": integer }
            }),
        ),
        list_distinct_values,
    )?;
    registry.register(
        ToolDef::new(
            "get_partition_key_info",
            "Get the partition key definition (paths, kind, version) of a container.",
            schema!(object { required: { "containerName": string } }),
        ),
        get_partition_key_info,
    )?;
    registry.register(
        ToolDef::new(
            "get_indexing_policy",
            "Get the indexing policy of a container.",
            schema!(object { required: { "containerName": string } }),
        ),
        get_indexing_policy,
    )?;
    registry.register(
        ToolDef::new(
            "find_implied_links",
            "Detect foreign-key-like fields (user_id, order_ref, ...) by sampling documents \
             in a container.",
            schema!(object { required: { "containerName": string } }),
        ),
        find_implied_links,
    )?;
    Ok(())
}

/// First `limit` documents. The store stops paging once it has enough, so the
/// query carries no OFFSET/LIMIT of its own.
fn sample(session: &McpSession, container: &str, limit: usize) -> Result<Vec<JsonValue>> {
    let query = SqlQuery::new("SELECT * FROM c");
    session.execute(
        "query_items",
        session.store().query_items(container, &query, Some(limit)),
    )
}

fn list_containers(session: &McpSession, _args: Map<String, JsonValue>) -> Result<String> {
    let containers = session.execute("list_containers", session.store().list_containers())?;
    let names: Vec<String> = containers.into_iter().map(|c| c.id).collect();
    to_payload(&serde_json::json!({
        "count": names.len(),
        "containers": names,
    }))
}

fn describe_container(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: ContainerRequest = parse_args(args)?;
    let docs = sample(session, &req.container_name, 1)?;
    let Some(JsonValue::Object(doc)) = docs.into_iter().next() else {
        return Err(McpError::InvalidArg {
            name: "containerName".to_string(),
            reason: format!("No documents found in container '{}'", req.container_name),
        });
    };

    let fields: Vec<JsonValue> = doc
        .iter()
        .map(|(name, value)| {
            let sample_value = match value {
                JsonValue::Object(_) | JsonValue::Array(_) => json_kind(value).to_string(),
                JsonValue::String(s) => s.chars().take(SAMPLE_VALUE_CHARS).collect(),
                other => other.to_string().chars().take(SAMPLE_VALUE_CHARS).collect(),
            };
            serde_json::json!({
                "name": name,
                "type": json_kind(value),
                "sample_value": sample_value,
            })
        })
        .collect();

    to_payload(&serde_json::json!({
        "container": req.container_name,
        "field_count": fields.len(),
        "fields": fields,
    }))
}

fn get_sample_documents(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: SampleRequest = parse_args(args)?;
    let limit = check_range("limit", req.limit.unwrap_or(5), 1, 100)?;

    let docs = sample(session, &req.container_name, limit)?;
    to_payload(&serde_json::json!({
        "container": req.container_name,
        "count": docs.len(),
        "documents": docs,
    }))
}

fn count_documents(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: CountRequest = parse_args(args)?;
    let filters = req.filters.unwrap_or_default();

    let mut clauses = Vec::with_capacity(filters.len());
    let mut query = SqlQuery::default();
    for (i, (field, value)) in filters.iter().enumerate() {
        check_field_path("filters", field)?;
        if value.is_null() {
            clauses.push(format!("IS_NULL(c.{})", field));
        } else {
            let param = format!("@p{}", i);
            clauses.push(format!("c.{} = {}", field, param));
            query = query.bind(param, value.clone());
        }
    }
    query.query = if clauses.is_empty() {
        "SELECT VALUE COUNT(1) FROM c".to_string()
    } else {
        format!("SELECT VALUE COUNT(1) FROM c WHERE {}", clauses.join(" AND "))
    };

    let rows = session.execute(
        "query_items",
        session.store().query_items(&req.container_name, &query, None),
    )?;
    // Aggregates run per partition key range; each range returns a partial count.
    let count: u64 = rows.iter().filter_map(|v| v.as_u64()).sum();

    to_payload(&serde_json::json!({
        "container": req.container_name,
        "count": count,
        "filters": filters,
    }))
}

fn list_distinct_values(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: DistinctRequest = parse_args(args)?;
    let limit = check_range("limit", req.limit.unwrap_or(100), 1, 1000)?;
    check_field_path("fieldName", &req.field_name)?;

    let query = SqlQuery::new(format!("SELECT DISTINCT VALUE c.{} FROM c", req.field_name));
    let mut values = session.execute(
        "query_items",
        session.store().query_items(&req.container_name, &query, None),
    )?;
    // Each partition key range returns its own distinct set.
    values.sort_by(total_order);
    values.dedup();
    let total = values.len();
    values.truncate(limit);

    to_payload(&serde_json::json!({
        "container": req.container_name,
        "field": req.field_name,
        "total_distinct": total,
        "returned_count": values.len(),
        "values": values,
    }))
}

fn get_partition_key_info(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: ContainerRequest = parse_args(args)?;
    let info = session.execute(
        "read_container",
        session.store().read_container(&req.container_name),
    )?;
    to_payload(&serde_json::json!({
        "container": req.container_name,
        "partition_key": {
            "paths": info.partition_key_paths,
            "kind": info.partition_key_kind,
            "version": info.partition_key_version,
        },
    }))
}

fn get_indexing_policy(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: ContainerRequest = parse_args(args)?;
    let info = session.execute(
        "read_container",
        session.store().read_container(&req.container_name),
    )?;
    to_payload(&serde_json::json!({
        "container": req.container_name,
        "indexing_policy": info.indexing_policy,
    }))
}

fn find_implied_links(session: &McpSession, args: Map<String, JsonValue>) -> Result<String> {
    let req: ContainerRequest = parse_args(args)?;
    let docs = sample(session, &req.container_name, LINK_SAMPLE_SIZE)?;
    if docs.is_empty() {
        return to_payload(&serde_json::json!({ "message": "No documents found to analyze" }));
    }

    let mut candidates = BTreeSet::new();
    let mut id_fields = BTreeSet::new();
    for key in docs.iter().filter_map(|d| d.as_object()).flat_map(|d| d.keys()) {
        let lower = key.to_lowercase();
        if lower != "id" && lower != "_id" && LINK_SUFFIXES.iter().any(|s| lower.ends_with(s)) {
            candidates.insert(key.clone());
        }
        if lower.contains("id") {
            id_fields.insert(key.clone());
        }
    }

    to_payload(&serde_json::json!({
        "container": req.container_name,
        "foreign_key_candidates": candidates,
        "id_fields": id_fields,
    }))
}
