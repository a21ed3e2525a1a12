//! Versioned graph documents
//!
//! Graphs are exchanged with external tooling as a `GraphDocument`. Each
//! document version has a published JSON Schema; imports are validated
//! against the schema of their declared version before they are
//! deserialized, then migrated to the current version.
//!
//! | Version | Adds |
//! |---------|------|
//! | `1.0.0` | nodes, edges, free-form `meta` |
//! | `1.1.0` | document `metadata` (`exportedAt`, name, tags), per-node `description` and `tags` |

use chrono::{DateTime, Utc};
use jsonschema::JSONSchema;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::{NodeEngineError, Result};
use crate::types::{GraphEdge, GraphNode, WorkflowGraph};

/// Version written by [`export_graph`]
pub const CURRENT_VERSION: &str = "1.1.0";

/// Versions [`import_document`] accepts
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0.0", "1.1.0"];

/// Key under `WorkflowGraph::meta` holding per-node descriptions and tags
const ANNOTATIONS_KEY: &str = "nodeAnnotations";

/// Document-level metadata (1.1.0+)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Set when the document was upgraded on import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub migrated_from: Option<String>,
}

/// A node plus its documentation fields
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentNode {
    #[serde(flatten)]
    pub node: GraphNode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// Serializable, versioned form of a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DocumentMetadata>,
    pub nodes: Vec<DocumentNode>,
    pub edges: Vec<GraphEdge>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub meta: Value,
}

impl GraphDocument {
    /// Convert to a runnable graph
    ///
    /// Node descriptions and tags are kept under `meta.nodeAnnotations` so a
    /// later export reproduces them.
    pub fn into_graph(self) -> WorkflowGraph {
        let mut meta = match self.meta {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let annotations: Map<String, Value> = self
            .nodes
            .iter()
            .filter(|n| n.description.is_some() || !n.tags.is_empty())
            .map(|n| {
                (
                    n.node.id.clone(),
                    json!({"description": n.description, "tags": n.tags}),
                )
            })
            .collect();
        if !annotations.is_empty() {
            meta.insert(ANNOTATIONS_KEY.to_string(), Value::Object(annotations));
        }
        if let Some(name) = self.metadata.as_ref().and_then(|m| m.name.clone()) {
            meta.entry("name").or_insert(Value::String(name));
        }

        WorkflowGraph {
            nodes: self.nodes.into_iter().map(|n| n.node).collect(),
            edges: self.edges,
            meta: if meta.is_empty() { Value::Null } else { Value::Object(meta) },
        }
    }
}

/// Build a current-version document from a graph
pub fn export_graph(graph: &WorkflowGraph) -> GraphDocument {
    let annotations = graph.meta.get(ANNOTATIONS_KEY);

    let nodes = graph
        .nodes
        .iter()
        .map(|node| {
            let note = annotations.and_then(|a| a.get(&node.id));
            DocumentNode {
                node: node.clone(),
                description: note
                    .and_then(|n| n.get("description"))
                    .and_then(Value::as_str)
                    .map(str::to_string),
                tags: note
                    .and_then(|n| n.get("tags"))
                    .and_then(Value::as_array)
                    .map(|tags| tags.iter().filter_map(Value::as_str).map(str::to_string).collect())
                    .unwrap_or_default(),
            }
        })
        .collect();

    let mut meta = graph.meta.clone();
    if let Value::Object(map) = &mut meta {
        map.remove(ANNOTATIONS_KEY);
    }

    GraphDocument {
        version: CURRENT_VERSION.to_string(),
        metadata: Some(DocumentMetadata {
            exported_at: Some(Utc::now()),
            name: graph.meta.get("name").and_then(Value::as_str).map(str::to_string),
            ..Default::default()
        }),
        nodes,
        edges: graph.edges.clone(),
        meta,
    }
}

/// Export a graph as pretty-printed JSON
pub fn export_json(graph: &WorkflowGraph) -> Result<String> {
    Ok(serde_json::to_string_pretty(&export_graph(graph))?)
}

/// Validate a document against its version's schema, then migrate it
pub fn import_document(document: &Value) -> Result<GraphDocument> {
    let version = document
        .get("version")
        .and_then(Value::as_str)
        .ok_or_else(|| NodeEngineError::Import("document has no 'version' field".into()))?;

    let schema = schema_for_version(version).ok_or_else(|| {
        NodeEngineError::Import(format!(
            "unsupported document version '{}' (supported: {})",
            version,
            SUPPORTED_VERSIONS.join(", ")
        ))
    })?;

    let compiled = JSONSchema::compile(&schema)
        .map_err(|e| NodeEngineError::Import(format!("invalid schema for version {}: {}", version, e)))?;

    // Collect messages while `compiled` is alive; the error iterator borrows it.
    let problems: Option<Vec<String>> = match compiled.validate(document) {
        Ok(()) => None,
        Err(errors) => Some(
            errors
                .map(|e| format!("{}: {}", e.instance_path, e))
                .collect(),
        ),
    };
    if let Some(problems) = problems {
        return Err(NodeEngineError::Import(format!(
            "document does not match schema {}: {}",
            version,
            problems.join("; ")
        )));
    }

    let migrated = migrate(document.clone(), version)?;
    let document: GraphDocument = serde_json::from_value(migrated)?;
    log::info!(
        "Imported graph document ({} nodes, {} edges, version {})",
        document.nodes.len(),
        document.edges.len(),
        version
    );
    Ok(document)
}

/// Parse, validate and migrate a JSON document into a graph
pub fn import_json(json: &str) -> Result<WorkflowGraph> {
    let value: Value = serde_json::from_str(json)?;
    Ok(import_document(&value)?.into_graph())
}

fn migrate(mut document: Value, from: &str) -> Result<Value> {
    if from == CURRENT_VERSION {
        return Ok(document);
    }
    if from != "1.0.0" {
        return Err(NodeEngineError::Import(format!("no migration from version {}", from)));
    }

    log::debug!("Migrating graph document 1.0.0 -> {}", CURRENT_VERSION);
    if let Value::Object(map) = &mut document {
        map.insert("version".to_string(), Value::String(CURRENT_VERSION.to_string()));
        let metadata = map
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("migratedFrom".to_string(), Value::String(from.to_string()));
        }
    }
    Ok(document)
}

/// Published JSON Schema for a document version
pub fn schema_for_version(version: &str) -> Option<Value> {
    match version {
        "1.0.0" => Some(document_schema("1.0.0", false)),
        "1.1.0" => Some(document_schema("1.1.0", true)),
        _ => None,
    }
}

fn document_schema(version: &str, rich_metadata: bool) -> Value {
    let port = json!({
        "type": "object",
        "required": ["id", "label"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "label": {"type": "string"},
            "valueType": {"enum": ["text", "json", "error"]}
        }
    });

    let mut node_properties = json!({
        "id": {"type": "string", "minLength": 1},
        "kind": {"enum": ["retrieval", "reasoning", "branch", "tool", "formatter"]},
        "subtype": {"type": "string"},
        "config": {},
        "inputPorts": {"type": "array", "items": port},
        "outputPorts": {"type": "array", "items": port}
    });
    if rich_metadata {
        node_properties["description"] = json!({"type": "string"});
        node_properties["tags"] = json!({"type": "array", "items": {"type": "string"}});
    }

    let string_list = json!({"type": "array", "items": {"type": "string"}});
    let edge = json!({
        "type": "object",
        "required": ["id", "sourceNode", "sourceOutput", "targetNode", "targetInput"],
        "properties": {
            "id": {"type": "string", "minLength": 1},
            "sourceNode": {"type": "string"},
            "sourceOutput": {"type": "string"},
            "targetNode": {"type": "string"},
            "targetInput": {"type": "string"},
            "weight": {"type": "number"},
            "transform": {
                "type": "object",
                "properties": {
                    "pickPaths": string_list,
                    "dropPaths": string_list,
                    "rename": {"type": "object", "additionalProperties": {"type": "string"}}
                },
                "additionalProperties": false
            }
        }
    });

    let mut properties = json!({
        "version": {"const": version},
        "nodes": {
            "type": "array",
            "items": {
                "type": "object",
                "required": ["id", "kind"],
                "properties": node_properties,
                "additionalProperties": false
            }
        },
        "edges": {"type": "array", "items": edge},
        "meta": {}
    });
    if rich_metadata {
        properties["metadata"] = json!({
            "type": "object",
            "properties": {
                "exportedAt": {"type": "string"},
                "name": {"type": "string"},
                "description": {"type": "string"},
                "tags": {"type": "array", "items": {"type": "string"}},
                "migratedFrom": {"type": "string"}
            }
        });
    }

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": format!("Flow graph document {}", version),
        "type": "object",
        "required": ["version", "nodes", "edges"],
        "properties": properties
    })
}
