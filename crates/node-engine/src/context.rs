//! Flow context store
//!
//! Holds a sanitized snapshot of every executed node: its configuration,
//! its output and a little metadata. Everything that enters the bag is
//! redacted (secret-like keys become `"[redacted]"`) and size-bounded
//! (oversized subtrees become an `"[omitted: N KB]"` marker).

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::flow_io::FlowIO;
use crate::types::{GraphNode, NodeId, NodeKind};

/// Replacement for secret values
pub const REDACTED: &str = "[redacted]";

/// Default per-subtree byte budget
pub const DEFAULT_BYTE_LIMIT: usize = 2048;

/// Key names treated as secrets unless configured otherwise
pub const DEFAULT_SECRET_KEYS: &[&str] = &[
    "apikey",
    "api_key",
    "token",
    "access_token",
    "refresh_token",
    "password",
    "secret",
    "client_secret",
    "authorization",
    "private_key",
];

/// Redaction and size settings for the context bag
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ContextConfig {
    /// Maximum serialized size of any subtree in the bag
    pub byte_limit: usize,
    /// Secret key names, matched case-insensitively
    pub secret_keys: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            byte_limit: DEFAULT_BYTE_LIMIT,
            secret_keys: DEFAULT_SECRET_KEYS.iter().map(|k| k.to_string()).collect(),
        }
    }
}

/// Serialized UTF-8 size of a value
pub fn serialized_len(value: &Value) -> usize {
    serde_json::to_string(value).map(|s| s.len()).unwrap_or(0)
}

/// Marker that replaces an oversized subtree
pub fn omission_marker(bytes: usize) -> String {
    format!("[omitted: {:.1} KB]", bytes as f64 / 1024.0)
}

/// Replace every value whose key is a secret with [`REDACTED`]
///
/// `secret_keys` must already be lowercase. Redacted values are replaced
/// whole and never descended into.
pub fn redact(value: &Value, secret_keys: &HashSet<String>) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| {
                    if secret_keys.contains(&key.to_lowercase()) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact(child, secret_keys))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|item| redact(item, secret_keys)).collect()),
        other => other.clone(),
    }
}

/// Bound a value to `byte_limit`
///
/// Children are bounded first; if the container is still over budget it is
/// replaced whole by the omission marker. Nothing is ever cut mid-value.
pub fn truncate(value: &Value, byte_limit: usize) -> Value {
    let size = serialized_len(value);
    if size <= byte_limit {
        return value.clone();
    }

    let bounded = match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| (key.clone(), truncate(child, byte_limit)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(|item| truncate(item, byte_limit)).collect()),
        _ => return Value::String(omission_marker(size)),
    };

    if serialized_len(&bounded) <= byte_limit {
        bounded
    } else {
        Value::String(omission_marker(size))
    }
}

/// Keep scalars, keep composites only when they fit the budget
pub fn prune_config(config: &Value, byte_limit: usize) -> Value {
    let prune_one = |value: &Value| -> Value {
        match value {
            Value::Object(_) | Value::Array(_) => {
                let size = serialized_len(value);
                if size < byte_limit {
                    value.clone()
                } else {
                    Value::String(omission_marker(size))
                }
            }
            scalar => scalar.clone(),
        }
    };

    match config {
        Value::Object(map) => Value::Object(map.iter().map(|(k, v)| (k.clone(), prune_one(v))).collect()),
        other => prune_one(other),
    }
}

/// Per-node metadata recorded alongside config and output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryMetadata {
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Output variant (`text`, `json`, `error`)
    pub output_type: String,
    /// Largest weight among the resolved inbound edges
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

/// Sanitized snapshot of one executed node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowContextEntry {
    pub config: Value,
    pub output: FlowIO,
    pub metadata: EntryMetadata,
}

/// Node id → sanitized snapshot
pub type FlowContextBag = BTreeMap<NodeId, FlowContextEntry>;

/// A node whose entry differs between two bags
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangedEntry {
    pub node_id: NodeId,
    /// Which of `config`, `output`, `metadata` differ
    pub fields: Vec<String>,
}

/// Shallow per-node difference between two bags
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextDiff {
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
    pub changed: Vec<ChangedEntry>,
}

impl ContextDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.changed.is_empty()
    }
}

/// The run-scoped context bag
#[derive(Debug, Clone)]
pub struct FlowContextStore {
    byte_limit: usize,
    secret_keys: HashSet<String>,
    entries: FlowContextBag,
}

impl FlowContextStore {
    pub fn new(config: &ContextConfig) -> Self {
        Self {
            byte_limit: config.byte_limit,
            secret_keys: config.secret_keys.iter().map(|k| k.to_lowercase()).collect(),
            entries: BTreeMap::new(),
        }
    }

    pub fn byte_limit(&self) -> usize {
        self.byte_limit
    }

    /// Build a sanitized entry without recording it
    pub fn snapshot(&self, node: &GraphNode, output: &FlowIO, weight: Option<f64>) -> FlowContextEntry {
        let config = redact(&node.config, &self.secret_keys);
        let config = truncate(&prune_config(&config, self.byte_limit), self.byte_limit);

        FlowContextEntry {
            config,
            output: self.sanitize_output(output),
            metadata: EntryMetadata {
                kind: node.kind,
                subtype: node.subtype.clone(),
                output_type: output.type_name().to_string(),
                weight,
            },
        }
    }

    /// Snapshot a node and write it into the bag
    pub fn record(&mut self, node: &GraphNode, output: &FlowIO, weight: Option<f64>) -> FlowContextEntry {
        let entry = self.snapshot(node, output, weight);
        self.entries.insert(node.id.clone(), entry.clone());
        entry
    }

    pub fn get(&self, node_id: &str) -> Option<&FlowContextEntry> {
        self.entries.get(node_id)
    }

    pub fn entries(&self) -> &FlowContextBag {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// The bag as a JSON object, for expression scopes and reports
    pub fn to_value(&self) -> Value {
        serde_json::to_value(&self.entries).unwrap_or_else(|_| Value::Object(Map::new()))
    }

    fn sanitize_output(&self, output: &FlowIO) -> FlowIO {
        let meta = match truncate(&redact(&Value::Object(output.meta().clone()), &self.secret_keys), self.byte_limit) {
            Value::Object(map) => map,
            marker => {
                let mut map = Map::new();
                map.insert("omitted".to_string(), marker);
                map
            }
        };

        let bound_text = |content: &str| -> String {
            let size = serialized_len(&Value::String(content.to_string()));
            if size <= self.byte_limit {
                content.to_string()
            } else {
                omission_marker(size)
            }
        };

        match output {
            FlowIO::Text { content, .. } => FlowIO::Text {
                content: bound_text(content),
                meta,
            },
            FlowIO::Error { content, .. } => FlowIO::Error {
                content: bound_text(content),
                meta,
            },
            FlowIO::Json { content, .. } => FlowIO::Json {
                content: truncate(&redact(content, &self.secret_keys), self.byte_limit),
                meta,
            },
        }
    }
}

/// Compare two bags node by node
pub fn diff(before: &FlowContextBag, after: &FlowContextBag) -> ContextDiff {
    let mut result = ContextDiff::default();

    for (node_id, new_entry) in after {
        match before.get(node_id) {
            None => result.added.push(node_id.clone()),
            Some(old_entry) => {
                let mut fields = Vec::new();
                if !same_serialized(&old_entry.config, &new_entry.config) {
                    fields.push("config".to_string());
                }
                if !same_serialized(&old_entry.output, &new_entry.output) {
                    fields.push("output".to_string());
                }
                if !same_serialized(&old_entry.metadata, &new_entry.metadata) {
                    fields.push("metadata".to_string());
                }
                if !fields.is_empty() {
                    result.changed.push(ChangedEntry {
                        node_id: node_id.clone(),
                        fields,
                    });
                }
            }
        }
    }

    result.removed = before
        .keys()
        .filter(|id| !after.contains_key(*id))
        .cloned()
        .collect();

    result
}

fn same_serialized<T: Serialize>(a: &T, b: &T) -> bool {
    match (serde_json::to_string(a), serde_json::to_string(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn secrets() -> HashSet<String> {
        DEFAULT_SECRET_KEYS.iter().map(|k| k.to_string()).collect()
    }

    #[test]
    fn test_truncate_replaces_oversized_leaf() {
        let value = json!({"a": "x".repeat(5000)});
        assert_eq!(truncate(&value, 2048), json!({"a": "[omitted: 4.9 KB]"}));
    }

    #[test]
    fn test_truncate_keeps_small_values() {
        let value = json!({"a": [1, 2, 3], "b": {"c": "d"}});
        assert_eq!(truncate(&value, 2048), value);
    }

    #[test]
    fn test_truncate_size_bound_on_wide_object() {
        let wide: Map<String, Value> = (0..200).map(|i| (format!("key{}", i), json!("v".repeat(50)))).collect();
        let value = Value::Object(wide);
        let result = truncate(&value, 2048);
        let is_marker = result.as_str().is_some_and(|s| s.starts_with("[omitted:"));
        assert!(is_marker || serialized_len(&result) <= 2048);
        assert!(is_marker);
    }

    #[test]
    fn test_redact_at_any_depth_case_insensitive() {
        let config = json!({
            "model": "llama",
            "ApiKey": "sk-123",
            "nested": {"auth": {"PASSWORD": {"deep": "hunter2"}}},
            "list": [{"token": "abc"}]
        });
        let redacted = redact(&config, &secrets());
        assert_eq!(redacted["ApiKey"], REDACTED);
        assert_eq!(redacted["nested"]["auth"]["PASSWORD"], REDACTED);
        assert_eq!(redacted["list"][0]["token"], REDACTED);
        assert_eq!(redacted["model"], "llama");
    }

    #[test]
    fn test_prune_config_keeps_scalars() {
        let config = json!({
            "prompt": "x".repeat(3000),
            "topK": 5,
            "docs": ["y".repeat(3000)],
            "small": {"a": 1}
        });
        let pruned = prune_config(&config, 2048);
        assert_eq!(pruned["topK"], 5);
        assert_eq!(pruned["small"], json!({"a": 1}));
        assert!(pruned["docs"].as_str().unwrap().starts_with("[omitted:"));
        // Scalars survive pruning; truncate bounds them afterwards.
        assert_eq!(pruned["prompt"].as_str().unwrap().len(), 3000);
    }

    #[test]
    fn test_snapshot_is_redacted_and_bounded() {
        let store = FlowContextStore::new(&ContextConfig::default());
        let mut node = GraphNode::new("tool1", NodeKind::Tool);
        node.config = json!({"toolName": "http_request", "headers": {"Authorization": "Bearer x"}, "body": "z".repeat(4096)});

        let entry = store.snapshot(&node, &FlowIO::json(json!({"status": 200})), Some(0.5));
        assert_eq!(entry.config["headers"]["Authorization"], REDACTED);
        assert!(entry.config["body"].as_str().unwrap().starts_with("[omitted:"));
        assert_eq!(entry.metadata.weight, Some(0.5));
        assert_eq!(entry.metadata.output_type, "json");
    }

    #[test]
    fn test_oversized_text_output_is_replaced() {
        let store = FlowContextStore::new(&ContextConfig::default());
        let node = GraphNode::new("fmt", NodeKind::Formatter);
        let entry = store.snapshot(&node, &FlowIO::text("w".repeat(10_000)), None);
        assert!(entry.output.as_text().starts_with("[omitted:"));
    }

    #[test]
    fn test_diff_reports_added_removed_changed() {
        let mut store = FlowContextStore::new(&ContextConfig::default());
        let a = GraphNode::new("a", NodeKind::Retrieval);
        let b = GraphNode::new("b", NodeKind::Reasoning);

        store.record(&a, &FlowIO::text("one"), None);
        let before = store.entries().clone();

        store.record(&a, &FlowIO::text("two"), None);
        store.record(&b, &FlowIO::text("new"), None);
        let after = store.entries().clone();

        let d = diff(&before, &after);
        assert_eq!(d.added, vec!["b"]);
        assert!(d.removed.is_empty());
        assert_eq!(d.changed.len(), 1);
        assert_eq!(d.changed[0].fields, vec!["output"]);

        let back = diff(&after, &before);
        assert_eq!(back.removed, vec!["b"]);
        assert!(diff(&after, &after).is_empty());
    }
}
