//! Values that cross port boundaries
//!
//! `FlowIO` is the only shape a node receives or produces. Inputs are
//! collected per target port into [`NodeInputs`]; when several edges feed the
//! same port their values are merged with [`FlowIO::merge`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::{PortId, TransformSpec};

/// Separator placed between text values merged into the same port
pub const TEXT_MERGE_SEPARATOR: &str = "\n";

/// Tagged value passed between nodes
///
/// Every variant carries a `meta` bag of producer-supplied diagnostics.
/// Consumers must check both the variant and `meta.error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum FlowIO {
    Text {
        content: String,
        #[serde(default)]
        meta: Map<String, Value>,
    },
    Json {
        content: Value,
        #[serde(default)]
        meta: Map<String, Value>,
    },
    Error {
        content: String,
        #[serde(default)]
        meta: Map<String, Value>,
    },
}

impl FlowIO {
    pub fn text(content: impl Into<String>) -> Self {
        FlowIO::Text {
            content: content.into(),
            meta: Map::new(),
        }
    }

    pub fn json(content: Value) -> Self {
        FlowIO::Json {
            content,
            meta: Map::new(),
        }
    }

    pub fn error(content: impl Into<String>) -> Self {
        FlowIO::Error {
            content: content.into(),
            meta: Map::new(),
        }
    }

    /// Attach a meta field, builder style
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta_mut().insert(key.into(), value);
        self
    }

    pub fn meta(&self) -> &Map<String, Value> {
        match self {
            FlowIO::Text { meta, .. } | FlowIO::Json { meta, .. } | FlowIO::Error { meta, .. } => meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut Map<String, Value> {
        match self {
            FlowIO::Text { meta, .. } | FlowIO::Json { meta, .. } | FlowIO::Error { meta, .. } => meta,
        }
    }

    /// Name of the variant (`text`, `json`, `error`)
    pub fn type_name(&self) -> &'static str {
        match self {
            FlowIO::Text { .. } => "text",
            FlowIO::Json { .. } => "json",
            FlowIO::Error { .. } => "error",
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, FlowIO::Error { .. })
    }

    /// The failure carried by this value, from either the envelope or `meta.error`
    pub fn error_message(&self) -> Option<String> {
        match self {
            FlowIO::Error { content, .. } => Some(content.clone()),
            _ => self.meta().get("error").and_then(|e| match e {
                Value::Null => None,
                Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }),
        }
    }

    /// Content as a JSON value (text and errors become strings)
    pub fn content_value(&self) -> Value {
        match self {
            FlowIO::Text { content, .. } | FlowIO::Error { content, .. } => Value::String(content.clone()),
            FlowIO::Json { content, .. } => content.clone(),
        }
    }

    /// Content rendered as text (json is serialized compactly)
    pub fn as_text(&self) -> String {
        match self {
            FlowIO::Text { content, .. } | FlowIO::Error { content, .. } => content.clone(),
            FlowIO::Json { content, .. } => match content {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        }
    }

    /// Merge a later value into this one
    ///
    /// text + text concatenates in order, json objects shallow-merge with the
    /// later value winning on key collision, and any error operand produces
    /// an error that keeps every message.
    pub fn merge(self, later: FlowIO) -> FlowIO {
        let mut meta = self.meta().clone();
        for (k, v) in later.meta() {
            meta.insert(k.clone(), v.clone());
        }

        let mut merged = match (self, later) {
            (FlowIO::Error { content: a, .. }, FlowIO::Error { content: b, .. }) => {
                FlowIO::error(join_text(a, b))
            }
            (FlowIO::Error { content, .. }, _) | (_, FlowIO::Error { content, .. }) => FlowIO::error(content),
            (FlowIO::Json { content: a, .. }, FlowIO::Json { content: b, .. }) => {
                match (a, b) {
                    (Value::Object(mut left), Value::Object(right)) => {
                        for (k, v) in right {
                            left.insert(k, v);
                        }
                        FlowIO::json(Value::Object(left))
                    }
                    (_, replacement) => FlowIO::json(replacement),
                }
            }
            (earlier, later) => FlowIO::text(join_text(earlier.as_text(), later.as_text())),
        };

        *merged.meta_mut() = meta;
        merged
    }

    /// Apply an edge projection; non-json values pass through unchanged
    pub fn apply_transform(self, transform: &TransformSpec) -> FlowIO {
        if transform.is_identity() {
            return self;
        }
        match self {
            FlowIO::Json { content, meta } => FlowIO::Json {
                content: project(content, transform),
                meta,
            },
            other => other,
        }
    }
}

/// Empty operands are skipped so no stray separator is produced
fn join_text(a: String, b: String) -> String {
    if a.is_empty() {
        b
    } else if b.is_empty() {
        a
    } else {
        format!("{}{}{}", a, TEXT_MERGE_SEPARATOR, b)
    }
}

fn project(content: Value, transform: &TransformSpec) -> Value {
    let mut value = if transform.pick_paths.is_empty() {
        content
    } else {
        let mut picked = Value::Object(Map::new());
        for path in &transform.pick_paths {
            if let Some(found) = get_path(&content, path) {
                set_path(&mut picked, path, found.clone());
            }
        }
        picked
    };

    for path in &transform.drop_paths {
        remove_path(&mut value, path);
    }

    for (from, to) in &transform.rename {
        if let Some(moved) = remove_path(&mut value, from) {
            set_path(&mut value, to, moved);
        }
    }

    value
}

/// Read a dotted path (`a.b.0.c`); numeric segments index arrays
pub fn get_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').filter(|s| !s.is_empty()).try_fold(value, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Write a dotted path, creating intermediate objects as needed
pub fn set_path(value: &mut Value, path: &str, new_value: Value) {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let Some((last, parents)) = segments.split_last() else {
        *value = new_value;
        return;
    };

    let mut current = value;
    for segment in parents {
        if !current.is_object() {
            *current = Value::Object(Map::new());
        }
        let Value::Object(map) = current else { return };
        current = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    if !current.is_object() {
        *current = Value::Object(Map::new());
    }
    if let Value::Object(map) = current {
        map.insert(last.to_string(), new_value);
    }
}

/// Remove a dotted path, returning the removed value
pub fn remove_path(value: &mut Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').filter(|s| !s.is_empty()).collect();
    let (last, parents) = segments.split_last()?;

    let mut current = value;
    for segment in parents {
        current = match current {
            Value::Object(map) => map.get_mut(*segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    match current {
        Value::Object(map) => map.remove(*last),
        _ => None,
    }
}

/// Port-keyed input map for one node dispatch
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeInputs {
    ports: BTreeMap<PortId, FlowIO>,
}

impl NodeInputs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a value to a port, merging with anything already there
    pub fn push(&mut self, port: impl Into<PortId>, value: FlowIO) {
        let port = port.into();
        let merged = match self.ports.remove(&port) {
            Some(existing) => existing.merge(value),
            None => value,
        };
        self.ports.insert(port, merged);
    }

    pub fn get(&self, port: &str) -> Option<&FlowIO> {
        self.ports.get(port)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&PortId, &FlowIO)> {
        self.ports.iter()
    }

    pub fn len(&self) -> usize {
        self.ports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ports.is_empty()
    }

    /// The value on `port` if present, else the first port's value
    pub fn primary_or(&self, port: &str) -> Option<&FlowIO> {
        self.ports.get(port).or_else(|| self.ports.values().next())
    }

    /// All inputs rendered as text, one port per line group
    pub fn combined_text(&self) -> String {
        self.ports
            .values()
            .map(FlowIO::as_text)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(TEXT_MERGE_SEPARATOR)
    }

    /// Port id → content, as a JSON object
    pub fn to_content_map(&self) -> Value {
        Value::Object(
            self.ports
                .iter()
                .map(|(port, io)| (port.clone(), io.content_value()))
                .collect(),
        )
    }

    /// Error messages carried by any input
    pub fn errors(&self) -> Vec<String> {
        self.ports.values().filter_map(FlowIO::error_message).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_text_merge_is_ordered_concatenation() {
        let merged = FlowIO::text("first").merge(FlowIO::text("second"));
        assert_eq!(merged, FlowIO::text("first\nsecond"));
    }

    #[test]
    fn test_text_merge_skips_empty_values() {
        assert_eq!(FlowIO::text("").merge(FlowIO::text("b")), FlowIO::text("b"));
        assert_eq!(FlowIO::text("a").merge(FlowIO::text("")), FlowIO::text("a"));
        assert_eq!(
            FlowIO::text("a").merge(FlowIO::text("")).merge(FlowIO::text("c")),
            FlowIO::text("a\nc")
        );
    }

    #[test]
    fn test_json_merge_later_wins() {
        let merged = FlowIO::json(json!({"a": 1, "b": 1})).merge(FlowIO::json(json!({"b": 2, "c": 3})));
        assert_eq!(merged.content_value(), json!({"a": 1, "b": 2, "c": 3}));
    }

    #[test]
    fn test_error_dominates_merge() {
        let merged = FlowIO::json(json!({"a": 1})).merge(FlowIO::error("boom"));
        assert!(merged.is_error());
        assert_eq!(merged.error_message().as_deref(), Some("boom"));
    }

    #[test]
    fn test_meta_error_is_reported() {
        let io = FlowIO::json(json!({})).with_meta("error", json!("service down"));
        assert_eq!(io.error_message().as_deref(), Some("service down"));
        assert!(!io.is_error());
    }

    #[test]
    fn test_serialized_shape() {
        let io = FlowIO::text("hi");
        let value = serde_json::to_value(&io).unwrap();
        assert_eq!(value, json!({"type": "text", "content": "hi", "meta": {}}));

        let parsed: FlowIO = serde_json::from_value(json!({"type": "json", "content": [1, 2]})).unwrap();
        assert_eq!(parsed.content_value(), json!([1, 2]));
    }

    #[test]
    fn test_transform_pick_drop_rename() {
        let transform = TransformSpec {
            pick_paths: vec!["user.name".into(), "user.email".into(), "score".into()],
            drop_paths: vec!["user.email".into()],
            rename: [("score".to_string(), "rank".to_string())].into_iter().collect(),
        };
        let io = FlowIO::json(json!({
            "user": {"name": "ada", "email": "a@b.c", "age": 36},
            "score": 0.9,
            "other": true
        }))
        .apply_transform(&transform);

        assert_eq!(io.content_value(), json!({"user": {"name": "ada"}, "rank": 0.9}));
    }

    #[test]
    fn test_transform_ignores_text() {
        let transform = TransformSpec {
            pick_paths: vec!["a".into()],
            ..Default::default()
        };
        assert_eq!(FlowIO::text("raw").apply_transform(&transform), FlowIO::text("raw"));
    }

    #[test]
    fn test_get_path_indexes_arrays() {
        let value = json!({"items": [{"id": "x"}, {"id": "y"}]});
        assert_eq!(get_path(&value, "items.1.id"), Some(&json!("y")));
        assert_eq!(get_path(&value, "items.5.id"), None);
    }

    #[test]
    fn test_node_inputs_merge_same_port() {
        let mut inputs = NodeInputs::new();
        inputs.push("in", FlowIO::text("a"));
        inputs.push("in", FlowIO::text("b"));
        inputs.push("ctx", FlowIO::json(json!({"k": 1})));

        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs.get("in"), Some(&FlowIO::text("a\nb")));
        assert_eq!(inputs.to_content_map(), json!({"ctx": {"k": 1}, "in": "a\nb"}));
    }
}
