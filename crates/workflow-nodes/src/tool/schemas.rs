//! Static tool schemas
//!
//! Each simulated tool declares its parameters, known operations, named
//! presets (canned results) and the default success shape returned when no
//! preset applies.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use serde::Serialize;
use serde_json::{json, Value};

/// Primitive type of a tool parameter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ParamKind::String => value.is_string(),
            ParamKind::Number => value.is_number(),
            ParamKind::Integer => value.is_i64() || value.is_u64(),
            ParamKind::Boolean => value.is_boolean(),
            ParamKind::Object => value.is_object(),
            ParamKind::Array => value.is_array(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Integer => "integer",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ParamSpec {
    pub name: &'static str,
    pub kind: ParamKind,
    pub required: bool,
    /// Allowed values (strings only)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed: Option<&'static [&'static str]>,
}

impl ParamSpec {
    const fn new(name: &'static str, kind: ParamKind, required: bool) -> Self {
        Self {
            name,
            kind,
            required,
            allowed: None,
        }
    }

    const fn one_of(name: &'static str, required: bool, allowed: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: ParamKind::String,
            required,
            allowed: Some(allowed),
        }
    }
}

/// A named canned result
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolPreset {
    pub name: &'static str,
    /// Only match requests for this operation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<&'static str>,
    /// Arguments that must all be present (and equal) in a request
    pub args: Value,
    pub result: Value,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolSchema {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParamSpec>,
    pub operations: Vec<&'static str>,
    pub presets: Vec<ToolPreset>,
    pub default_result: Value,
}

impl ToolSchema {
    pub fn preset(&self, name: &str) -> Option<&ToolPreset> {
        self.presets.iter().find(|p| p.name == name)
    }
}

const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];
const EMAIL_PRIORITIES: &[&str] = &["low", "normal", "high"];

static SCHEMAS: Lazy<BTreeMap<&'static str, ToolSchema>> = Lazy::new(|| {
    let schemas = vec![
        ToolSchema {
            name: "web_search",
            description: "Search the web and return ranked results",
            parameters: vec![
                ParamSpec::new("query", ParamKind::String, true),
                ParamSpec::new("limit", ParamKind::Integer, false),
                ParamSpec::new("safeSearch", ParamKind::Boolean, false),
            ],
            operations: vec!["search"],
            presets: vec![
                ToolPreset {
                    name: "empty",
                    operation: None,
                    args: json!({"query": ""}),
                    result: json!({"results": [], "total": 0}),
                    latency_ms: 80,
                },
                ToolPreset {
                    name: "success",
                    operation: None,
                    args: json!({}),
                    result: json!({
                        "results": [
                            {"title": "The Rust Programming Language", "url": "https://doc.rust-lang.org/book/", "snippet": "An introductory book about Rust."},
                            {"title": "Rust by Example", "url": "https://doc.rust-lang.org/rust-by-example/", "snippet": "Learn Rust with runnable examples."}
                        ],
                        "total": 2
                    }),
                    latency_ms: 120,
                },
            ],
            default_result: json!({"results": [], "total": 0}),
        },
        ToolSchema {
            name: "http_request",
            description: "Perform an HTTP request",
            parameters: vec![
                ParamSpec::new("url", ParamKind::String, true),
                ParamSpec::one_of("method", false, HTTP_METHODS),
                ParamSpec::new("headers", ParamKind::Object, false),
                ParamSpec::new("body", ParamKind::Object, false),
            ],
            operations: vec![],
            presets: vec![
                ToolPreset {
                    name: "not_found",
                    operation: None,
                    args: json!({"url": "https://api.example.com/missing"}),
                    result: json!({"status": 404, "body": {"error": "Not Found"}}),
                    latency_ms: 90,
                },
                ToolPreset {
                    name: "success",
                    operation: None,
                    args: json!({}),
                    result: json!({"status": 200, "body": {"ok": true}}),
                    latency_ms: 200,
                },
            ],
            default_result: json!({"status": 200, "body": null}),
        },
        ToolSchema {
            name: "database",
            description: "Query or modify a table",
            parameters: vec![
                ParamSpec::new("table", ParamKind::String, true),
                ParamSpec::new("where", ParamKind::Object, false),
                ParamSpec::new("values", ParamKind::Object, false),
                ParamSpec::new("limit", ParamKind::Integer, false),
            ],
            operations: vec!["select", "insert", "update", "delete"],
            presets: vec![
                ToolPreset {
                    name: "insert",
                    operation: Some("insert"),
                    args: json!({}),
                    result: json!({"rowCount": 1, "insertedId": 101}),
                    latency_ms: 60,
                },
                ToolPreset {
                    name: "success",
                    operation: None,
                    args: json!({}),
                    result: json!({
                        "rows": [{"id": 1, "name": "Ada"}, {"id": 2, "name": "Grace"}],
                        "rowCount": 2
                    }),
                    latency_ms: 45,
                },
            ],
            default_result: json!({"rows": [], "rowCount": 0}),
        },
        ToolSchema {
            name: "send_email",
            description: "Queue an email for delivery",
            parameters: vec![
                ParamSpec::new("to", ParamKind::String, true),
                ParamSpec::new("subject", ParamKind::String, true),
                ParamSpec::new("body", ParamKind::String, false),
                ParamSpec::one_of("priority", false, EMAIL_PRIORITIES),
            ],
            operations: vec![],
            presets: vec![ToolPreset {
                name: "success",
                operation: None,
                args: json!({}),
                result: json!({"messageId": "msg_0001", "status": "queued"}),
                latency_ms: 150,
            }],
            default_result: json!({"status": "sent"}),
        },
    ];
    schemas.into_iter().map(|s| (s.name, s)).collect()
});

/// Schema for a known tool
pub fn tool_schema(name: &str) -> Option<&'static ToolSchema> {
    SCHEMAS.get(name)
}

/// Names of every simulated tool, sorted
pub fn tool_names() -> Vec<&'static str> {
    SCHEMAS.keys().copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_tools() {
        assert_eq!(tool_names(), vec!["database", "http_request", "send_email", "web_search"]);
        assert!(tool_schema("calculator").is_none());
    }

    #[test]
    fn test_every_tool_has_success_preset() {
        for name in tool_names() {
            let schema = tool_schema(name).unwrap();
            assert!(schema.preset("success").is_some(), "{} has no success preset", name);
        }
    }

    #[test]
    fn test_param_kind_matches() {
        assert!(ParamKind::Integer.matches(&json!(3)));
        assert!(!ParamKind::Integer.matches(&json!(3.5)));
        assert!(ParamKind::Number.matches(&json!(3.5)));
        assert!(!ParamKind::String.matches(&json!(null)));
    }
}
