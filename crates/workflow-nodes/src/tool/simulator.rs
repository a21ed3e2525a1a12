//! Tool Simulator
//!
//! Deterministic mock backend for tool calls. Results come from the tool's
//! schema: a forced error mode, a named or argument-matched preset, or the
//! tool's default success shape. Identical requests with identical seeds
//! always produce identical results.

use std::time::Duration;

use async_trait::async_trait;
use node_engine::{SimulatorSettings, ToolErrorMode, ToolInvocationRequest, ToolInvocationResult, ToolInvoker};
use serde_json::{json, Value};

use super::schemas::{tool_schema, ToolPreset, ToolSchema};

/// Simulated latency and fixed message per error mode
pub const MODE_LATENCIES: &[(ToolErrorMode, u64, &str)] = &[
    (ToolErrorMode::Timeout, 5000, "Request timed out after 5000ms"),
    (ToolErrorMode::RateLimit, 100, "Rate limit exceeded: too many requests"),
    (ToolErrorMode::NotFound, 50, "Resource not found"),
    (ToolErrorMode::AuthError, 30, "Authentication failed: invalid or missing credentials"),
    (ToolErrorMode::ServerError, 200, "Internal server error (500)"),
];

/// Start of the window seed-derived timestamps fall into (2024-01-01T00:00:00Z)
const TIMESTAMP_WINDOW_START: i64 = 1_704_067_200;
/// Width of that window: one year
const TIMESTAMP_WINDOW_SECS: u64 = 365 * 24 * 60 * 60;

/// Latency reported for tools without a schema
const UNKNOWN_TOOL_LATENCY_MS: u64 = 10;

/// Mock tool backend
#[derive(Debug, Clone, Default)]
pub struct ToolSimulator {
    settings: SimulatorSettings,
}

impl ToolSimulator {
    pub fn new(settings: SimulatorSettings) -> Self {
        Self { settings }
    }

    /// Simulator that reports latency without sleeping
    pub fn without_latency() -> Self {
        Self::new(SimulatorSettings { real_latency: false })
    }

    async fn wait(&self, latency_ms: u64) {
        if self.settings.real_latency && latency_ms > 0 {
            tokio::time::sleep(Duration::from_millis(latency_ms)).await;
        }
    }

    fn select_preset<'s>(schema: &'s ToolSchema, request: &ToolInvocationRequest) -> Option<&'s ToolPreset> {
        if let Some(name) = &request.preset {
            match schema.preset(name) {
                Some(preset) => return Some(preset),
                None => log::warn!("Tool '{}' has no preset named '{}'", schema.name, name),
            }
        }

        let operation_fits = |preset: &&ToolPreset| match preset.operation {
            Some(op) => request.operation.as_deref() == Some(op),
            None => true,
        };

        schema
            .presets
            .iter()
            .filter(operation_fits)
            .find(|p| p.operation.is_some() || has_args(&p.args) && args_subset(&p.args, &request.args))
            .or_else(|| schema.preset("success"))
            .or_else(|| schema.presets.first())
    }

    fn success(result: Value, latency_ms: u64, used_preset: Option<&str>) -> ToolInvocationResult {
        ToolInvocationResult {
            success: true,
            result: Some(result),
            error: None,
            latency_ms,
            used_preset: used_preset.map(str::to_string),
        }
    }
}

fn has_args(args: &Value) -> bool {
    args.as_object().map_or(false, |m| !m.is_empty())
}

/// Every key of `expected` is present in `actual` with an equal value
fn args_subset(expected: &Value, actual: &Value) -> bool {
    match (expected.as_object(), actual.as_object()) {
        (Some(expected), Some(actual)) => expected.iter().all(|(k, v)| actual.get(k) == Some(v)),
        _ => false,
    }
}

/// Add `_seed` and a seed-derived `_timestamp` to object results
fn with_seed_fields(mut result: Value, seed: u64) -> Value {
    let offset = crate::stable_hash(&seed.to_le_bytes()) % TIMESTAMP_WINDOW_SECS;
    let secs = TIMESTAMP_WINDOW_START + offset as i64;
    let timestamp = chrono::DateTime::from_timestamp(secs, 0)
        .map(|t| Value::String(t.to_rfc3339()))
        .unwrap_or_else(|| json!(secs));

    if let Value::Object(map) = &mut result {
        map.insert("_seed".into(), json!(seed));
        map.insert("_timestamp".into(), timestamp);
    }
    result
}

/// Check arguments against a tool's schema
pub(crate) fn validate(tool_name: &str, operation: Option<&str>, args: &Value) -> Vec<String> {
    let Some(schema) = tool_schema(tool_name) else {
        return vec![format!("Unknown tool '{}'", tool_name)];
    };

    let mut errors = Vec::new();

    if let Some(op) = operation {
        if !schema.operations.is_empty() && !schema.operations.iter().any(|known| *known == op) {
            errors.push(format!(
                "Unknown operation '{}' for tool '{}' (expected one of: {})",
                op,
                tool_name,
                schema.operations.join(", ")
            ));
        }
    }

    let empty = serde_json::Map::new();
    let args = match args {
        Value::Object(map) => map,
        Value::Null => &empty,
        other => {
            errors.push(format!("Arguments must be an object, got {}", other));
            return errors;
        }
    };

    for param in &schema.parameters {
        match args.get(param.name) {
            None | Some(Value::Null) => {
                if param.required {
                    errors.push(format!("Missing required parameter '{}'", param.name));
                }
            }
            Some(value) if !param.kind.matches(value) => {
                errors.push(format!(
                    "Parameter '{}' must be of type {}",
                    param.name,
                    param.kind.as_str()
                ));
            }
            Some(value) => {
                if let (Some(allowed), Some(s)) = (param.allowed, value.as_str()) {
                    if !allowed.iter().any(|a| *a == s) {
                        errors.push(format!(
                            "Parameter '{}' must be one of: {} (got '{}')",
                            param.name,
                            allowed.join(", "),
                            s
                        ));
                    }
                }
            }
        }
    }

    errors
}

#[async_trait]
impl ToolInvoker for ToolSimulator {
    async fn invoke(&self, request: &ToolInvocationRequest) -> ToolInvocationResult {
        if request.error_mode != ToolErrorMode::None {
            let (latency_ms, message) = MODE_LATENCIES
                .iter()
                .find(|(mode, _, _)| *mode == request.error_mode)
                .map(|(_, latency, message)| (*latency, *message))
                .unwrap_or((0, "Simulated failure"));
            log::debug!(
                "ToolSimulator: '{}' forced into {} after {}ms",
                request.tool_name,
                request.error_mode.as_str(),
                latency_ms
            );
            self.wait(latency_ms).await;
            return ToolInvocationResult {
                success: false,
                result: None,
                error: Some(message.to_string()),
                latency_ms,
                used_preset: None,
            };
        }

        let Some(schema) = tool_schema(&request.tool_name) else {
            log::warn!("ToolSimulator: no schema for '{}', returning generic success", request.tool_name);
            let latency_ms = request.latency_ms.unwrap_or(UNKNOWN_TOOL_LATENCY_MS);
            self.wait(latency_ms).await;
            let mut result = json!({"status": "ok", "tool": request.tool_name});
            if let Some(seed) = request.seed {
                result = with_seed_fields(result, seed);
            }
            return Self::success(result, latency_ms, None);
        };

        let (mut result, latency_ms, used_preset) = match Self::select_preset(schema, request) {
            Some(preset) => (
                preset.result.clone(),
                request.latency_ms.unwrap_or(preset.latency_ms),
                Some(preset.name),
            ),
            None => (
                schema.default_result.clone(),
                request.latency_ms.unwrap_or(UNKNOWN_TOOL_LATENCY_MS),
                None,
            ),
        };
        if let Some(seed) = request.seed {
            result = with_seed_fields(result, seed);
        }

        log::debug!(
            "ToolSimulator: '{}' answered with preset {:?} after {}ms",
            request.tool_name,
            used_preset,
            latency_ms
        );
        self.wait(latency_ms).await;
        Self::success(result, latency_ms, used_preset)
    }

    fn validate_args(&self, tool_name: &str, operation: Option<&str>, args: &Value) -> Vec<String> {
        validate(tool_name, operation, args)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(tool: &str, args: Value) -> ToolInvocationRequest {
        ToolInvocationRequest {
            tool_name: tool.into(),
            args,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_error_mode() {
        let simulator = ToolSimulator::without_latency();
        let mut req = request("web_search", json!({"query": "rust"}));
        req.error_mode = ToolErrorMode::Timeout;

        let result = simulator.invoke(&req).await;
        assert!(!result.success);
        assert_eq!(result.latency_ms, 5000);
        assert!(result.error.unwrap().contains("timed out"));

        req.error_mode = ToolErrorMode::RateLimit;
        assert_eq!(simulator.invoke(&req).await.latency_ms, 100);
    }

    #[tokio::test]
    async fn test_argument_matched_preset() {
        let simulator = ToolSimulator::without_latency();
        let result = simulator
            .invoke(&request("http_request", json!({"url": "https://api.example.com/missing", "method": "GET"})))
            .await;
        assert!(result.success);
        assert_eq!(result.used_preset.as_deref(), Some("not_found"));
        assert_eq!(result.result.unwrap()["status"], 404);
    }

    #[tokio::test]
    async fn test_falls_back_to_success_preset() {
        let simulator = ToolSimulator::without_latency();
        let result = simulator
            .invoke(&request("http_request", json!({"url": "https://api.example.com/users"})))
            .await;
        assert_eq!(result.used_preset.as_deref(), Some("success"));
        assert_eq!(result.result.unwrap()["status"], 200);
        assert_eq!(result.latency_ms, 200);
    }

    #[tokio::test]
    async fn test_named_preset_and_latency_override() {
        let simulator = ToolSimulator::without_latency();
        let mut req = request("web_search", json!({"query": "rust"}));
        req.preset = Some("empty".into());
        req.latency_ms = Some(7);

        let result = simulator.invoke(&req).await;
        assert_eq!(result.used_preset.as_deref(), Some("empty"));
        assert_eq!(result.latency_ms, 7);
        assert_eq!(result.result.unwrap()["total"], 0);
    }

    #[tokio::test]
    async fn test_operation_preset() {
        let simulator = ToolSimulator::without_latency();
        let mut req = request("database", json!({"table": "users"}));
        req.operation = Some("insert".into());
        assert_eq!(simulator.invoke(&req).await.used_preset.as_deref(), Some("insert"));

        req.operation = Some("select".into());
        assert_eq!(simulator.invoke(&req).await.used_preset.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_seed_determinism() {
        let simulator = ToolSimulator::without_latency();
        let mut req = request("web_search", json!({"query": "rust"}));
        req.seed = Some(42);

        let first = simulator.invoke(&req).await.result.unwrap();
        let second = simulator.invoke(&req).await.result.unwrap();
        assert_eq!(serde_json::to_string(&first).unwrap(), serde_json::to_string(&second).unwrap());
        assert_eq!(first["_seed"], 42);
        assert!(first["_timestamp"].as_str().unwrap().starts_with("202"));

        req.seed = Some(43);
        let other = simulator.invoke(&req).await.result.unwrap();
        assert_ne!(first["_timestamp"], other["_timestamp"]);
    }

    #[tokio::test]
    async fn test_unknown_tool_generic_success() {
        let simulator = ToolSimulator::without_latency();
        let result = simulator.invoke(&request("weather", json!({}))).await;
        assert!(result.success);
        assert_eq!(result.result.unwrap()["status"], "ok");
    }

    #[test]
    fn test_validate_args() {
        assert!(validate("web_search", Some("search"), &json!({"query": "rust", "limit": 3})).is_empty());

        let errors = validate("web_search", Some("scrape"), &json!({"limit": "three"}));
        assert_eq!(errors.len(), 3, "{:?}", errors);
        assert!(errors.iter().any(|e| e.contains("Unknown operation 'scrape'")));
        assert!(errors.iter().any(|e| e.contains("Missing required parameter 'query'")));
        assert!(errors.iter().any(|e| e.contains("'limit' must be of type integer")));

        let errors = validate("http_request", None, &json!({"url": "u", "method": "FETCH"}));
        assert_eq!(errors, vec!["Parameter 'method' must be one of: GET, POST, PUT, PATCH, DELETE (got 'FETCH')"]);

        assert_eq!(validate("nope", None, &json!({})), vec!["Unknown tool 'nope'"]);
        assert_eq!(validate("send_email", None, &json!([1])).len(), 1);
    }
}
