//! Reasoning Executor
//!
//! Sends the node's inputs to the model with a style-derived sampling
//! configuration and parses a JSON-shaped answer out of the reply.

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{
    ExecutorRegistration, FlowIO, ModelOptions, NodeContext, NodeDescriptor, NodeExecutor, NodeInputs, NodeKind,
    NodeOutcome, Result,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

const DEFAULT_SYSTEM_PROMPT: &str =
    "You are one reasoning step in an automated workflow. Reply with a single JSON object containing at least an \"answer\" field.";

/// Sampling presets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasoningStyle {
    Fast,
    #[default]
    Balanced,
    Deep,
}

impl ReasoningStyle {
    /// `(temperature, max_tokens)` for this style
    pub fn sampling(&self) -> (f32, u32) {
        match self {
            ReasoningStyle::Fast => (0.2, 512),
            ReasoningStyle::Balanced => (0.5, 1024),
            ReasoningStyle::Deep => (0.7, 2048),
        }
    }
}

/// Reasoning executor
///
/// # Config
/// - `style` (optional) - `fast`, `balanced` (default) or `deep`
/// - `prompt` (optional) - Instructions; `{{input}}` is replaced by the inputs
/// - `system`, `model`, `seed` (optional) - Passed to the model
/// - `allowTools` (optional) - Expose `toolIntents` from the reply
/// - `schema` (optional) - Field sketch, e.g. `{"answer": "string", "score": "number?"}`
///
/// # Inputs
/// - Any ports; rendered as text into the prompt
///
/// # Outputs
/// - `out` - `{answer, structured}` plus `toolIntents` when tools are allowed
///
/// A schema mismatch is recorded in `meta.schemaValid`/`meta.schemaError`
/// and never fails the node. A failed model call produces an error value.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReasoningExecutor;

impl ReasoningExecutor {
    /// Port ID for the reasoning result
    pub const PORT_OUTPUT: &'static str = "out";

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::for_kind(
            NodeKind::Reasoning,
            "Reasoning",
            "Ask the model for a structured answer over the inputs",
        )
    }

    fn style(config: &Value) -> ReasoningStyle {
        config
            .get("style")
            .cloned()
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_default()
    }

    fn prompt(config: &Value, inputs: &NodeInputs) -> String {
        let input_text = inputs.combined_text();
        match config.get("prompt").and_then(Value::as_str) {
            Some(template) if template.contains("{{input}}") => template.replace("{{input}}", &input_text),
            Some(instructions) => format!("{}\n\nInput:\n{}", instructions, input_text),
            None => input_text,
        }
    }
}

/// Strip a surrounding Markdown code fence, if any
fn unfence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let body = rest.split_once('\n').map_or("", |(_, body)| body);
    body.trim_end().strip_suffix("```").unwrap_or(body).trim()
}

/// Extract a JSON object from a model reply
///
/// Accepts a bare object, a fenced one, or an object embedded in prose.
pub fn parse_reply(text: &str) -> Option<Map<String, Value>> {
    let candidate = unfence(text);
    if let Ok(Value::Object(map)) = serde_json::from_str(candidate) {
        return Some(map);
    }
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    if end <= start {
        return None;
    }
    match serde_json::from_str(&candidate[start..=end]) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Check a structured reply against a `{field: type}` sketch
///
/// Types are `string`, `number`, `integer`, `boolean`, `array`, `object` or
/// `any`; a trailing `?` makes the field optional.
pub fn check_schema(schema: &Map<String, Value>, structured: Option<&Map<String, Value>>) -> std::result::Result<(), String> {
    let Some(structured) = structured else {
        return Err("response was not a JSON object".to_string());
    };

    let mut problems = Vec::new();
    for (field, expected) in schema {
        let expected = expected.as_str().unwrap_or("any");
        let (type_name, optional) = match expected.strip_suffix('?') {
            Some(base) => (base, true),
            None => (expected, false),
        };
        match structured.get(field) {
            None | Some(Value::Null) => {
                if !optional {
                    problems.push(format!("missing field '{}'", field));
                }
            }
            Some(value) => {
                let ok = match type_name {
                    "string" => value.is_string(),
                    "number" => value.is_number(),
                    "integer" => value.is_i64() || value.is_u64(),
                    "boolean" => value.is_boolean(),
                    "array" => value.is_array(),
                    "object" => value.is_object(),
                    _ => true,
                };
                if !ok {
                    problems.push(format!("field '{}' should be {}", field, type_name));
                }
            }
        }
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.join("; "))
    }
}

#[async_trait]
impl NodeExecutor for ReasoningExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>, inputs: &NodeInputs) -> Result<NodeOutcome> {
        if let Some(failure) = crate::upstream_failure(&ctx.node.id, inputs) {
            return Ok(NodeOutcome::all(failure));
        }

        let config = &ctx.node.config;
        let style = Self::style(config);
        let (temperature, max_tokens) = style.sampling();
        let options = ModelOptions {
            model: ctx.node.config_str("model").map(str::to_string),
            system: Some(ctx.node.config_str("system").unwrap_or(DEFAULT_SYSTEM_PROMPT).to_string()),
            temperature,
            max_tokens,
            seed: config.get("seed").and_then(Value::as_u64),
        };

        let response = match ctx.call_model(&Self::prompt(config, inputs), &options).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!("ReasoningExecutor {}: model call failed: {}", ctx.node.id, e);
                return Ok(NodeOutcome::all(
                    FlowIO::error(format!("model call failed: {}", e)).with_meta("style", json!(style)),
                ));
            }
        };

        let structured = parse_reply(&response.text);
        let allow_tools = config.get("allowTools").and_then(Value::as_bool).unwrap_or(false);

        let mut content = Map::new();
        let answer = structured
            .as_ref()
            .and_then(|s| s.get("answer").cloned())
            .unwrap_or_else(|| Value::String(response.text.trim().to_string()));
        content.insert("answer".into(), answer);
        content.insert(
            "structured".into(),
            structured.clone().map_or(Value::Null, Value::Object),
        );

        let intents = structured
            .as_ref()
            .and_then(|s| s.get("toolIntents").or_else(|| s.get("tool_calls")))
            .cloned();

        let mut output_meta = Map::new();
        output_meta.insert("style".into(), json!(style));
        output_meta.insert("temperature".into(), json!(temperature));
        output_meta.insert("maxTokens".into(), json!(max_tokens));
        output_meta.insert("parsed".into(), json!(structured.is_some()));

        if allow_tools {
            content.insert("toolIntents".into(), intents.unwrap_or_else(|| json!([])));
        } else if intents.is_some() {
            log::debug!("ReasoningExecutor {}: dropping tool intents (tools not allowed)", ctx.node.id);
            output_meta.insert("toolIntentsDropped".into(), json!(true));
        }

        if let Some(schema) = config.get("schema").and_then(Value::as_object) {
            match check_schema(schema, structured.as_ref()) {
                Ok(()) => {
                    output_meta.insert("schemaValid".into(), json!(true));
                }
                Err(message) => {
                    log::debug!("ReasoningExecutor {}: schema mismatch: {}", ctx.node.id, message);
                    output_meta.insert("schemaValid".into(), json!(false));
                    output_meta.insert("schemaError".into(), json!(message));
                }
            }
        }

        let mut output = FlowIO::json(Value::Object(content));
        output.meta_mut().extend(output_meta);
        Ok(NodeOutcome::all(output))
    }
}

inventory::submit!(ExecutorRegistration {
    kind: NodeKind::Reasoning,
    subtype: None,
    descriptor: ReasoningExecutor::descriptor,
    executor: || Arc::new(ReasoningExecutor),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ScriptedModel;
    use crate::storage::InMemoryIndex;
    use crate::test_support::{run_node, services_with};
    use node_engine::GraphNode;

    fn reasoning(config: Value) -> GraphNode {
        let mut node = GraphNode::new("think", NodeKind::Reasoning);
        node.config = config;
        node
    }

    fn text_input(text: &str) -> NodeInputs {
        let mut inputs = NodeInputs::new();
        inputs.push("in", FlowIO::text(text));
        inputs
    }

    #[test]
    fn test_style_presets() {
        assert_eq!(ReasoningStyle::Fast.sampling(), (0.2, 512));
        assert_eq!(ReasoningStyle::Balanced.sampling(), (0.5, 1024));
        assert_eq!(ReasoningStyle::Deep.sampling(), (0.7, 2048));
        assert_eq!(ReasoningExecutor::style(&json!({"style": "deep"})), ReasoningStyle::Deep);
        assert_eq!(ReasoningExecutor::style(&json!({"style": "bogus"})), ReasoningStyle::Balanced);
    }

    #[test]
    fn test_parse_reply() {
        assert_eq!(parse_reply(r#"{"answer": 1}"#).unwrap()["answer"], 1);
        assert_eq!(parse_reply("```json\n{\"answer\": \"x\"}\n```").unwrap()["answer"], "x");
        assert_eq!(parse_reply("Sure! {\"answer\": true} Hope that helps").unwrap()["answer"], true);
        assert!(parse_reply("no json here").is_none());
        assert!(parse_reply("[1, 2]").is_none());
    }

    #[test]
    fn test_check_schema() {
        let schema = json!({"answer": "string", "score": "number?", "tags": "array"});
        let schema = schema.as_object().unwrap();

        let good = json!({"answer": "x", "tags": []});
        assert!(check_schema(schema, good.as_object()).is_ok());

        let bad = json!({"answer": 3, "score": "high"});
        let message = check_schema(schema, bad.as_object()).unwrap_err();
        assert!(message.contains("'answer' should be string"));
        assert!(message.contains("'score' should be number"));
        assert!(message.contains("missing field 'tags'"));

        assert!(check_schema(schema, None).is_err());
    }

    #[tokio::test]
    async fn test_structured_reply_with_tools() {
        let model = Arc::new(ScriptedModel::new(
            r#"{"answer": "look it up", "toolIntents": [{"tool": "web_search", "args": {"query": "rust"}}]}"#,
        ));
        let services = services_with(model.clone(), Arc::new(InMemoryIndex::new()));
        let node = reasoning(json!({"style": "fast", "allowTools": true, "prompt": "Plan for: {{input}}"}));

        let outcome = run_node(&ReasoningExecutor, &node, &text_input("learn rust"), &services).await;
        let content = outcome.output.content_value();
        assert_eq!(content["answer"], "look it up");
        assert_eq!(content["toolIntents"][0]["tool"], "web_search");

        let call = &model.calls()[0];
        assert_eq!(call.prompt, "Plan for: learn rust");
        assert_eq!(call.options.temperature, 0.2);
        assert_eq!(call.options.max_tokens, 512);
    }

    #[tokio::test]
    async fn test_tool_intents_hidden_unless_allowed() {
        let model = Arc::new(ScriptedModel::new(r#"{"answer": "a", "toolIntents": [{"tool": "x"}]}"#));
        let services = services_with(model, Arc::new(InMemoryIndex::new()));

        let outcome = run_node(&ReasoningExecutor, &reasoning(json!({})), &text_input("q"), &services).await;
        assert!(outcome.output.content_value().get("toolIntents").is_none());
        assert_eq!(outcome.output.meta()["toolIntentsDropped"], true);
    }

    #[tokio::test]
    async fn test_non_json_degrades_to_text_answer() {
        let services = services_with(Arc::new(ScriptedModel::new("  plain words  ")), Arc::new(InMemoryIndex::new()));
        let node = reasoning(json!({"schema": {"answer": "string"}}));

        let outcome = run_node(&ReasoningExecutor, &node, &text_input("q"), &services).await;
        assert!(!outcome.output.is_error());
        let content = outcome.output.content_value();
        assert_eq!(content["answer"], "plain words");
        assert_eq!(content["structured"], Value::Null);
        assert_eq!(outcome.output.meta()["schemaValid"], false);
    }

    #[tokio::test]
    async fn test_model_failure_is_error_value() {
        let services = services_with(Arc::new(ScriptedModel::failing("offline")), Arc::new(InMemoryIndex::new()));
        let outcome = run_node(&ReasoningExecutor, &reasoning(json!({})), &text_input("q"), &services).await;
        assert!(outcome.output.is_error());
        assert!(outcome.output.as_text().contains("offline"));
    }

    #[tokio::test]
    async fn test_upstream_error_propagates_without_model_call() {
        let model = Arc::new(ScriptedModel::new("{}"));
        let services = services_with(model.clone(), Arc::new(InMemoryIndex::new()));
        let mut inputs = NodeInputs::new();
        inputs.push("in", FlowIO::error("retrieval exploded"));

        let outcome = run_node(&ReasoningExecutor, &reasoning(json!({})), &inputs, &services).await;
        assert!(outcome.output.is_error());
        assert_eq!(model.call_count(), 0);
    }
}
