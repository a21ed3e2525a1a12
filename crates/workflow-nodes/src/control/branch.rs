//! Branch Executor
//!
//! Decides between the `true` and `false` output ports, either by
//! evaluating a restricted expression over the node's inputs or by asking a
//! model to judge a short natural-language rule. Only the selected port's
//! edges fire; the runner prunes the other side.

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{
    ExecutorRegistration, FlowContextBag, FlowIO, ModelOptions, NodeContext, NodeDescriptor, NodeExecutor,
    NodeInputs, NodeKind, NodeOutcome, Result, FALSE_LABEL, TRUE_LABEL,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::expression::Expression;

/// Sampling temperature for rule judgements
const RULE_TEMPERATURE: f32 = 0.0;
/// Token budget for rule judgements
const RULE_MAX_TOKENS: u32 = 16;

/// How the decision was made
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BranchMode {
    Expression,
    Rule,
}

/// Branch executor
///
/// # Config
/// - `expression` - Boolean expression over the inputs (takes precedence)
/// - `rule` - Natural-language rule judged by the model
/// - `model` (optional) - Model for rule judgements
///
/// # Inputs
/// - `in` - Value to route
///
/// # Outputs
/// - `true` / `false` - The input value, on the selected port only
///
/// Expressions see every input port by id, `input` (the primary input),
/// `inputs` (all ports), `context` (upstream node outputs by node id), and
/// the fields of a json object input at top level. Any failure selects
/// `false` and is recorded in `meta.error`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BranchExecutor;

impl BranchExecutor {
    /// Port ID for the routed input
    pub const PORT_INPUT: &'static str = "in";

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::for_kind(
            NodeKind::Branch,
            "Branch",
            "Route to the true or false output by expression or model-judged rule",
        )
    }

    fn scope(inputs: &NodeInputs, flow_context: &FlowContextBag) -> Value {
        let mut scope = Map::new();
        let primary = inputs.primary_or(Self::PORT_INPUT);

        if let Some(FlowIO::Json {
            content: Value::Object(fields),
            ..
        }) = primary
        {
            scope.extend(fields.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        for (port, io) in inputs.iter() {
            scope.insert(port.clone(), io.content_value());
        }

        let context: Map<String, Value> = flow_context
            .iter()
            .map(|(node_id, entry)| {
                (
                    node_id.clone(),
                    json!({
                        "type": entry.output.type_name(),
                        "output": entry.output.content_value(),
                        "config": entry.config,
                    }),
                )
            })
            .collect();

        scope.insert("input".into(), primary.map_or(Value::Null, FlowIO::content_value));
        scope.insert("inputs".into(), inputs.to_content_map());
        scope.insert("context".into(), Value::Object(context));
        Value::Object(scope)
    }

    async fn judge_rule(ctx: &NodeContext<'_>, rule: &str, inputs: &NodeInputs) -> (bool, Map<String, Value>) {
        let mut meta = Map::new();
        let prompt = format!(
            "Decide whether the rule below holds for the input. Answer with exactly one word: true or false.\n\nRule: {}\n\nInput:\n{}",
            rule,
            inputs.combined_text()
        );
        let options = ModelOptions {
            model: ctx.node.config_str("model").map(str::to_string),
            system: Some("You are a strict classifier. Reply only with true or false.".into()),
            temperature: RULE_TEMPERATURE,
            max_tokens: RULE_MAX_TOKENS,
            seed: ctx.node.config.get("seed").and_then(Value::as_u64),
        };

        match ctx.call_model(&prompt, &options).await {
            Ok(response) => {
                meta.insert("modelResponse".into(), json!(response.text));
                match match_decision(&response.text) {
                    Some(decision) => (decision, meta),
                    None => {
                        log::debug!(
                            "BranchExecutor {}: ambiguous model answer {:?}, defaulting to false",
                            ctx.node.id,
                            response.text
                        );
                        meta.insert("ambiguous".into(), Value::Bool(true));
                        (false, meta)
                    }
                }
            }
            Err(e) => {
                log::warn!("BranchExecutor {}: rule judgement failed: {}", ctx.node.id, e);
                meta.insert("error".into(), json!(e.to_string()));
                (false, meta)
            }
        }
    }
}

/// Read an unambiguous true/false answer out of free text
///
/// Returns `None` when neither word appears or both do.
pub fn match_decision(text: &str) -> Option<bool> {
    let mut saw_true = false;
    let mut saw_false = false;
    for word in text.split(|c: char| !c.is_alphanumeric()) {
        match word.to_lowercase().as_str() {
            "true" => saw_true = true,
            "false" => saw_false = true,
            _ => {}
        }
    }
    match (saw_true, saw_false) {
        (true, false) => Some(true),
        (false, true) => Some(false),
        _ => None,
    }
}

#[async_trait]
impl NodeExecutor for BranchExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>, inputs: &NodeInputs) -> Result<NodeOutcome> {
        let (mode, decision, mut meta) = if let Some(source) = ctx.node.config_str("expression") {
            let mut meta = Map::new();
            meta.insert("expression".into(), json!(source));
            let result = Expression::parse(source)
                .and_then(|expr| expr.evaluate_bool(&Self::scope(inputs, ctx.flow_context)));
            let decision = match result {
                Ok(decision) => decision,
                Err(e) => {
                    log::warn!("BranchExecutor {}: expression failed: {}", ctx.node.id, e);
                    meta.insert("error".into(), json!(e.to_string()));
                    false
                }
            };
            (Some(BranchMode::Expression), decision, meta)
        } else if let Some(rule) = ctx.node.config_str("rule") {
            let (decision, mut meta) = Self::judge_rule(ctx, rule, inputs).await;
            meta.insert("rule".into(), json!(rule));
            (Some(BranchMode::Rule), decision, meta)
        } else {
            let mut meta = Map::new();
            meta.insert(
                "error".into(),
                json!("branch node needs an 'expression' or a 'rule' in its config"),
            );
            (None, false, meta)
        };

        let label = if decision { TRUE_LABEL } else { FALSE_LABEL };
        let port = ctx
            .node
            .output_port_by_label(label)
            .map_or_else(|| label.to_string(), |p| p.id.clone());

        log::debug!(
            "BranchExecutor {}: decision {} ({:?}), following port '{}'",
            ctx.node.id,
            decision,
            mode,
            port
        );

        let mut output = inputs
            .primary_or(Self::PORT_INPUT)
            .cloned()
            .unwrap_or_else(|| FlowIO::json(Value::Null));
        output.meta_mut().clear();
        meta.insert("decision".into(), Value::Bool(decision));
        if let Some(mode) = mode {
            meta.insert("mode".into(), json!(mode));
        }
        output.meta_mut().extend(meta);

        Ok(NodeOutcome::route(output, port))
    }
}

inventory::submit!(ExecutorRegistration {
    kind: NodeKind::Branch,
    subtype: None,
    descriptor: BranchExecutor::descriptor,
    executor: || Arc::new(BranchExecutor),
});
