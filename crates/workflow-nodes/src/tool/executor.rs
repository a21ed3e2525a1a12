//! Tool Executor
//!
//! Builds a tool invocation from the node config and its inputs, checks the
//! arguments, and forwards the call to the injected tool backend.

use std::sync::Arc;

use async_trait::async_trait;
use node_engine::{
    ExecutorRegistration, FlowIO, NodeContext, NodeDescriptor, NodeExecutor, NodeInputs, NodeKind, NodeOutcome,
    Result, ToolErrorMode, ToolInvocationRequest,
};
use serde_json::{json, Map, Value};

/// Tool executor
///
/// # Config
/// - `toolName` (required) - Tool to call
/// - `operation` (optional) - Tool operation
/// - `args` (optional) - Base arguments
/// - `preset`, `seed`, `latencyMs`, `errorMode` (optional) - Simulator controls
///
/// # Inputs
/// - `in` - A json object whose fields fill arguments the config leaves unset
///
/// # Outputs
/// - `out` - The tool result, or an error value when the call failed
///
/// Argument problems are recorded in `meta.validationErrors`; they never
/// stop the call.
#[derive(Debug, Clone, Copy, Default)]
pub struct ToolExecutor;

impl ToolExecutor {
    /// Port ID for argument input
    pub const PORT_INPUT: &'static str = "in";
    /// Port ID for the tool result
    pub const PORT_OUTPUT: &'static str = "out";

    pub fn descriptor() -> NodeDescriptor {
        NodeDescriptor::for_kind(NodeKind::Tool, "Tool", "Invoke a tool through the tool backend")
    }

    fn build_request(config: &Value, inputs: &NodeInputs) -> std::result::Result<ToolInvocationRequest, String> {
        let tool_name = config
            .get("toolName")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .ok_or_else(|| "tool node requires a 'toolName' in its config".to_string())?;

        let mut args: Map<String, Value> = config
            .get("args")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        if let Some(FlowIO::Json {
            content: Value::Object(fields),
            ..
        }) = inputs.primary_or(Self::PORT_INPUT)
        {
            for (key, value) in fields {
                args.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let error_mode = match config.get("errorMode") {
            Some(mode) => serde_json::from_value::<ToolErrorMode>(mode.clone())
                .map_err(|e| format!("invalid errorMode {}: {}", mode, e))?,
            None => ToolErrorMode::None,
        };

        Ok(ToolInvocationRequest {
            tool_name: tool_name.to_string(),
            operation: config.get("operation").and_then(Value::as_str).map(str::to_string),
            args: Value::Object(args),
            preset: config.get("preset").and_then(Value::as_str).map(str::to_string),
            seed: config.get("seed").and_then(Value::as_u64),
            latency_ms: config.get("latencyMs").and_then(Value::as_u64),
            error_mode,
        })
    }
}

#[async_trait]
impl NodeExecutor for ToolExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>, inputs: &NodeInputs) -> Result<NodeOutcome> {
        if let Some(failure) = crate::upstream_failure(&ctx.node.id, inputs) {
            return Ok(NodeOutcome::all(failure));
        }

        let request = match Self::build_request(&ctx.node.config, inputs) {
            Ok(request) => request,
            Err(message) => return Ok(NodeOutcome::all(FlowIO::error(message))),
        };

        let tools = &ctx.services.tools;
        let validation_errors = tools.validate_args(&request.tool_name, request.operation.as_deref(), &request.args);
        if !validation_errors.is_empty() {
            log::warn!(
                "ToolExecutor {}: arguments for '{}' failed validation: {}",
                ctx.node.id,
                request.tool_name,
                validation_errors.join("; ")
            );
        }

        log::debug!(
            "ToolExecutor {}: invoking '{}' (operation: {:?}, error mode: {})",
            ctx.node.id,
            request.tool_name,
            request.operation,
            request.error_mode.as_str()
        );
        let result = tools.invoke(&request).await;

        let mut output = match (result.success, result.result) {
            (true, Some(value)) => FlowIO::json(value),
            (true, None) => FlowIO::json(Value::Null),
            (false, _) => FlowIO::error(result.error.unwrap_or_else(|| "tool call failed".to_string())),
        };
        let meta = output.meta_mut();
        meta.insert("toolName".into(), json!(request.tool_name));
        meta.insert("success".into(), json!(result.success));
        meta.insert("latencyMs".into(), json!(result.latency_ms));
        if let Some(preset) = result.used_preset {
            meta.insert("usedPreset".into(), json!(preset));
        }
        if !validation_errors.is_empty() {
            meta.insert("validationErrors".into(), json!(validation_errors));
        }

        Ok(NodeOutcome::all(output))
    }
}

inventory::submit!(ExecutorRegistration {
    kind: NodeKind::Tool,
    subtype: None,
    descriptor: ToolExecutor::descriptor,
    executor: || Arc::new(ToolExecutor),
});
