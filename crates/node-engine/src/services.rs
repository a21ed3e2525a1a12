//! Injected service boundary
//!
//! Executors never reach for globals. Everything they call out to (the
//! model, the retrieval index, the tool backend) comes from a [`Services`]
//! value handed to the runner at construction, so every dependency can be
//! swapped for a mock in tests.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::context::FlowContextBag;
use crate::error::Result;
use crate::events::{EventSink, WorkflowEvent};
use crate::types::GraphNode;

/// Sampling configuration for a model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for ModelOptions {
    fn default() -> Self {
        Self {
            model: None,
            system: None,
            temperature: 0.7,
            max_tokens: 1024,
            seed: None,
        }
    }
}

/// A model reply
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    /// Generated text
    pub text: String,
    /// Backend-specific raw payload
    #[serde(default)]
    pub raw: Value,
}

impl ModelResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            raw: Value::Null,
        }
    }
}

/// Model-invocation capability supplied by the host
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn call(&self, prompt: &str, options: &ModelOptions) -> Result<ModelResponse>;
}

/// A document the retrieval executor can rank
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexedDocument {
    pub id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Value,
}

/// Retrieval/index capability supplied by the host
#[async_trait]
pub trait RetrievalIndex: Send + Sync {
    /// Embed a query; failures make the retrieval executor fall back to
    /// keyword scoring
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Candidate documents, optionally limited to a collection
    async fn documents(&self, collection: Option<&str>) -> Result<Vec<IndexedDocument>>;
}

/// Canned failure a tool invocation can be forced into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolErrorMode {
    #[default]
    None,
    Timeout,
    RateLimit,
    NotFound,
    AuthError,
    ServerError,
}

impl ToolErrorMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ToolErrorMode::None => "none",
            ToolErrorMode::Timeout => "timeout",
            ToolErrorMode::RateLimit => "rate_limit",
            ToolErrorMode::NotFound => "not_found",
            ToolErrorMode::AuthError => "auth_error",
            ToolErrorMode::ServerError => "server_error",
        }
    }
}

/// A single-shot tool call
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationRequest {
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    #[serde(default)]
    pub args: Value,
    /// Named preset to use instead of argument matching
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preset: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    /// Overrides the preset's simulated latency
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(default)]
    pub error_mode: ToolErrorMode,
}

/// Outcome of a tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub used_preset: Option<String>,
}

/// Tool backend (the simulator, or a live integration)
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    async fn invoke(&self, request: &ToolInvocationRequest) -> ToolInvocationResult;

    /// Human-readable argument problems; empty means valid
    fn validate_args(&self, tool_name: &str, operation: Option<&str>, args: &Value) -> Vec<String>;
}

/// Every external capability an executor may use
#[derive(Clone)]
pub struct Services {
    pub model: Arc<dyn ModelClient>,
    pub retrieval: Arc<dyn RetrievalIndex>,
    pub tools: Arc<dyn ToolInvoker>,
}

impl Services {
    pub fn new(
        model: Arc<dyn ModelClient>,
        retrieval: Arc<dyn RetrievalIndex>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Self {
        Self { model, retrieval, tools }
    }
}

/// What an executor sees while it runs one node
pub struct NodeContext<'a> {
    pub node: &'a GraphNode,
    pub execution_id: &'a str,
    pub services: &'a Services,
    /// Sanitized snapshots of the nodes executed so far
    pub flow_context: &'a FlowContextBag,
    pub events: &'a dyn EventSink,
}

impl<'a> NodeContext<'a> {
    /// Call the model, emitting an `llm_request`/`llm_response` pair
    pub async fn call_model(&self, prompt: &str, options: &ModelOptions) -> Result<ModelResponse> {
        log::debug!(
            "Node '{}' calling model {:?} (temperature {}, max_tokens {})",
            self.node.id,
            options.model,
            options.temperature,
            options.max_tokens
        );
        self.emit(WorkflowEvent::LlmRequest {
            execution_id: self.execution_id.to_string(),
            node_id: self.node.id.clone(),
            prompt: prompt.to_string(),
            model: options.model.clone(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
        });

        let result = self.services.model.call(prompt, options).await;

        let (text, error) = match &result {
            Ok(response) => (Some(response.text.clone()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        self.emit(WorkflowEvent::LlmResponse {
            execution_id: self.execution_id.to_string(),
            node_id: self.node.id.clone(),
            text,
            error,
        });

        result
    }

    /// Send an event, logging (not failing) when the sink is gone
    pub fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.events.send(event) {
            log::warn!("Failed to deliver event for node '{}': {}", self.node.id, e);
        }
    }
}
