//! Ollama model client
//!
//! Implements the model-invocation capability against an Ollama-compatible
//! `/api/generate` endpoint (non-streaming).

use async_trait::async_trait;
use node_engine::{ModelClient, ModelOptions, ModelResponse, NodeEngineError, Result};
use serde::{Deserialize, Serialize};

/// Default Ollama server address
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Response structure from Ollama API
#[derive(Debug, Serialize, Deserialize)]
struct OllamaResponse {
    model: String,
    response: String,
    done: bool,
    #[serde(default)]
    context: Vec<i64>,
}

/// HTTP model client for an Ollama server
///
/// The model comes from the per-call options when set, else from the
/// client's default model.
#[derive(Debug, Clone)]
pub struct OllamaModelClient {
    client: reqwest::Client,
    /// Base URL of the Ollama server (default: http://localhost:11434)
    base_url: String,
    default_model: Option<String>,
}

impl OllamaModelClient {
    /// Client for the default local server
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL)
    }

    /// Create with a custom base URL
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            default_model: None,
        }
    }

    /// Model used when a call does not name one
    pub fn with_default_model(mut self, model: impl Into<String>) -> Self {
        self.default_model = Some(model.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request_body(&self, prompt: &str, options: &ModelOptions) -> Result<serde_json::Value> {
        let model = options
            .model
            .as_ref()
            .or(self.default_model.as_ref())
            .ok_or_else(|| NodeEngineError::service("No model specified for Ollama request"))?;

        let mut request_body = serde_json::json!({
            "model": model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "temperature": options.temperature,
                "num_predict": options.max_tokens,
            }
        });

        if let Some(sys) = &options.system {
            request_body["system"] = serde_json::json!(sys);
        }
        if let Some(seed) = options.seed {
            request_body["options"]["seed"] = serde_json::json!(seed);
        }
        Ok(request_body)
    }
}

impl Default for OllamaModelClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelClient for OllamaModelClient {
    async fn call(&self, prompt: &str, options: &ModelOptions) -> Result<ModelResponse> {
        let request_body = self.request_body(prompt, options)?;
        let url = format!("{}/api/generate", self.base_url);

        log::debug!("OllamaModelClient: sending request to {} with model {}", url, request_body["model"]);

        let http_response = self
            .client
            .post(&url)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                NodeEngineError::service(format!(
                    "Failed to connect to Ollama server at {}: {}. Is Ollama running?",
                    self.base_url, e
                ))
            })?;

        if !http_response.status().is_success() {
            let status = http_response.status();
            let error_body = http_response.text().await.unwrap_or_default();
            return Err(NodeEngineError::service(format!(
                "Ollama API error ({}): {}",
                status, error_body
            )));
        }

        let raw: serde_json::Value = http_response
            .json()
            .await
            .map_err(|e| NodeEngineError::service(format!("Failed to parse Ollama response: {}", e)))?;
        let response_data: OllamaResponse = serde_json::from_value(raw.clone())
            .map_err(|e| NodeEngineError::service(format!("Unexpected Ollama response shape: {}", e)))?;

        log::debug!(
            "OllamaModelClient: completed with {} chars response using model '{}' (done: {})",
            response_data.response.len(),
            response_data.model,
            response_data.done
        );

        Ok(ModelResponse {
            text: response_data.response,
            raw,
        })
    }
}
