//! Scripted model
//!
//! A deterministic stand-in for a real model: replies are chosen by
//! substring rules over the prompt, and every call is recorded so tests
//! can inspect what executors sent.

use std::sync::Mutex;

use async_trait::async_trait;
use node_engine::{ModelClient, ModelOptions, ModelResponse, NodeEngineError, Result};

/// A prompt/options pair the model received
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub prompt: String,
    pub options: ModelOptions,
}

#[derive(Debug, Clone)]
enum Reply {
    Text(String),
    Fail(String),
}

/// Mock model client with rule-based replies
///
/// Rules are checked in insertion order; the first whose needle occurs in
/// the prompt wins. Without a match the default reply is used.
#[derive(Debug)]
pub struct ScriptedModel {
    rules: Vec<(String, Reply)>,
    default_reply: Reply,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedModel {
    /// Model that answers every prompt with `reply`
    pub fn new(reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: Reply::Text(reply.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Model whose every call fails
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: Reply::Fail(message.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Reply with `reply` when the prompt contains `needle`
    pub fn reply_when(mut self, needle: impl Into<String>, reply: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Text(reply.into())));
        self
    }

    /// Fail with `message` when the prompt contains `needle`
    pub fn fail_when(mut self, needle: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((needle.into(), Reply::Fail(message.into())));
        self
    }

    /// Every call received so far, in order
    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[async_trait]
impl ModelClient for ScriptedModel {
    async fn call(&self, prompt: &str, options: &ModelOptions) -> Result<ModelResponse> {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(RecordedCall {
                prompt: prompt.to_string(),
                options: options.clone(),
            });

        let reply = self
            .rules
            .iter()
            .find(|(needle, _)| prompt.contains(needle.as_str()))
            .map(|(_, reply)| reply)
            .unwrap_or(&self.default_reply);

        match reply {
            Reply::Text(text) => Ok(ModelResponse::new(text.clone())),
            Reply::Fail(message) => Err(NodeEngineError::service(message.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_rules_in_order() {
        let model = ScriptedModel::new("default")
            .reply_when("weather", "sunny")
            .fail_when("explode", "kaboom");

        let options = ModelOptions::default();
        assert_eq!(model.call("what is the weather", &options).await.unwrap().text, "sunny");
        assert_eq!(model.call("hello", &options).await.unwrap().text, "default");
        assert!(model.call("please explode", &options).await.is_err());
        assert_eq!(model.call_count(), 3);
        assert_eq!(model.calls()[1].prompt, "hello");
    }

    #[tokio::test]
    async fn test_failing_model() {
        let model = ScriptedModel::failing("offline");
        let result = model.call("anything", &ModelOptions::default()).await;
        assert!(matches!(result, Err(NodeEngineError::Service(msg)) if msg == "offline"));
    }
}
