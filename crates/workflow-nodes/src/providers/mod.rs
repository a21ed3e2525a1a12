//! Model providers
//!
//! Implementations of the model-invocation capability: an HTTP client for
//! Ollama-compatible servers and a scripted mock for tests and offline runs.

mod ollama;
mod scripted;

pub use ollama::{OllamaModelClient, DEFAULT_OLLAMA_URL};
pub use scripted::{RecordedCall, ScriptedModel};
