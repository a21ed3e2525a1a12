//! Error types for the node engine

use thiserror::Error;

use crate::validation::ValidationReport;

/// Result type alias using NodeEngineError
pub type Result<T> = std::result::Result<T, NodeEngineError>;

/// Errors that can occur in the node engine
#[derive(Debug, Error)]
pub enum NodeEngineError {
    /// The graph failed structural validation; nothing was executed
    #[error("Graph validation failed: {}", .0.summary())]
    Validation(ValidationReport),

    /// A node referenced by the caller does not exist
    #[error("Unknown node: {0}")]
    UnknownNode(String),

    /// No executor is registered for a node's kind/subtype
    #[error("No executor registered for kind '{kind}' (subtype: {subtype})")]
    MissingExecutor { kind: String, subtype: String },

    /// The runner was driven from a state that does not allow the request
    #[error("Invalid runner state: {0}")]
    InvalidState(String),

    /// Node execution failed
    #[error("Node execution failed: {0}")]
    ExecutionFailed(String),

    /// A model/service call failed
    #[error("Service error: {0}")]
    Service(String),

    /// Retrieval/embedding failure
    #[error("Retrieval error: {0}")]
    Retrieval(String),

    /// An imported document is malformed or fails its schema
    #[error("Import error: {0}")]
    Import(String),

    /// Invalid engine configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeEngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create a service error with a message
    pub fn service(msg: impl Into<String>) -> Self {
        Self::Service(msg.into())
    }
}
