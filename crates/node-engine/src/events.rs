//! Event types for streaming flow progress
//!
//! Events are sent from the runner to any consumer (a UI, a logger, a test)
//! to report lifecycle changes, node results and model traffic.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::flow_io::FlowIO;

/// Trait for sending flow events
///
/// This abstracts over the transport mechanism (mpsc channel, in-memory
/// buffer, nothing at all) so the runner can be used in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be sent (e.g., channel closed)
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// Events emitted during flow execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    /// A run started
    #[serde(rename_all = "camelCase")]
    FlowStart {
        execution_id: String,
        start_node: String,
    },

    /// The ready queue drained
    #[serde(rename_all = "camelCase")]
    FlowComplete {
        execution_id: String,
        executed: usize,
        skipped: Vec<String>,
    },

    /// Dequeuing stopped at a node boundary
    #[serde(rename_all = "camelCase")]
    FlowPause {
        execution_id: String,
        pending: Vec<String>,
    },

    /// Dequeuing resumed after a pause
    #[serde(rename_all = "camelCase")]
    FlowResume { execution_id: String },

    /// A node was dequeued and is about to execute
    #[serde(rename_all = "camelCase")]
    NodeStart {
        execution_id: String,
        node_id: String,
        kind: String,
    },

    /// A node produced a value (which may still carry `meta.error`)
    #[serde(rename_all = "camelCase")]
    NodeComplete {
        execution_id: String,
        node_id: String,
        output: FlowIO,
        duration_ms: u64,
    },

    /// A node's executor failed; the failure becomes an `error` value
    #[serde(rename_all = "camelCase")]
    NodeError {
        execution_id: String,
        node_id: String,
        error: String,
    },

    /// An executor is calling the model
    #[serde(rename_all = "camelCase")]
    LlmRequest {
        execution_id: String,
        node_id: String,
        prompt: String,
        model: Option<String>,
        temperature: f32,
        max_tokens: u32,
    },

    /// The model answered (or failed)
    #[serde(rename_all = "camelCase")]
    LlmResponse {
        execution_id: String,
        node_id: String,
        text: Option<String>,
        error: Option<String>,
    },
}

impl WorkflowEvent {
    /// Wire name of the event (`node_start`, `flow_complete`, ...)
    pub fn name(&self) -> &'static str {
        match self {
            WorkflowEvent::FlowStart { .. } => "flow_start",
            WorkflowEvent::FlowComplete { .. } => "flow_complete",
            WorkflowEvent::FlowPause { .. } => "flow_pause",
            WorkflowEvent::FlowResume { .. } => "flow_resume",
            WorkflowEvent::NodeStart { .. } => "node_start",
            WorkflowEvent::NodeComplete { .. } => "node_complete",
            WorkflowEvent::NodeError { .. } => "node_error",
            WorkflowEvent::LlmRequest { .. } => "llm_request",
            WorkflowEvent::LlmResponse { .. } => "llm_response",
        }
    }

    /// Node the event refers to, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            WorkflowEvent::NodeStart { node_id, .. }
            | WorkflowEvent::NodeComplete { node_id, .. }
            | WorkflowEvent::NodeError { node_id, .. }
            | WorkflowEvent::LlmRequest { node_id, .. }
            | WorkflowEvent::LlmResponse { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// A no-op event sink that discards all events
///
/// Useful for testing or when events aren't needed.
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn send(&self, _event: WorkflowEvent) -> Result<(), EventError> {
        Ok(())
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
pub struct VecEventSink {
    events: Mutex<Vec<WorkflowEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<WorkflowEvent> {
        self.events
            .lock()
            .map(|events| events.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }

    /// Names of all collected events, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(WorkflowEvent::name).collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        match self.events.lock() {
            Ok(mut events) => events.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl Default for VecEventSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        match self.events.lock() {
            Ok(mut events) => events.push(event),
            Err(poisoned) => poisoned.into_inner().push(event),
        }
        Ok(())
    }
}

/// Buffered channel sink; the caller drains the paired receiver
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl ChannelEventSink {
    /// Create a sink and the receiver that drains it
    pub fn new() -> (Self, mpsc::UnboundedReceiver<WorkflowEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl EventSink for ChannelEventSink {
    fn send(&self, event: WorkflowEvent) -> Result<(), EventError> {
        self.sender.send(event).map_err(|_| EventError::channel_closed())
    }
}
