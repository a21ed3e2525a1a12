//! Per-node execution records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::context::{diff, ContextDiff, FlowContextBag};
use crate::flow_io::FlowIO;
use crate::types::NodeId;

/// Lifecycle of one node execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Queued,
    Running,
    Success,
    Error,
}

/// Record of one node's execution within a run
///
/// Created in `Running` state when the node is dequeued and finalized once
/// its executor returns. Finalization consumes the record, so a finished
/// artifact cannot be changed afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionArtifact {
    pub node_id: NodeId,
    /// Position in execution order, starting at 0
    pub sequence: usize,
    pub status: ArtifactStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<FlowIO>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub flow_context_before: FlowContextBag,
    pub flow_context_after: FlowContextBag,
    pub flow_context_diff: ContextDiff,
}

impl ExecutionArtifact {
    /// Open a record for a node that is starting now
    pub fn begin(node_id: impl Into<NodeId>, sequence: usize, before: FlowContextBag) -> Self {
        Self {
            node_id: node_id.into(),
            sequence,
            status: ArtifactStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            output: None,
            error: None,
            flow_context_after: before.clone(),
            flow_context_before: before,
            flow_context_diff: ContextDiff::default(),
        }
    }

    /// Close the record with the node's output and the resulting bag
    ///
    /// An `error`-typed output marks the artifact as failed; a value that
    /// only carries `meta.error` still counts as a success.
    pub fn finalize(mut self, output: FlowIO, after: FlowContextBag) -> Self {
        self.status = if output.is_error() {
            ArtifactStatus::Error
        } else {
            ArtifactStatus::Success
        };
        self.error = output.is_error().then(|| output.as_text());
        self.ended_at = Some(Utc::now());
        self.flow_context_diff = diff(&self.flow_context_before, &after);
        self.flow_context_after = after;
        self.output = Some(output);
        self
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, ArtifactStatus::Success | ArtifactStatus::Error)
    }

    /// Wall-clock duration, once finished
    pub fn duration_ms(&self) -> Option<u64> {
        self.ended_at
            .map(|end| (end - self.started_at).num_milliseconds().max(0) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{ContextConfig, FlowContextStore};
    use crate::types::{GraphNode, NodeKind};

    #[test]
    fn test_finalize_success() {
        let mut store = FlowContextStore::new(&ContextConfig::default());
        let node = GraphNode::new("r1", NodeKind::Retrieval);

        let artifact = ExecutionArtifact::begin("r1", 0, store.entries().clone());
        assert_eq!(artifact.status, ArtifactStatus::Running);
        assert!(!artifact.is_finished());

        let output = FlowIO::json(serde_json::json!({"results": []}));
        store.record(&node, &output, None);
        let artifact = artifact.finalize(output, store.entries().clone());

        assert_eq!(artifact.status, ArtifactStatus::Success);
        assert!(artifact.error.is_none());
        assert_eq!(artifact.flow_context_diff.added, vec!["r1"]);
        assert!(artifact.flow_context_before.is_empty());
        assert!(artifact.duration_ms().is_some());
    }

    #[test]
    fn test_finalize_error() {
        let artifact = ExecutionArtifact::begin("t1", 3, FlowContextBag::new())
            .finalize(FlowIO::error("tool exploded"), FlowContextBag::new());
        assert_eq!(artifact.status, ArtifactStatus::Error);
        assert_eq!(artifact.error.as_deref(), Some("tool exploded"));
        assert_eq!(artifact.sequence, 3);
    }
}
