//! Workflow Nodes
//!
//! Built-in executors for the node engine plus the collaborators they need
//! when no host-supplied services are available.
//!
//! # Categories
//!
//! - **Storage**: retrieval over an in-memory vector index
//! - **Processing**: reasoning and formatting through a model
//! - **Control**: branch decisions (expression sandbox or model rule)
//! - **Tool**: tool calls against the deterministic simulator
//! - **Providers**: model clients (HTTP and scripted)
//!
//! Every executor registers itself in the dispatch table at link time, so
//! `NodeRegistry::with_builtins()` finds all five as soon as this crate is
//! linked. [`builtin_registry`] is a convenience that guarantees that.

pub mod control;
pub mod processing;
pub mod providers;
pub mod setup;
pub mod storage;
pub mod tool;

pub use control::*;
pub use processing::*;
pub use providers::*;
pub use setup::{builtin_registry, simulated_services};
pub use storage::*;
pub use tool::*;

use node_engine::{FlowIO, NodeInputs};

/// Error value for a node whose inputs include an `error` envelope
///
/// Executors that cannot do anything useful with a failed upstream value
/// call this first and pass the failure along. A value that only records
/// `meta.error` (a branch fallback, an empty formatter reply) is still
/// usable input and does not count.
pub(crate) fn upstream_failure(node_id: &str, inputs: &NodeInputs) -> Option<FlowIO> {
    let errors: Vec<String> = inputs
        .iter()
        .filter(|(_, io)| io.is_error())
        .map(|(_, io)| io.as_text())
        .collect();
    if errors.is_empty() {
        return None;
    }
    log::debug!("Node '{}' received {} upstream error(s)", node_id, errors.len());
    Some(
        FlowIO::error(format!("upstream error: {}", errors.join("; ")))
            .with_meta("upstream", serde_json::Value::Bool(true)),
    )
}

/// First 8 bytes of the BLAKE3 digest; stable across platforms and releases
pub(crate) fn stable_hash(bytes: &[u8]) -> u64 {
    let digest = blake3::hash(bytes);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest.as_bytes()[..8]);
    u64::from_le_bytes(head)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use node_engine::{
        EventSink, FlowContextBag, GraphNode, ModelClient, NodeContext, NodeExecutor, NodeInputs, NodeOutcome,
        NullEventSink, RetrievalIndex, Services,
    };

    use crate::tool::ToolSimulator;

    pub fn services_with(model: Arc<dyn ModelClient>, index: Arc<dyn RetrievalIndex>) -> Services {
        Services::new(model, index, Arc::new(ToolSimulator::without_latency()))
    }

    pub async fn run_node(
        executor: &dyn NodeExecutor,
        node: &GraphNode,
        inputs: &NodeInputs,
        services: &Services,
    ) -> NodeOutcome {
        run_node_with(executor, node, inputs, services, &FlowContextBag::new(), &NullEventSink).await
    }

    pub async fn run_node_with(
        executor: &dyn NodeExecutor,
        node: &GraphNode,
        inputs: &NodeInputs,
        services: &Services,
        flow_context: &FlowContextBag,
        events: &dyn EventSink,
    ) -> NodeOutcome {
        let ctx = NodeContext {
            node,
            execution_id: "test-run",
            services,
            flow_context,
            events,
        };
        executor.execute(&ctx, inputs).await.unwrap()
    }
}
