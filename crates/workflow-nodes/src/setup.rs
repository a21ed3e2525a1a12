//! Service setup for host applications.
//!
//! Hosts that do not bring their own retrieval index or tool backend call
//! [`simulated_services`] to get the in-memory index and the tool simulator
//! wired to their model client, and [`builtin_registry`] for the dispatch
//! table. Referencing this crate through either function also guarantees
//! its executor registrations are linked in.
//!
//! # Example
//!
//! ```ignore
//! let config = EngineConfig::from_file("engine.json").await?;
//! let index = Arc::new(InMemoryIndex::with_hashed_embeddings(DEFAULT_HASHED_DIMENSIONS));
//! let services = workflow_nodes::simulated_services(Arc::new(OllamaModelClient::new()), index, &config);
//! let runner = WorkflowRunner::new(graph, Arc::new(workflow_nodes::builtin_registry()), services)
//!     .with_config(config);
//! ```

use std::sync::Arc;

use node_engine::{EngineConfig, ModelClient, NodeRegistry, RetrievalIndex, Services};

use crate::tool::ToolSimulator;

/// Dispatch table with every built-in executor
pub fn builtin_registry() -> NodeRegistry {
    let registry = NodeRegistry::with_builtins();
    log::debug!("Built-in registry has {} executors", registry.len());
    registry
}

/// Services backed by the tool simulator
pub fn simulated_services(
    model: Arc<dyn ModelClient>,
    index: Arc<dyn RetrievalIndex>,
    config: &EngineConfig,
) -> Services {
    log::info!(
        "Using simulated tools (real latency: {})",
        config.simulator.real_latency
    );
    Services::new(model, index, Arc::new(ToolSimulator::new(config.simulator.clone())))
}
