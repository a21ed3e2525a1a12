//! Node Engine - DAG runtime for agent/LLM flows
//!
//! This crate executes graphs of typed nodes (retrieval, reasoning, branch,
//! tool, formatter) in dependency order. It provides:
//!
//! - Structural validation before anything runs
//! - Port-keyed input merging with per-edge projections
//! - A redacted, size-bounded context bag shared with downstream nodes
//! - Branch pruning: only the selected output of a router fires
//! - Pause / step / reset controls and a typed event stream
//! - A small assertion language for checking captured outputs
//!
//! # Architecture
//!
//! - `WorkflowRunner`: ready-queue walk, dispatch, artifacts, events
//! - `NodeRegistry`: `(kind, subtype)` dispatch table, filled at link time
//!   via `inventory` by executor crates such as `workflow-nodes`
//! - `Services`: the injected model, retrieval and tool capabilities
//! - `FlowContextStore`: sanitized per-node snapshots and diffs
//!
//! # Example
//!
//! ```ignore
//! use node_engine::{FlowIO, NodeKind, NodeRegistry, WorkflowBuilder, WorkflowRunner};
//!
//! let graph = WorkflowBuilder::new()
//!     .add_node("search", NodeKind::Retrieval)
//!     .add_node("answer", NodeKind::Formatter)
//!     .add_edge("search", "out", "answer", "in")
//!     .build();
//!
//! let mut runner = WorkflowRunner::new(graph, Arc::new(NodeRegistry::with_builtins()), services);
//! let report = runner.execute("search", FlowIO::text("what is rust?")).await?;
//! ```

pub mod artifact;
pub mod assertions;
pub mod builder;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod events;
pub mod export;
pub mod flow_io;
pub mod registry;
pub mod runner;
pub mod services;
pub mod types;
pub mod validation;

// Re-export key types
pub use artifact::{ArtifactStatus, ExecutionArtifact};
pub use assertions::{evaluate, Assertion, AssertionOp, AssertionReport, AssertionResult, EdgeLink};
pub use builder::WorkflowBuilder;
pub use config::{EngineConfig, SimulatorSettings};
pub use context::{ContextConfig, ContextDiff, FlowContextBag, FlowContextEntry, FlowContextStore};
pub use descriptor::NodeDescriptor;
pub use error::{NodeEngineError, Result};
pub use events::{ChannelEventSink, EventSink, NullEventSink, VecEventSink, WorkflowEvent};
pub use export::{export_graph, export_json, import_document, import_json, GraphDocument};
pub use flow_io::{FlowIO, NodeInputs};
pub use registry::{ExecutorRegistration, NodeExecutor, NodeOutcome, NodeRegistry, SyncCallbackNodeExecutor};
pub use runner::{PauseHandle, RunReport, RunState, WorkflowRunner};
pub use services::{
    IndexedDocument, ModelClient, ModelOptions, ModelResponse, NodeContext, RetrievalIndex, Services, ToolErrorMode,
    ToolInvocationRequest, ToolInvocationResult, ToolInvoker,
};
pub use types::{
    EdgeId, GraphEdge, GraphNode, NodeId, NodeKind, PortDefinition, PortId, PortValueType, TransformSpec,
    WorkflowGraph, FALSE_LABEL, TRUE_LABEL,
};
pub use validation::{validate, validate_chaining, ValidationError, ValidationReport, ValidationWarning};

// Re-exported so executor crates can register without naming the dependency
pub use inventory;
