//! Executor registry for `(kind, subtype)` dispatch
//!
//! This module maps node kinds (optionally refined by a subtype) to
//! executors and descriptors. Adding a node type means registering one
//! entry, not editing a central match.
//!
//! # Usage
//!
//! ```ignore
//! use node_engine::{NodeRegistry, NodeKind};
//!
//! // Everything submitted via `inventory` at link time
//! let mut registry = NodeRegistry::with_builtins();
//!
//! // Host-specific override for one subtype
//! registry.register_fn(descriptor, |_node, _inputs| Ok(NodeOutcome::all(FlowIO::text("hi"))));
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::descriptor::NodeDescriptor;
use crate::error::{NodeEngineError, Result};
use crate::flow_io::{FlowIO, NodeInputs};
use crate::services::NodeContext;
use crate::types::{GraphNode, NodeKind, PortId};

/// What an executor hands back to the runner
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    /// The node's output value
    pub output: FlowIO,
    /// Output ports whose edges should fire; `None` means all of them
    pub selected_ports: Option<Vec<PortId>>,
}

impl NodeOutcome {
    /// Every output port is selected
    pub fn all(output: FlowIO) -> Self {
        Self {
            output,
            selected_ports: None,
        }
    }

    /// Only `port` is selected; edges from other ports are blocked
    pub fn route(output: FlowIO, port: impl Into<PortId>) -> Self {
        Self {
            output,
            selected_ports: Some(vec![port.into()]),
        }
    }

    /// Whether edges leaving `port` should carry the output
    pub fn is_selected(&self, port: &str) -> bool {
        self.selected_ports
            .as_ref()
            .map_or(true, |ports| ports.iter().any(|p| p == port))
    }
}

/// Per-kind executor
///
/// Executors own nothing: the result is a function of the node, its
/// merged inputs and the injected services. Service failures should be
/// folded into the returned value; an `Err` is converted by the runner
/// into an `error` value.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(&self, ctx: &NodeContext<'_>, inputs: &NodeInputs) -> Result<NodeOutcome>;
}

/// Link-time registration of a built-in executor
///
/// # Example
///
/// ```ignore
/// inventory::submit!(node_engine::ExecutorRegistration {
///     kind: NodeKind::Tool,
///     subtype: None,
///     descriptor: ToolExecutor::descriptor,
///     executor: || Arc::new(ToolExecutor),
/// });
/// ```
pub struct ExecutorRegistration {
    pub kind: NodeKind,
    pub subtype: Option<&'static str>,
    pub descriptor: fn() -> NodeDescriptor,
    pub executor: fn() -> Arc<dyn NodeExecutor>,
}

inventory::collect!(ExecutorRegistration);

type DispatchKey = (NodeKind, Option<String>);

struct RegistryEntry {
    descriptor: NodeDescriptor,
    executor: Arc<dyn NodeExecutor>,
}

/// Dispatch table of executors
///
/// # Composability
///
/// Registries can be composed by merging:
/// ```ignore
/// let mut registry = NodeRegistry::with_builtins();
/// registry.merge(plugin_registry); // plugin entries win
/// ```
pub struct NodeRegistry {
    entries: HashMap<DispatchKey, RegistryEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Registry containing every executor submitted via `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<ExecutorRegistration> {
            let descriptor = (registration.descriptor)();
            log::debug!(
                "Registering built-in executor {} ({:?})",
                registration.kind,
                registration.subtype
            );
            registry.insert(
                (registration.kind, registration.subtype.map(str::to_string)),
                descriptor,
                (registration.executor)(),
            );
        }
        registry
    }

    /// Register an executor under its descriptor's kind and subtype
    pub fn register(&mut self, descriptor: NodeDescriptor, executor: Arc<dyn NodeExecutor>) {
        let key = (descriptor.kind, descriptor.subtype.clone());
        self.insert(key, descriptor, executor);
    }

    /// Register a synchronous closure as an executor
    pub fn register_fn<F>(&mut self, descriptor: NodeDescriptor, callback: F)
    where
        F: Fn(&GraphNode, &NodeInputs) -> Result<NodeOutcome> + Send + Sync + 'static,
    {
        self.register(descriptor, Arc::new(SyncCallbackNodeExecutor::new(callback)));
    }

    fn insert(&mut self, key: DispatchKey, descriptor: NodeDescriptor, executor: Arc<dyn NodeExecutor>) {
        self.entries.insert(key, RegistryEntry { descriptor, executor });
    }

    /// Executor for a node: exact `(kind, subtype)` first, then `(kind, None)`
    pub fn resolve(&self, node: &GraphNode) -> Result<Arc<dyn NodeExecutor>> {
        self.lookup(node.kind, node.subtype.as_deref())
            .map(|entry| entry.executor.clone())
            .ok_or_else(|| NodeEngineError::MissingExecutor {
                kind: node.kind.to_string(),
                subtype: node.subtype.clone().unwrap_or_else(|| "none".to_string()),
            })
    }

    /// Descriptor for a `(kind, subtype)` pair, with the same fallback
    pub fn descriptor(&self, kind: NodeKind, subtype: Option<&str>) -> Option<&NodeDescriptor> {
        self.lookup(kind, subtype).map(|entry| &entry.descriptor)
    }

    fn lookup(&self, kind: NodeKind, subtype: Option<&str>) -> Option<&RegistryEntry> {
        subtype
            .and_then(|s| self.entries.get(&(kind, Some(s.to_string()))))
            .or_else(|| self.entries.get(&(kind, None)))
    }

    /// Check whether a node could be dispatched
    pub fn has_executor(&self, kind: NodeKind, subtype: Option<&str>) -> bool {
        self.lookup(kind, subtype).is_some()
    }

    /// All registered descriptors, sorted by kind then subtype
    pub fn all_descriptors(&self) -> Vec<&NodeDescriptor> {
        let mut all: Vec<&NodeDescriptor> = self.entries.values().map(|e| &e.descriptor).collect();
        all.sort_by(|a, b| (a.kind, &a.subtype).cmp(&(b.kind, &b.subtype)));
        all
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` with the same key.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Synchronous callback-based NodeExecutor
///
/// Wraps a synchronous closure for hosts that don't need services.
pub struct SyncCallbackNodeExecutor {
    callback: Box<dyn Fn(&GraphNode, &NodeInputs) -> Result<NodeOutcome> + Send + Sync>,
}

impl SyncCallbackNodeExecutor {
    pub fn new(callback: impl Fn(&GraphNode, &NodeInputs) -> Result<NodeOutcome> + Send + Sync + 'static) -> Self {
        Self {
            callback: Box::new(callback),
        }
    }
}

#[async_trait]
impl NodeExecutor for SyncCallbackNodeExecutor {
    async fn execute(&self, ctx: &NodeContext<'_>, inputs: &NodeInputs) -> Result<NodeOutcome> {
        (self.callback)(ctx.node, inputs)
    }
}
