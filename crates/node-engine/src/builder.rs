//! Fluent builder for flow graphs
//!
//! Provides a fluent API for constructing graphs programmatically.

use crate::types::{GraphEdge, GraphNode, NodeKind, PortDefinition, TransformSpec, WorkflowGraph};

/// Fluent builder for constructing flow graphs
///
/// # Example
///
/// ```ignore
/// let graph = WorkflowBuilder::new()
///     .add_node("search", NodeKind::Retrieval)
///     .with_config(serde_json::json!({"topK": 3}))
///     .add_node("answer", NodeKind::Formatter)
///     .add_edge("search", "out", "answer", "in")
///     .build();
/// ```
#[derive(Default)]
pub struct WorkflowBuilder {
    nodes: Vec<GraphNode>,
    edges: Vec<GraphEdge>,
    meta: serde_json::Value,
    edge_counter: usize,
}

impl WorkflowBuilder {
    /// Create a new workflow builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with the default port layout of its kind
    pub fn add_node(mut self, id: impl Into<String>, kind: NodeKind) -> Self {
        self.nodes.push(GraphNode::new(id, kind));
        self
    }

    /// Set config on the most recently added node
    ///
    /// Must be called immediately after `add_node`.
    pub fn with_config(mut self, config: serde_json::Value) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.config = config;
        }
        self
    }

    /// Set the subtype on the most recently added node
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.subtype = Some(subtype.into());
        }
        self
    }

    /// Replace the ports of the most recently added node
    pub fn with_ports(mut self, inputs: Vec<PortDefinition>, outputs: Vec<PortDefinition>) -> Self {
        if let Some(node) = self.nodes.last_mut() {
            node.input_ports = inputs;
            node.output_ports = outputs;
        }
        self
    }

    /// Add an edge between two ports (auto-generates edge ID)
    pub fn add_edge(
        mut self,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.edge_counter += 1;
        let id = format!("edge-{}", self.edge_counter);
        self.edges
            .push(GraphEdge::new(id, source, source_port, target, target_port));
        self
    }

    /// Add an edge with an explicit ID
    pub fn add_edge_with_id(
        mut self,
        edge_id: impl Into<String>,
        source: impl Into<String>,
        source_port: impl Into<String>,
        target: impl Into<String>,
        target_port: impl Into<String>,
    ) -> Self {
        self.edges
            .push(GraphEdge::new(edge_id, source, source_port, target, target_port));
        self
    }

    /// Attach a projection to the most recently added edge
    pub fn with_transform(mut self, transform: TransformSpec) -> Self {
        if let Some(edge) = self.edges.last_mut() {
            edge.transform = Some(transform);
        }
        self
    }

    /// Attach a weight to the most recently added edge
    pub fn with_weight(mut self, weight: f64) -> Self {
        if let Some(edge) = self.edges.last_mut() {
            edge.weight = Some(weight);
        }
        self
    }

    /// Set document metadata
    pub fn with_meta(mut self, meta: serde_json::Value) -> Self {
        self.meta = meta;
        self
    }

    /// Build the graph without validation
    pub fn build(self) -> WorkflowGraph {
        WorkflowGraph {
            nodes: self.nodes,
            edges: self.edges,
            meta: self.meta,
        }
    }
}
