//! Core types for flow graphs
//!
//! These types define the structure of flow graphs: nodes, their ports,
//! and the edges (with optional projections) that connect them. They are
//! immutable once a graph has been handed to the runner.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Unique identifier for a port
pub type PortId = String;

/// Label a branch node uses for the port followed when the decision is true
pub const TRUE_LABEL: &str = "true";

/// Label a branch node uses for the port followed when the decision is false
pub const FALSE_LABEL: &str = "false";

/// Value type hint carried by a port
///
/// Only used for validation hints; ports are structurally typed and the
/// runner never rejects a value because of its declared type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortValueType {
    /// Plain text
    #[default]
    Text,
    /// Structured JSON
    Json,
    /// Error message
    Error,
}

/// Definition of a port (input or output)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    /// Unique identifier for this port (unique per node and direction)
    pub id: PortId,
    /// Human-readable label; branch nodes route on `true`/`false` labels
    pub label: String,
    /// Value type hint
    #[serde(default)]
    pub value_type: PortValueType,
}

impl PortDefinition {
    /// Create a port definition
    pub fn new(id: impl Into<String>, label: impl Into<String>, value_type: PortValueType) -> Self {
        Self {
            id: id.into(),
            label: label.into(),
            value_type,
        }
    }

    /// Create a text port whose label equals its id
    pub fn text(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, PortValueType::Text)
    }

    /// Create a JSON port whose label equals its id
    pub fn json(id: impl Into<String>) -> Self {
        let id = id.into();
        Self::new(id.clone(), id, PortValueType::Json)
    }
}

/// The executor family a node belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Ranks documents against a query
    Retrieval,
    /// Sends inputs to a model and parses a structured answer
    Reasoning,
    /// Router with exactly two outputs labelled `true` and `false`
    Branch,
    /// Invokes a (simulated) tool
    Tool,
    /// Renders inputs through a template and a model
    Formatter,
}

impl NodeKind {
    /// Stable snake_case name, matching the serialized form
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Retrieval => "retrieval",
            NodeKind::Reasoning => "reasoning",
            NodeKind::Branch => "branch",
            NodeKind::Tool => "tool",
            NodeKind::Formatter => "formatter",
        }
    }

    /// Default port layout for nodes of this kind
    pub fn default_ports(&self) -> (Vec<PortDefinition>, Vec<PortDefinition>) {
        match self {
            NodeKind::Branch => (
                vec![PortDefinition::json("in")],
                vec![
                    PortDefinition::new(TRUE_LABEL, TRUE_LABEL, PortValueType::Json),
                    PortDefinition::new(FALSE_LABEL, FALSE_LABEL, PortValueType::Json),
                ],
            ),
            NodeKind::Formatter => (
                vec![PortDefinition::text("in")],
                vec![PortDefinition::text("out")],
            ),
            _ => (
                vec![PortDefinition::json("in")],
                vec![PortDefinition::json("out")],
            ),
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-edge projection applied to the producer's output before it reaches
/// the consumer's input map
///
/// Paths are dotted (`a.b.c`). Only `json` values are projected; text and
/// error values pass through untouched. Order of application: pick, drop,
/// rename.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransformSpec {
    /// Keep only these paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pick_paths: Vec<String>,
    /// Remove these paths
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop_paths: Vec<String>,
    /// Move `from` path to `to` path
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub rename: BTreeMap<String, String>,
}

impl TransformSpec {
    /// True when the transform would not change any value
    pub fn is_identity(&self) -> bool {
        self.pick_paths.is_empty() && self.drop_paths.is_empty() && self.rename.is_empty()
    }
}

/// An edge connecting an output port to an input port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source_node: NodeId,
    /// Source output port ID
    pub source_output: PortId,
    /// Target node ID
    pub target_node: NodeId,
    /// Target input port ID
    pub target_input: PortId,
    /// Optional projection of the source value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformSpec>,
    /// Optional weight, surfaced in the target's context metadata
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
}

impl GraphEdge {
    /// Create an edge without transform or weight
    pub fn new(
        id: impl Into<String>,
        source_node: impl Into<String>,
        source_output: impl Into<String>,
        target_node: impl Into<String>,
        target_input: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source_node: source_node.into(),
            source_output: source_output.into(),
            target_node: target_node.into(),
            target_input: target_input.into(),
            transform: None,
            weight: None,
        }
    }
}

/// A node instance in a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    /// Unique identifier for this node instance
    pub id: NodeId,
    /// Executor family
    pub kind: NodeKind,
    /// Optional refinement of the kind, used as a dispatch key
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Node configuration (may contain secrets; redacted before it is shared)
    #[serde(default)]
    pub config: serde_json::Value,
    /// Input ports
    #[serde(default)]
    pub input_ports: Vec<PortDefinition>,
    /// Output ports
    #[serde(default)]
    pub output_ports: Vec<PortDefinition>,
}

impl GraphNode {
    /// Create a node with the default port layout of its kind
    pub fn new(id: impl Into<String>, kind: NodeKind) -> Self {
        let (input_ports, output_ports) = kind.default_ports();
        Self {
            id: id.into(),
            kind,
            subtype: None,
            config: serde_json::Value::Null,
            input_ports,
            output_ports,
        }
    }

    /// Find an input port by id
    pub fn input_port(&self, port_id: &str) -> Option<&PortDefinition> {
        self.input_ports.iter().find(|p| p.id == port_id)
    }

    /// Find an output port by id
    pub fn output_port(&self, port_id: &str) -> Option<&PortDefinition> {
        self.output_ports.iter().find(|p| p.id == port_id)
    }

    /// Find the output port carrying the given label
    pub fn output_port_by_label(&self, label: &str) -> Option<&PortDefinition> {
        self.output_ports.iter().find(|p| p.label == label)
    }

    /// Read a string field from the node config
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// A complete flow graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowGraph {
    /// Nodes in the graph
    pub nodes: Vec<GraphNode>,
    /// Edges connecting nodes
    pub edges: Vec<GraphEdge>,
    /// Free-form document metadata (name, author, ...)
    #[serde(default)]
    pub meta: serde_json::Value,
}

impl WorkflowGraph {
    /// Create a new empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find an edge by ID
    pub fn find_edge(&self, id: &str) -> Option<&GraphEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Get edges coming into a node, in declaration order
    pub fn incoming_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.target_node == node_id)
    }

    /// Get edges going out of a node, in declaration order
    pub fn outgoing_edges<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source_node == node_id)
    }

    /// Get the IDs of nodes that this node depends on (upstream nodes)
    pub fn get_dependencies(&self, node_id: &str) -> Vec<NodeId> {
        self.incoming_edges(node_id)
            .map(|e| e.source_node.clone())
            .collect()
    }

    /// Get the IDs of nodes that depend on this node (downstream nodes)
    pub fn get_dependents(&self, node_id: &str) -> Vec<NodeId> {
        self.outgoing_edges(node_id)
            .map(|e| e.target_node.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_branch_default_ports() {
        let node = GraphNode::new("router", NodeKind::Branch);
        assert_eq!(node.output_ports.len(), 2);
        assert!(node.output_port_by_label("true").is_some());
        assert!(node.output_port_by_label("false").is_some());
        assert_eq!(node.input_ports.len(), 1);
    }

    #[test]
    fn test_graph_edges() {
        let mut graph = WorkflowGraph::new();
        graph.nodes.push(GraphNode::new("node1", NodeKind::Retrieval));
        graph.nodes.push(GraphNode::new("node2", NodeKind::Formatter));
        graph.edges.push(GraphEdge::new("edge1", "node1", "out", "node2", "in"));

        assert_eq!(graph.get_dependencies("node2"), vec!["node1"]);
        assert_eq!(graph.get_dependents("node1"), vec!["node2"]);
        assert!(graph.find_edge("edge1").is_some());
    }

    #[test]
    fn test_node_serialization_shape() {
        let node = GraphNode::new("r1", NodeKind::Retrieval);
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["kind"], "retrieval");
        assert_eq!(json["inputPorts"][0]["valueType"], "json");
        assert!(json.get("subtype").is_none());
    }

    #[test]
    fn test_edge_deserializes_without_optionals() {
        let edge: GraphEdge = serde_json::from_value(serde_json::json!({
            "id": "e1",
            "sourceNode": "a",
            "sourceOutput": "out",
            "targetNode": "b",
            "targetInput": "in"
        }))
        .unwrap();
        assert!(edge.transform.is_none());
        assert!(edge.weight.is_none());
    }
}
