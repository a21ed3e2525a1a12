//! Graph validation for flow graphs
//!
//! Validates graph structure and port contracts before execution.
//! Errors make a graph unrunnable; warnings (cycles, deep chains) are
//! reported but do not block a run.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::types::{NodeKind, WorkflowGraph, FALSE_LABEL, TRUE_LABEL};

/// Default longest-path length above which a chaining warning is emitted
pub const DEFAULT_MAX_CHAIN_DEPTH: usize = 100;

/// Validation error with location context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationError {
    /// Two nodes share an id
    DuplicateNodeId { node_id: String },
    /// A node declares no input ports
    NoInputPorts { node_id: String },
    /// A router node does not expose exactly `true` and `false` outputs
    InvalidRouterPorts {
        node_id: String,
        labels: Vec<String>,
        missing: Vec<String>,
    },
    /// An edge references a non-existent node
    UnknownNode { edge_id: String, node_id: String },
    /// An edge references a port the node does not declare
    UnknownPort {
        edge_id: String,
        node_id: String,
        port_id: String,
        direction: PortDirection,
    },
    /// A cycle was found and the host asked for cycles to be fatal
    CycleDetected { path: Vec<String> },
}

/// Which side of an edge a port reference belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PortDirection {
    Output,
    Input,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DuplicateNodeId { node_id } => write!(f, "Duplicate node id '{}'", node_id),
            Self::NoInputPorts { node_id } => {
                write!(f, "Node '{}' must declare at least one input port", node_id)
            }
            Self::InvalidRouterPorts {
                node_id,
                labels,
                missing,
            } => {
                write!(
                    f,
                    "Router node '{}' must have exactly two output ports labeled 'true' and 'false' (found [{}], missing [{}])",
                    node_id,
                    labels.join(", "),
                    missing.join(", ")
                )
            }
            Self::UnknownNode { edge_id, node_id } => {
                write!(f, "Edge '{}' references unknown node '{}'", edge_id, node_id)
            }
            Self::UnknownPort {
                edge_id,
                node_id,
                port_id,
                direction,
            } => {
                let side = match direction {
                    PortDirection::Output => "output",
                    PortDirection::Input => "input",
                };
                write!(
                    f,
                    "Edge '{}' references unknown {} port '{}' on node '{}'",
                    edge_id, side, port_id, node_id
                )
            }
            Self::CycleDetected { path } => write!(f, "Cycle detected: {}", path.join(" -> ")),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Non-fatal findings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidationWarning {
    /// A cycle exists; a cyclic flow may never finish
    CycleDetected { path: Vec<String> },
    /// The longest dependency chain exceeds the configured depth
    ChainTooDeep { depth: usize, max_depth: usize },
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CycleDetected { path } => write!(f, "Cycle detected: {}", path.join(" -> ")),
            Self::ChainTooDeep { depth, max_depth } => write!(
                f,
                "Longest chain has {} nodes, exceeding the recommended depth of {}",
                depth, max_depth
            ),
        }
    }
}

/// Outcome of validating a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationReport {
    fn from_parts(errors: Vec<ValidationError>, warnings: Vec<ValidationWarning>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// All errors joined into a single line
    pub fn summary(&self) -> String {
        self.errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Validate a flow graph
///
/// Returns all problems found (not just the first). Cycles are warnings.
pub fn validate(graph: &WorkflowGraph) -> ValidationReport {
    validate_with_options(graph, false)
}

/// Validate, optionally promoting cycles to errors
pub fn validate_with_options(graph: &WorkflowGraph, cycles_are_errors: bool) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    validate_nodes(graph, &mut errors);
    validate_edge_references(graph, &mut errors);

    for path in detect_cycles(graph) {
        if cycles_are_errors {
            errors.push(ValidationError::CycleDetected { path });
        } else {
            warnings.push(ValidationWarning::CycleDetected { path });
        }
    }

    ValidationReport::from_parts(errors, warnings)
}

/// Warn when the longest dependency chain is deeper than `max_depth`
///
/// Depth counts nodes on the path. This is a performance signal only.
pub fn validate_chaining(graph: &WorkflowGraph, max_depth: usize) -> ValidationReport {
    let mut warnings = Vec::new();
    let depth = longest_chain(graph);
    if depth > max_depth {
        warnings.push(ValidationWarning::ChainTooDeep { depth, max_depth });
    }
    ValidationReport::from_parts(Vec::new(), warnings)
}

fn validate_nodes(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    let mut seen = HashSet::new();
    for node in &graph.nodes {
        if !seen.insert(node.id.as_str()) {
            errors.push(ValidationError::DuplicateNodeId {
                node_id: node.id.clone(),
            });
        }

        if node.input_ports.is_empty() {
            errors.push(ValidationError::NoInputPorts {
                node_id: node.id.clone(),
            });
        }

        if node.kind == NodeKind::Branch {
            let labels: Vec<String> = node.output_ports.iter().map(|p| p.label.clone()).collect();
            let missing: Vec<String> = [TRUE_LABEL, FALSE_LABEL]
                .iter()
                .filter(|label| !labels.iter().any(|l| l.as_str() == **label))
                .map(|label| label.to_string())
                .collect();
            if labels.len() != 2 || !missing.is_empty() {
                errors.push(ValidationError::InvalidRouterPorts {
                    node_id: node.id.clone(),
                    labels,
                    missing,
                });
            }
        }
    }
}

/// Check that every edge endpoint exists, down to the port
fn validate_edge_references(graph: &WorkflowGraph, errors: &mut Vec<ValidationError>) {
    for edge in &graph.edges {
        match graph.find_node(&edge.source_node) {
            None => errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.source_node.clone(),
            }),
            Some(node) if node.output_port(&edge.source_output).is_none() => {
                errors.push(ValidationError::UnknownPort {
                    edge_id: edge.id.clone(),
                    node_id: node.id.clone(),
                    port_id: edge.source_output.clone(),
                    direction: PortDirection::Output,
                })
            }
            Some(_) => {}
        }

        match graph.find_node(&edge.target_node) {
            None => errors.push(ValidationError::UnknownNode {
                edge_id: edge.id.clone(),
                node_id: edge.target_node.clone(),
            }),
            Some(node) if node.input_port(&edge.target_input).is_none() => {
                errors.push(ValidationError::UnknownPort {
                    edge_id: edge.id.clone(),
                    node_id: node.id.clone(),
                    port_id: edge.target_input.clone(),
                    direction: PortDirection::Input,
                })
            }
            Some(_) => {}
        }
    }
}

fn adjacency(graph: &WorkflowGraph) -> HashMap<&str, Vec<&str>> {
    let mut adj: HashMap<&str, Vec<&str>> = graph
        .nodes
        .iter()
        .map(|n| (n.id.as_str(), Vec::new()))
        .collect();
    for edge in &graph.edges {
        if adj.contains_key(edge.target_node.as_str()) {
            if let Some(targets) = adj.get_mut(edge.source_node.as_str()) {
                targets.push(edge.target_node.as_str());
            }
        }
    }
    adj
}

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    OnStack,
    Done,
}

/// Detect cycles with a DFS and an explicit recursion stack
///
/// Returns one path per back edge found, closing on the repeated node.
fn detect_cycles(graph: &WorkflowGraph) -> Vec<Vec<String>> {
    let adj = adjacency(graph);
    let mut marks: HashMap<&str, Mark> = adj.keys().map(|k| (*k, Mark::Unvisited)).collect();
    let mut cycles = Vec::new();

    for root in graph.nodes.iter().map(|n| n.id.as_str()) {
        if marks.get(root) != Some(&Mark::Unvisited) {
            continue;
        }

        // (node, index of next child to visit)
        let mut stack: Vec<(&str, usize)> = vec![(root, 0)];
        marks.insert(root, Mark::OnStack);

        while let Some((node, next_child)) = stack.last().copied() {
            let children = adj.get(node).map(Vec::as_slice).unwrap_or(&[]);
            if next_child >= children.len() {
                marks.insert(node, Mark::Done);
                stack.pop();
                continue;
            }
            if let Some(top) = stack.last_mut() {
                top.1 += 1;
            }

            let child = children[next_child];
            match marks.get(child).copied().unwrap_or(Mark::Done) {
                Mark::Unvisited => {
                    marks.insert(child, Mark::OnStack);
                    stack.push((child, 0));
                }
                Mark::OnStack => {
                    let start = stack.iter().position(|(n, _)| *n == child).unwrap_or(0);
                    let mut path: Vec<String> = stack[start..].iter().map(|(n, _)| n.to_string()).collect();
                    path.push(child.to_string());
                    cycles.push(path);
                }
                Mark::Done => {}
            }
        }
    }

    cycles
}

/// Longest path length (in nodes) via Kahn's algorithm with distance propagation
///
/// Nodes trapped in cycles never reach in-degree zero and are ignored.
fn longest_chain(graph: &WorkflowGraph) -> usize {
    let adj = adjacency(graph);
    let mut in_degree: HashMap<&str, usize> = adj.keys().map(|k| (*k, 0)).collect();
    for targets in adj.values() {
        for target in targets {
            if let Some(deg) = in_degree.get_mut(*target) {
                *deg += 1;
            }
        }
    }

    let mut distance: HashMap<&str, usize> = HashMap::new();
    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    for id in &queue {
        distance.insert(*id, 1);
    }

    let mut longest = 0;
    while let Some(node) = queue.pop_front() {
        let dist = distance.get(node).copied().unwrap_or(1);
        longest = longest.max(dist);
        for target in adj.get(node).map(Vec::as_slice).unwrap_or(&[]) {
            let entry = distance.entry(*target).or_insert(0);
            *entry = (*entry).max(dist + 1);
            if let Some(deg) = in_degree.get_mut(*target) {
                *deg -= 1;
                if *deg == 0 {
                    queue.push_back(*target);
                }
            }
        }
    }

    longest
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::types::{GraphNode, PortDefinition, PortValueType};

    #[test]
    fn test_valid_graph() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Retrieval)
            .add_node("b", NodeKind::Formatter)
            .add_edge("a", "out", "b", "in")
            .build();

        let report = validate(&graph);
        assert!(report.valid, "Expected no errors, got: {:?}", report.errors);
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_router_with_wrong_labels() {
        let mut router = GraphNode::new("router-1", NodeKind::Branch);
        router.output_ports = vec![
            PortDefinition::new("p1", "yes", PortValueType::Json),
            PortDefinition::new("p2", "no", PortValueType::Json),
        ];
        let mut graph = WorkflowGraph::new();
        graph.nodes.push(router);

        let report = validate(&graph);
        assert!(!report.valid);
        let message = report.errors[0].to_string();
        assert!(message.contains("router-1"));
        assert!(message.contains("'true'"));
        assert!(message.contains("'false'"));
        match &report.errors[0] {
            ValidationError::InvalidRouterPorts { missing, .. } => {
                assert_eq!(missing, &vec!["true".to_string(), "false".to_string()]);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_router_with_three_outputs() {
        let mut router = GraphNode::new("r", NodeKind::Branch);
        router.output_ports.push(PortDefinition::json("maybe"));
        let mut graph = WorkflowGraph::new();
        graph.nodes.push(router);

        let report = validate(&graph);
        assert!(matches!(report.errors[0], ValidationError::InvalidRouterPorts { .. }));
    }

    #[test]
    fn test_node_without_inputs() {
        let mut node = GraphNode::new("src", NodeKind::Tool);
        node.input_ports.clear();
        let mut graph = WorkflowGraph::new();
        graph.nodes.push(node);

        let report = validate(&graph);
        assert_eq!(
            report.errors,
            vec![ValidationError::NoInputPorts {
                node_id: "src".to_string()
            }]
        );
    }

    #[test]
    fn test_sink_without_outputs_is_allowed() {
        let mut node = GraphNode::new("sink", NodeKind::Formatter);
        node.output_ports.clear();
        let mut graph = WorkflowGraph::new();
        graph.nodes.push(node);

        assert!(validate(&graph).valid);
    }

    #[test]
    fn test_edge_references_missing_node_and_port() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Retrieval)
            .add_node("b", NodeKind::Tool)
            .add_edge("a", "out", "missing", "in")
            .add_edge("a", "nope", "b", "in")
            .add_edge("a", "out", "b", "wrong")
            .build();

        let report = validate(&graph);
        assert!(!report.valid);
        assert!(report
            .errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownNode { node_id, .. } if node_id == "missing")));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::UnknownPort { direction: PortDirection::Output, port_id, .. } if port_id == "nope"
        )));
        assert!(report.errors.iter().any(|e| matches!(
            e,
            ValidationError::UnknownPort { direction: PortDirection::Input, port_id, .. } if port_id == "wrong"
        )));
    }

    #[test]
    fn test_cycle_is_warning() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Tool)
            .add_node("b", NodeKind::Tool)
            .add_edge("a", "out", "b", "in")
            .add_edge("b", "out", "a", "in")
            .build();

        let report = validate(&graph);
        assert!(report.valid);
        assert_eq!(report.warnings.len(), 1);
        match &report.warnings[0] {
            ValidationWarning::CycleDetected { path } => {
                assert_eq!(path, &vec!["a".to_string(), "b".to_string(), "a".to_string()]);
            }
            other => panic!("unexpected warning {:?}", other),
        }
    }

    #[test]
    fn test_cycle_can_be_fatal() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Tool)
            .add_edge("a", "out", "a", "in")
            .build();

        let report = validate_with_options(&graph, true);
        assert!(!report.valid);
        assert!(matches!(report.errors[0], ValidationError::CycleDetected { .. }));
    }

    #[test]
    fn test_no_cycle_in_diamond() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Tool)
            .add_node("b", NodeKind::Tool)
            .add_node("c", NodeKind::Tool)
            .add_node("d", NodeKind::Tool)
            .add_edge("a", "out", "b", "in")
            .add_edge("a", "out", "c", "in")
            .add_edge("b", "out", "d", "in")
            .add_edge("c", "out", "d", "in")
            .build();

        assert!(validate(&graph).warnings.is_empty());
    }

    #[test]
    fn test_chaining_depth() {
        let mut builder = WorkflowBuilder::new();
        for i in 0..6 {
            builder = builder.add_node(format!("n{}", i), NodeKind::Tool);
        }
        for i in 0..5 {
            builder = builder.add_edge(format!("n{}", i), "out", format!("n{}", i + 1), "in");
        }
        let graph = builder.build();

        assert!(validate_chaining(&graph, 6).warnings.is_empty());
        let report = validate_chaining(&graph, 4);
        assert!(report.valid);
        assert_eq!(
            report.warnings,
            vec![ValidationWarning::ChainTooDeep { depth: 6, max_depth: 4 }]
        );
    }
}
