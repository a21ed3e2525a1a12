//! Node descriptors
//!
//! Every executor describes the node it implements: kind, optional subtype,
//! a label and its default ports. Hosts use descriptors to build palettes and
//! to create correctly-shaped nodes without hardcoding port layouts.

use serde::{Deserialize, Serialize};

use crate::types::{GraphNode, NodeKind, PortDefinition};

/// Static metadata for one `(kind, subtype)` dispatch entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeDescriptor {
    /// Executor family
    pub kind: NodeKind,
    /// Optional subtype refinement
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subtype: Option<String>,
    /// Human-readable label
    pub label: String,
    /// What the node does
    pub description: String,
    /// Default input ports
    pub inputs: Vec<PortDefinition>,
    /// Default output ports
    pub outputs: Vec<PortDefinition>,
}

impl NodeDescriptor {
    /// Descriptor using the kind's default port layout
    pub fn for_kind(kind: NodeKind, label: impl Into<String>, description: impl Into<String>) -> Self {
        let (inputs, outputs) = kind.default_ports();
        Self {
            kind,
            subtype: None,
            label: label.into(),
            description: description.into(),
            inputs,
            outputs,
        }
    }

    /// Narrow this descriptor to a subtype
    pub fn with_subtype(mut self, subtype: impl Into<String>) -> Self {
        self.subtype = Some(subtype.into());
        self
    }

    /// Instantiate a node with this descriptor's ports
    pub fn instantiate(&self, id: impl Into<String>, config: serde_json::Value) -> GraphNode {
        GraphNode {
            id: id.into(),
            kind: self.kind,
            subtype: self.subtype.clone(),
            config,
            input_ports: self.inputs.clone(),
            output_ports: self.outputs.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_serialization() {
        let descriptor = NodeDescriptor::for_kind(NodeKind::Branch, "Branch", "Routes on a decision");
        let json = serde_json::to_value(&descriptor).unwrap();
        assert_eq!(json["kind"], "branch");
        assert_eq!(json["outputs"].as_array().unwrap().len(), 2);
        assert!(json.get("subtype").is_none());
    }

    #[test]
    fn test_instantiate_copies_ports() {
        let descriptor = NodeDescriptor::for_kind(NodeKind::Tool, "Search", "Web search").with_subtype("search");
        let node = descriptor.instantiate("t1", serde_json::json!({"toolName": "web_search"}));
        assert_eq!(node.subtype.as_deref(), Some("search"));
        assert_eq!(node.input_ports, descriptor.inputs);
        assert_eq!(node.config_str("toolName"), Some("web_search"));
    }
}
