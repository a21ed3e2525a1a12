//! Workflow runner
//!
//! Walks a validated graph from a start node. A node is dispatched once
//! every counted inbound edge has either delivered a value or been blocked
//! by an upstream branch decision, and at least one delivered a value.
//! Nodes whose inbound edges are all blocked are pruned, and they block
//! their own outgoing edges in turn.
//!
//! Only edges whose source is reachable from the start node are counted, so
//! inputs that can never fire do not stall the walk. Nodes on a cycle wait
//! on their own back edge and are therefore never dispatched; they show up
//! as skipped instead of hanging the run.
//!
//! # State machine
//!
//! ```text
//! idle -> running -> (paused <-> running) -> completed
//!    \-> error (validation failed)
//! ```

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::artifact::ExecutionArtifact;
use crate::assertions::EdgeLink;
use crate::config::EngineConfig;
use crate::context::{FlowContextBag, FlowContextStore};
use crate::error::{NodeEngineError, Result};
use crate::events::{EventSink, NullEventSink, WorkflowEvent};
use crate::flow_io::{FlowIO, NodeInputs};
use crate::registry::{NodeOutcome, NodeRegistry};
use crate::services::{NodeContext, Services};
use crate::types::{EdgeId, GraphNode, NodeId, NodeKind, WorkflowGraph, FALSE_LABEL};
use crate::validation::{validate_chaining, validate_with_options, ValidationWarning};

/// Lifecycle of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Running,
    Paused,
    Completed,
    Error,
}

/// Shared pause flag, checked between node boundaries
///
/// Clone it into another task to pause a run that is being driven
/// elsewhere. An in-flight node always finishes first.
#[derive(Debug, Clone, Default)]
pub struct PauseHandle(Arc<AtomicBool>);

impl PauseHandle {
    pub fn pause(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_paused(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn clear(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

#[derive(Debug, Clone)]
enum EdgeState {
    Pending,
    Resolved(FlowIO),
    Blocked,
}

/// Everything a finished (or paused) run produced
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub execution_id: String,
    pub state: RunState,
    pub artifacts: Vec<ExecutionArtifact>,
    pub context: FlowContextBag,
    pub outputs: BTreeMap<NodeId, FlowIO>,
    /// Nodes that were never dispatched
    pub skipped: Vec<NodeId>,
    /// Edges that never carried a value
    pub blocked_edges: Vec<EdgeId>,
    pub warnings: Vec<ValidationWarning>,
    edges: Vec<EdgeLink>,
}

impl RunReport {
    /// Outputs keyed by node id, in the shape assertions walk
    ///
    /// Each node maps to `{type, output, meta}` plus `error` when the value
    /// carries a failure in its envelope or in `meta.error`.
    pub fn node_outputs(&self) -> serde_json::Value {
        let bag = self
            .outputs
            .iter()
            .map(|(node_id, io)| {
                let mut entry = serde_json::Map::new();
                entry.insert("type".into(), io.type_name().into());
                entry.insert("output".into(), io.content_value());
                entry.insert("meta".into(), serde_json::Value::Object(io.meta().clone()));
                if let Some(error) = io.error_message() {
                    entry.insert("error".into(), error.into());
                }
                (node_id.clone(), serde_json::Value::Object(entry))
            })
            .collect();
        serde_json::Value::Object(bag)
    }

    /// Graph edges with a flag for the ones that never fired
    pub fn edge_links(&self) -> &[EdgeLink] {
        &self.edges
    }

    /// Artifact for a node, if it executed
    pub fn artifact(&self, node_id: &str) -> Option<&ExecutionArtifact> {
        self.artifacts.iter().find(|a| a.node_id == node_id)
    }

    /// Executed node ids, in execution order
    pub fn executed(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.node_id.as_str()).collect()
    }
}

/// Drives one flow graph at a time
pub struct WorkflowRunner {
    graph: Arc<WorkflowGraph>,
    registry: Arc<NodeRegistry>,
    services: Services,
    config: EngineConfig,
    events: Arc<dyn EventSink>,
    pause: PauseHandle,

    state: RunState,
    execution_id: String,
    start_node: Option<NodeId>,
    initial_input: Option<FlowIO>,
    queue: VecDeque<NodeId>,
    edge_states: HashMap<EdgeId, EdgeState>,
    scheduled: HashSet<NodeId>,
    pruned: HashSet<NodeId>,
    store: FlowContextStore,
    artifacts: Vec<ExecutionArtifact>,
    outputs: BTreeMap<NodeId, FlowIO>,
    warnings: Vec<ValidationWarning>,
}

impl WorkflowRunner {
    /// Create a runner with default configuration and no event subscriber
    pub fn new(graph: WorkflowGraph, registry: Arc<NodeRegistry>, services: Services) -> Self {
        let config = EngineConfig::default();
        Self {
            graph: Arc::new(graph),
            registry,
            services,
            store: FlowContextStore::new(&config.context),
            config,
            events: Arc::new(NullEventSink),
            pause: PauseHandle::default(),
            state: RunState::Idle,
            execution_id: String::new(),
            start_node: None,
            initial_input: None,
            queue: VecDeque::new(),
            edge_states: HashMap::new(),
            scheduled: HashSet::new(),
            pruned: HashSet::new(),
            artifacts: Vec::new(),
            outputs: BTreeMap::new(),
            warnings: Vec::new(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.store = FlowContextStore::new(&config.context);
        self.config = config;
        self
    }

    pub fn with_event_sink(mut self, events: Arc<dyn EventSink>) -> Self {
        self.events = events;
        self
    }

    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn artifacts(&self) -> &[ExecutionArtifact] {
        &self.artifacts
    }

    pub fn context(&self) -> &FlowContextStore {
        &self.store
    }

    pub fn outputs(&self) -> &BTreeMap<NodeId, FlowIO> {
        &self.outputs
    }

    /// Nodes waiting in the ready queue
    pub fn pending(&self) -> Vec<NodeId> {
        self.queue.iter().cloned().collect()
    }

    /// Handle that pauses this runner from anywhere
    pub fn pause_handle(&self) -> PauseHandle {
        self.pause.clone()
    }

    /// Stop dequeuing once the current node finishes
    pub fn pause(&self) {
        self.pause.pause();
    }

    /// Validate the graph and seed the ready queue with `start_node`
    pub fn start(&mut self, start_node: &str, input: FlowIO) -> Result<()> {
        if self.state != RunState::Idle {
            return Err(NodeEngineError::InvalidState(format!(
                "cannot start a run from state {:?}; call reset first",
                self.state
            )));
        }

        let mut report = validate_with_options(&self.graph, self.config.cycles_are_errors);
        if !report.valid {
            log::warn!("Refusing to run invalid graph: {}", report.summary());
            self.state = RunState::Error;
            return Err(NodeEngineError::Validation(report));
        }
        report
            .warnings
            .extend(validate_chaining(&self.graph, self.config.max_chain_depth).warnings);
        for warning in &report.warnings {
            log::warn!("Graph warning: {}", warning);
        }

        if self.graph.find_node(start_node).is_none() {
            return Err(NodeEngineError::UnknownNode(start_node.to_string()));
        }

        self.execution_id = uuid::Uuid::new_v4().to_string();
        self.warnings = report.warnings;
        self.start_node = Some(start_node.to_string());
        self.initial_input = Some(input);

        let reachable = reachable_from(&self.graph, start_node);
        self.edge_states = self
            .graph
            .edges
            .iter()
            .filter(|e| reachable.contains(e.source_node.as_str()))
            .map(|e| (e.id.clone(), EdgeState::Pending))
            .collect();

        self.queue.push_back(start_node.to_string());
        self.scheduled.insert(start_node.to_string());
        self.state = RunState::Running;

        log::info!(
            "Starting run {} at '{}' ({} nodes, {} reachable)",
            self.execution_id,
            start_node,
            self.graph.nodes.len(),
            reachable.len()
        );
        self.emit(WorkflowEvent::FlowStart {
            execution_id: self.execution_id.clone(),
            start_node: start_node.to_string(),
        });
        Ok(())
    }

    /// Dequeue until the queue drains or a pause is requested
    pub async fn run(&mut self) -> Result<RunState> {
        match self.state {
            RunState::Running => {}
            RunState::Paused | RunState::Completed => return Ok(self.state),
            other => {
                return Err(NodeEngineError::InvalidState(format!(
                    "cannot run from state {:?}",
                    other
                )))
            }
        }

        while let Some(node_id) = self.queue.front().cloned() {
            if self.pause.is_paused() {
                self.state = RunState::Paused;
                log::info!("Run {} paused before '{}'", self.execution_id, node_id);
                self.emit(WorkflowEvent::FlowPause {
                    execution_id: self.execution_id.clone(),
                    pending: self.pending(),
                });
                return Ok(self.state);
            }
            self.queue.pop_front();
            self.process_node(&node_id).await?;
        }

        self.finish();
        Ok(self.state)
    }

    /// Resume a paused run
    pub async fn resume(&mut self) -> Result<RunState> {
        if self.state != RunState::Paused {
            return Err(NodeEngineError::InvalidState(format!(
                "cannot resume from state {:?}",
                self.state
            )));
        }
        self.pause.clear();
        self.state = RunState::Running;
        self.emit(WorkflowEvent::FlowResume {
            execution_id: self.execution_id.clone(),
        });
        self.run().await
    }

    /// Execute exactly one queued node while paused
    ///
    /// Returns the id of the node that ran, or `None` when the queue was
    /// already empty (the run is then completed).
    pub async fn step(&mut self) -> Result<Option<NodeId>> {
        if !matches!(self.state, RunState::Paused | RunState::Running) {
            return Err(NodeEngineError::InvalidState(format!(
                "cannot step from state {:?}",
                self.state
            )));
        }

        let Some(node_id) = self.queue.pop_front() else {
            self.finish();
            return Ok(None);
        };
        self.process_node(&node_id).await?;
        if self.queue.is_empty() {
            self.finish();
        }
        Ok(Some(node_id))
    }

    /// Drop all run state and return to `Idle`
    pub fn reset(&mut self) {
        log::debug!("Resetting runner (run {})", self.execution_id);
        self.pause.clear();
        self.state = RunState::Idle;
        self.execution_id.clear();
        self.start_node = None;
        self.initial_input = None;
        self.queue.clear();
        self.edge_states.clear();
        self.scheduled.clear();
        self.pruned.clear();
        self.store.clear();
        self.artifacts.clear();
        self.outputs.clear();
        self.warnings.clear();
    }

    /// Start and run to completion (or until paused)
    pub async fn execute(&mut self, start_node: &str, input: FlowIO) -> Result<RunReport> {
        self.start(start_node, input)?;
        self.run().await?;
        Ok(self.report())
    }

    /// Snapshot of everything produced so far
    pub fn report(&self) -> RunReport {
        let skipped = self
            .graph
            .nodes
            .iter()
            .filter(|n| !self.outputs.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect();

        let edges: Vec<EdgeLink> = self
            .graph
            .edges
            .iter()
            .map(|e| EdgeLink {
                source: e.source_node.clone(),
                target: e.target_node.clone(),
                blocked: !matches!(self.edge_states.get(&e.id), Some(EdgeState::Resolved(_))),
            })
            .collect();

        let blocked_edges = self
            .graph
            .edges
            .iter()
            .filter(|e| !matches!(self.edge_states.get(&e.id), Some(EdgeState::Resolved(_))))
            .map(|e| e.id.clone())
            .collect();

        RunReport {
            execution_id: self.execution_id.clone(),
            state: self.state,
            artifacts: self.artifacts.clone(),
            context: self.store.entries().clone(),
            outputs: self.outputs.clone(),
            skipped,
            blocked_edges,
            warnings: self.warnings.clone(),
            edges,
        }
    }

    async fn process_node(&mut self, node_id: &str) -> Result<()> {
        let graph = self.graph.clone();
        let node = graph
            .find_node(node_id)
            .ok_or_else(|| NodeEngineError::UnknownNode(node_id.to_string()))?;

        let (inputs, weight) = self.collect_inputs(node);
        log::debug!("Dispatching '{}' ({}) with {} input port(s)", node.id, node.kind, inputs.len());

        self.emit(WorkflowEvent::NodeStart {
            execution_id: self.execution_id.clone(),
            node_id: node.id.clone(),
            kind: node.kind.to_string(),
        });
        let artifact = ExecutionArtifact::begin(node.id.clone(), self.artifacts.len(), self.store.entries().clone());
        let started = Instant::now();

        let outcome = match self.dispatch(node, &inputs).await {
            Ok(outcome) => outcome,
            Err(e) => {
                log::warn!("Node '{}' failed: {}", node.id, e);
                failure_outcome(node, e.to_string())
            }
        };

        let output = outcome.output.clone();
        if let Some(error) = output.is_error().then(|| output.as_text()) {
            self.emit(WorkflowEvent::NodeError {
                execution_id: self.execution_id.clone(),
                node_id: node.id.clone(),
                error,
            });
        } else {
            self.emit(WorkflowEvent::NodeComplete {
                execution_id: self.execution_id.clone(),
                node_id: node.id.clone(),
                output: output.clone(),
                duration_ms: started.elapsed().as_millis() as u64,
            });
        }

        self.store.record(node, &output, weight);
        self.artifacts
            .push(artifact.finalize(output.clone(), self.store.entries().clone()));
        self.outputs.insert(node.id.clone(), output.clone());

        self.propagate(node, &outcome);
        Ok(())
    }

    async fn dispatch(&self, node: &GraphNode, inputs: &NodeInputs) -> Result<NodeOutcome> {
        let executor = self.registry.resolve(node)?;
        let ctx = NodeContext {
            node,
            execution_id: &self.execution_id,
            services: &self.services,
            flow_context: self.store.entries(),
            events: self.events.as_ref(),
        };
        executor.execute(&ctx, inputs).await
    }

    /// Merge resolved inbound values per port; also returns the largest
    /// inbound edge weight
    fn collect_inputs(&mut self, node: &GraphNode) -> (NodeInputs, Option<f64>) {
        let mut inputs = NodeInputs::new();
        let mut weight: Option<f64> = None;

        if self.start_node.as_deref() == Some(node.id.as_str()) {
            if let (Some(input), Some(port)) = (self.initial_input.take(), node.input_ports.first()) {
                inputs.push(port.id.clone(), input);
            }
        }

        for edge in self.graph.incoming_edges(&node.id) {
            if let Some(EdgeState::Resolved(value)) = self.edge_states.get(&edge.id) {
                let value = match &edge.transform {
                    Some(transform) => value.clone().apply_transform(transform),
                    None => value.clone(),
                };
                inputs.push(edge.target_input.clone(), value);
                if let Some(w) = edge.weight {
                    weight = Some(weight.map_or(w, |current| current.max(w)));
                }
            }
        }

        (inputs, weight)
    }

    /// Resolve or block outgoing edges, then schedule or prune targets
    fn propagate(&mut self, node: &GraphNode, outcome: &NodeOutcome) {
        let mut touched = Vec::new();
        for edge in self.graph.outgoing_edges(&node.id) {
            if let Some(state) = self.edge_states.get_mut(&edge.id) {
                *state = if outcome.is_selected(&edge.source_output) {
                    EdgeState::Resolved(outcome.output.clone())
                } else {
                    log::debug!("Edge '{}' not selected by '{}'", edge.id, node.id);
                    EdgeState::Blocked
                };
                touched.push(edge.target_node.clone());
            }
        }

        let mut worklist: VecDeque<NodeId> = touched.into();
        while let Some(target) = worklist.pop_front() {
            if self.scheduled.contains(&target) || self.pruned.contains(&target) {
                continue;
            }

            let mut pending = false;
            let mut resolved = false;
            for edge in self.graph.incoming_edges(&target) {
                match self.edge_states.get(&edge.id) {
                    Some(EdgeState::Pending) => pending = true,
                    Some(EdgeState::Resolved(_)) => resolved = true,
                    Some(EdgeState::Blocked) | None => {}
                }
            }

            if pending {
                continue;
            }
            if resolved {
                log::debug!("'{}' is ready", target);
                self.scheduled.insert(target.clone());
                self.queue.push_back(target);
            } else {
                log::info!("Pruning '{}': every inbound edge was blocked", target);
                self.pruned.insert(target.clone());
                for edge in self.graph.outgoing_edges(&target) {
                    if let Some(state) = self.edge_states.get_mut(&edge.id) {
                        *state = EdgeState::Blocked;
                        worklist.push_back(edge.target_node.clone());
                    }
                }
            }
        }
    }

    fn finish(&mut self) {
        self.state = RunState::Completed;
        let skipped: Vec<NodeId> = self
            .graph
            .nodes
            .iter()
            .filter(|n| !self.outputs.contains_key(&n.id))
            .map(|n| n.id.clone())
            .collect();
        log::info!(
            "Run {} completed: {} executed, {} skipped",
            self.execution_id,
            self.artifacts.len(),
            skipped.len()
        );
        self.emit(WorkflowEvent::FlowComplete {
            execution_id: self.execution_id.clone(),
            executed: self.artifacts.len(),
            skipped,
        });
    }

    fn emit(&self, event: WorkflowEvent) {
        if let Err(e) = self.events.send(event) {
            log::warn!("Failed to deliver event for run {}: {}", self.execution_id, e);
        }
    }
}

/// An executor failure becomes an `error` value; a failed branch follows
/// its `false` port
fn failure_outcome(node: &GraphNode, message: String) -> NodeOutcome {
    let output = FlowIO::error(message);
    match node.kind {
        NodeKind::Branch => match node.output_port_by_label(FALSE_LABEL) {
            Some(port) => NodeOutcome::route(output, port.id.clone()),
            None => NodeOutcome::all(output),
        },
        _ => NodeOutcome::all(output),
    }
}

fn reachable_from<'a>(graph: &'a WorkflowGraph, start: &'a str) -> HashSet<&'a str> {
    let mut seen = HashSet::new();
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        if !seen.insert(id) {
            continue;
        }
        for edge in graph.outgoing_edges(id) {
            queue.push_back(edge.target_node.as_str());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::WorkflowBuilder;
    use crate::descriptor::NodeDescriptor;
    use crate::events::VecEventSink;
    use crate::services::{
        IndexedDocument, ModelClient, ModelOptions, ModelResponse, RetrievalIndex, ToolInvocationRequest,
        ToolInvocationResult, ToolInvoker,
    };
    use crate::types::{TransformSpec, TRUE_LABEL};
    use async_trait::async_trait;
    use serde_json::json;

    struct NoServices;

    #[async_trait]
    impl ModelClient for NoServices {
        async fn call(&self, _prompt: &str, _options: &ModelOptions) -> Result<ModelResponse> {
            Err(NodeEngineError::service("no model"))
        }
    }

    #[async_trait]
    impl RetrievalIndex for NoServices {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(NodeEngineError::Retrieval("no index".into()))
        }
        async fn documents(&self, _collection: Option<&str>) -> Result<Vec<IndexedDocument>> {
            Ok(Vec::new())
        }
    }

    #[async_trait]
    impl ToolInvoker for NoServices {
        async fn invoke(&self, _request: &ToolInvocationRequest) -> ToolInvocationResult {
            ToolInvocationResult {
                success: false,
                result: None,
                error: Some("no tools".into()),
                latency_ms: 0,
                used_preset: None,
            }
        }
        fn validate_args(&self, _tool: &str, _op: Option<&str>, _args: &serde_json::Value) -> Vec<String> {
            Vec::new()
        }
    }

    fn services() -> Services {
        let s = Arc::new(NoServices);
        Services::new(s.clone(), s.clone(), s)
    }

    /// Echo executors for every kind; branch routes on `input.decision`
    fn registry() -> NodeRegistry {
        let mut registry = NodeRegistry::new();
        for kind in [NodeKind::Retrieval, NodeKind::Reasoning, NodeKind::Tool, NodeKind::Formatter] {
            registry.register_fn(NodeDescriptor::for_kind(kind, kind.as_str(), "echo"), |node, inputs| {
                let mut content = inputs.to_content_map();
                content["by"] = json!(node.id);
                Ok(NodeOutcome::all(FlowIO::json(content)))
            });
        }
        registry.register_fn(
            NodeDescriptor::for_kind(NodeKind::Branch, "branch", "routes"),
            |node, inputs| {
                let decision = inputs
                    .get("in")
                    .map(|io| io.content_value())
                    .and_then(|v| {
                        v.get("decision")
                            .or_else(|| v.pointer("/in/decision"))
                            .and_then(|d| d.as_bool())
                    })
                    .unwrap_or(false);
                let label = if decision { TRUE_LABEL } else { FALSE_LABEL };
                let port = node.output_port_by_label(label).map(|p| p.id.clone()).unwrap_or_default();
                Ok(NodeOutcome::route(FlowIO::json(json!({"decision": decision})), port))
            },
        );
        registry
    }

    fn runner(graph: WorkflowGraph) -> WorkflowRunner {
        WorkflowRunner::new(graph, Arc::new(registry()), services())
    }

    fn diamond_with_branch() -> WorkflowGraph {
        // start -> router -(true)-> yes -> join
        //                 \-(false)-> no -> only_no
        // start ------------------------------> join
        WorkflowBuilder::new()
            .add_node("start", NodeKind::Retrieval)
            .add_node("router", NodeKind::Branch)
            .add_node("yes", NodeKind::Tool)
            .add_node("no", NodeKind::Tool)
            .add_node("only_no", NodeKind::Formatter)
            .add_node("join", NodeKind::Reasoning)
            .add_edge("start", "out", "router", "in")
            .add_edge("router", "true", "yes", "in")
            .add_edge("router", "false", "no", "in")
            .add_edge("no", "out", "only_no", "in")
            .add_edge("yes", "out", "join", "in")
            .add_edge("start", "out", "join", "in")
            .build()
    }

    #[tokio::test]
    async fn test_branch_prunes_unselected_subgraph() {
        let mut runner = runner(diamond_with_branch());
        let report = runner
            .execute("start", FlowIO::json(json!({"decision": true})))
            .await
            .unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.executed(), vec!["start", "router", "yes", "join"]);
        assert!(report.artifact("no").is_none());
        assert!(report.artifact("only_no").is_none());
        assert_eq!(report.skipped, vec!["no", "only_no"]);
        assert_eq!(report.blocked_edges, vec!["edge-3", "edge-4"]);
    }

    #[tokio::test]
    async fn test_join_waits_for_all_inputs_and_merges() {
        let mut runner = runner(diamond_with_branch());
        let report = runner
            .execute("start", FlowIO::json(json!({"decision": true})))
            .await
            .unwrap();

        // join received both the start output and the yes output on `in`
        let join = report.outputs["join"].content_value();
        assert_eq!(join["in"]["by"], "start");
    }

    #[tokio::test]
    async fn test_transform_and_weight_reach_target() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Retrieval)
            .add_node("b", NodeKind::Reasoning)
            .add_edge("a", "out", "b", "in")
            .with_weight(0.75)
            .with_transform(TransformSpec {
                drop_paths: vec!["in".into()],
                ..Default::default()
            })
            .build();

        let mut runner = runner(graph);
        let report = runner.execute("a", FlowIO::text("hello")).await.unwrap();

        assert_eq!(report.outputs["b"].content_value(), json!({"in": {"by": "a"}, "by": "b"}));
        assert_eq!(report.context["b"].metadata.weight, Some(0.75));
    }

    #[tokio::test]
    async fn test_missing_executor_becomes_error_value() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Retrieval)
            .add_node("b", NodeKind::Tool)
            .add_node("c", NodeKind::Formatter)
            .add_edge("a", "out", "b", "in")
            .add_edge("b", "out", "c", "in")
            .build();

        let mut registry = NodeRegistry::new();
        registry.register_fn(
            NodeDescriptor::for_kind(NodeKind::Retrieval, "r", "r"),
            |_, _| Ok(NodeOutcome::all(FlowIO::text("ok"))),
        );
        registry.register_fn(
            NodeDescriptor::for_kind(NodeKind::Formatter, "f", "f"),
            |_, inputs| Ok(NodeOutcome::all(FlowIO::text(format!("saw {} error(s)", inputs.errors().len())))),
        );

        let sink = Arc::new(VecEventSink::new());
        let mut runner = WorkflowRunner::new(graph, Arc::new(registry), services()).with_event_sink(sink.clone());
        let report = runner.execute("a", FlowIO::text("q")).await.unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert!(report.outputs["b"].is_error());
        assert_eq!(report.outputs["c"], FlowIO::text("saw 1 error(s)"));
        assert!(sink.names().contains(&"node_error"));
    }

    #[tokio::test]
    async fn test_invalid_graph_never_starts() {
        let graph = WorkflowBuilder::new()
            .add_node("router", NodeKind::Branch)
            .with_ports(
                vec![crate::types::PortDefinition::json("in")],
                vec![crate::types::PortDefinition::json("yes"), crate::types::PortDefinition::json("no")],
            )
            .build();

        let mut runner = runner(graph);
        let result = runner.execute("router", FlowIO::text("x")).await;
        assert!(matches!(result, Err(NodeEngineError::Validation(_))));
        assert_eq!(runner.state(), RunState::Error);
        assert!(runner.artifacts().is_empty());
    }

    #[tokio::test]
    async fn test_pause_step_resume_reset() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Retrieval)
            .add_node("b", NodeKind::Reasoning)
            .add_node("c", NodeKind::Formatter)
            .add_edge("a", "out", "b", "in")
            .add_edge("b", "out", "c", "in")
            .build();

        let sink = Arc::new(VecEventSink::new());
        let mut runner = runner(graph).with_event_sink(sink.clone());
        runner.start("a", FlowIO::text("go")).unwrap();
        runner.pause();

        assert_eq!(runner.run().await.unwrap(), RunState::Paused);
        assert!(runner.artifacts().is_empty());
        assert_eq!(runner.pending(), vec!["a"]);

        assert_eq!(runner.step().await.unwrap().as_deref(), Some("a"));
        assert_eq!(runner.state(), RunState::Paused);
        assert_eq!(runner.artifacts().len(), 1);

        assert_eq!(runner.resume().await.unwrap(), RunState::Completed);
        assert_eq!(runner.artifacts().len(), 3);
        let names = sink.names();
        assert!(names.contains(&"flow_pause"));
        assert!(names.contains(&"flow_resume"));
        assert_eq!(names.last(), Some(&"flow_complete"));

        runner.reset();
        assert_eq!(runner.state(), RunState::Idle);
        assert!(runner.artifacts().is_empty());
        assert!(runner.context().is_empty());
        assert!(runner.pending().is_empty());

        let report = runner.execute("a", FlowIO::text("again")).await.unwrap();
        assert_eq!(report.artifacts.len(), 3);
    }

    #[tokio::test]
    async fn test_cycle_does_not_hang() {
        let graph = WorkflowBuilder::new()
            .add_node("a", NodeKind::Retrieval)
            .add_node("b", NodeKind::Reasoning)
            .add_node("c", NodeKind::Tool)
            .add_edge("a", "out", "b", "in")
            .add_edge("b", "out", "c", "in")
            .add_edge("c", "out", "b", "in")
            .build();

        let mut runner = runner(graph);
        let report = runner.execute("a", FlowIO::text("x")).await.unwrap();
        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.executed(), vec!["a"]);
        assert!(!report.warnings.is_empty());
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let graph = WorkflowBuilder::new().add_node("a", NodeKind::Retrieval).build();
        let mut runner = runner(graph);
        runner.execute("a", FlowIO::text("x")).await.unwrap();
        assert!(matches!(
            runner.start("a", FlowIO::text("x")),
            Err(NodeEngineError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn test_node_outputs_shape() {
        let mut runner = runner(diamond_with_branch());
        let report = runner
            .execute("start", FlowIO::json(json!({"decision": false})))
            .await
            .unwrap();
        let bag = report.node_outputs();
        assert_eq!(bag["router"]["output"]["decision"], false);
        assert_eq!(bag["router"]["type"], "json");
        assert!(bag.get("yes").is_none());
        assert!(report.edge_links().iter().any(|e| e.source == "router" && e.target == "yes" && e.blocked));
    }
}
