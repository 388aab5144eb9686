use crate::node::Node;
use crate::registry::FunctionRegistry;
use crate::runtime::RuntimeConfig;
use chrono::Utc;
use petgraph::algo::tarjan_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use portcore::{
    Document, EventBus, ExecutionEvent, ExecutionId, ExpressionEvaluator, FlowError, GraphError,
    NodeId, RunContext, SharedContext, TemplateEngine, WorkflowDefinition, WorkflowId,
};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{broadcast, Semaphore};
use tokio::task::JoinSet;

/// Everything a node needs while a run is in flight.
pub(crate) struct RunState {
    pub(crate) execution_id: ExecutionId,
    pub(crate) nodes: Arc<HashMap<NodeId, Arc<Node>>>,
    pub(crate) shared: Arc<SharedContext>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) evaluator: Arc<dyn ExpressionEvaluator>,
    /// Fan-out work detached from the node that finished.
    fan_out: Mutex<JoinSet<()>>,
}

impl RunState {
    pub(crate) fn node(&self, id: NodeId) -> Option<Arc<Node>> {
        self.nodes.get(&id).cloned()
    }

    /// Track `work` as part of this run. A node that pulled its upstream only
    /// waits for the upstream result, never for what the upstream triggers.
    pub(crate) fn spawn_fan_out<F>(&self, work: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.fan_out.lock().spawn(work);
    }

    /// Wait until all tracked fan-out has finished, including work spawned
    /// while waiting.
    async fn settle(&self) -> Result<(), FlowError> {
        let mut failure = None;
        loop {
            let mut batch = std::mem::take(&mut *self.fan_out.lock());
            if batch.is_empty() {
                break;
            }
            while let Some(joined) = batch.join_next().await {
                if let Err(e) = joined {
                    tracing::error!(error = %e, "fan-out task died");
                    failure.get_or_insert(FlowError::Execution(format!("fan-out failed: {}", e)));
                }
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

/// A failed node as reported in [`RunOutput`]
#[derive(Debug, Clone, PartialEq)]
pub struct NodeFailure {
    pub node_id: NodeId,
    pub node_name: Option<String>,
    pub message: String,
}

/// Result of one run
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub execution_id: ExecutionId,
    /// Shared document as it stood when the run finished.
    pub document: Document,
    /// Number of nodes that produced a result (including failed ones).
    pub executed: usize,
    pub failures: Vec<NodeFailure>,
    pub duration_ms: u64,
}

impl RunOutput {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// Result document of a node, as published under `nodes.<id>`.
    pub fn node_result(&self, node: NodeId) -> Option<&serde_json::Value> {
        self.document.get(&format!("nodes.{}", node))
    }

    /// A workflow output published under `workflow.output.<name>`.
    pub fn output(&self, name: &str) -> Option<&serde_json::Value> {
        self.document.get(&format!("workflow.output.{}", name))
    }
}

/// Executable node graph built from a [`WorkflowDefinition`]. Built once and
/// run any number of times; every run starts from freshly reset nodes.
pub struct Graph {
    id: WorkflowId,
    name: String,
    nodes: Arc<HashMap<NodeId, Arc<Node>>>,
    order: Vec<NodeId>,
    events: Arc<EventBus>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    max_concurrent_entries: usize,
}

impl Graph {
    /// Resolve every node's function and wire the connections. Structural
    /// problems fail here rather than at run time.
    pub fn build(
        definition: &WorkflowDefinition,
        registry: &FunctionRegistry,
        config: &RuntimeConfig,
    ) -> Result<Self, GraphError> {
        let mut nodes: HashMap<NodeId, Node> = HashMap::with_capacity(definition.nodes.len());
        let mut order = Vec::with_capacity(definition.nodes.len());

        for spec in &definition.nodes {
            if nodes.contains_key(&spec.id) {
                return Err(GraphError::DuplicateNode(spec.id.to_string()));
            }
            let function = registry.get(&spec.function)?;
            nodes.insert(spec.id, Node::new(spec, function));
            order.push(spec.id);
        }

        for conn in &definition.connections {
            if !nodes.contains_key(&conn.to_node) {
                return Err(GraphError::NodeNotFound(conn.to_node.to_string()));
            }
            let source = nodes
                .get_mut(&conn.from_node)
                .ok_or_else(|| GraphError::NodeNotFound(conn.from_node.to_string()))?;
            source.connect_output(conn.from_port.as_deref(), conn.to_node)?;
            let via_port = source.is_port_driven();

            if let Some(target) = nodes.get_mut(&conn.to_node) {
                target.connect_input(conn.from_node, via_port);
            }
        }

        let graph = Self {
            id: definition.id,
            name: definition.name.clone(),
            nodes: Arc::new(nodes.into_iter().map(|(id, node)| (id, Arc::new(node))).collect()),
            order,
            events: Arc::new(EventBus::new(config.event_buffer_size)),
            evaluator: Arc::new(TemplateEngine::new()),
            max_concurrent_entries: config.max_concurrent_entries.max(1),
        };

        for cycle in graph.data_cycles() {
            tracing::warn!(workflow = %graph.name, nodes = ?cycle, "data dependency cycle; a run reaching it will not finish");
        }
        tracing::debug!(workflow = %graph.name, nodes = graph.order.len(), "graph built");
        Ok(graph)
    }

    /// Publish events on an existing bus instead of the graph's own.
    pub fn with_event_bus(mut self, events: Arc<EventBus>) -> Self {
        self.events = events;
        self
    }

    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn id(&self) -> WorkflowId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn node(&self, id: NodeId) -> Option<&Arc<Node>> {
        self.nodes.get(&id)
    }

    /// Nodes in definition order
    pub fn nodes(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Nodes backed by the start marker, in definition order.
    pub fn entry_nodes(&self) -> Vec<NodeId> {
        self.nodes().filter(|n| n.is_entry()).map(|n| n.id()).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.events.subscribe()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    /// Cycles that involve at least one waiting (non-port) edge. Cycles made
    /// only of port edges are fine and are not reported.
    pub fn data_cycles(&self) -> Vec<Vec<NodeId>> {
        let mut graph: DiGraph<NodeId, bool> = DiGraph::new();
        let mut index: HashMap<NodeId, NodeIndex> = HashMap::new();
        for id in &self.order {
            index.insert(*id, graph.add_node(*id));
        }

        for node in self.nodes() {
            let data = node.data_inputs();
            for upstream in node.input_nodes() {
                if let (Some(from), Some(to)) = (index.get(&upstream), index.get(&node.id())) {
                    graph.add_edge(*from, *to, data.contains(&upstream));
                }
            }
        }

        tarjan_scc(&graph)
            .into_iter()
            .filter(|component| {
                graph.edge_indices().any(|edge| {
                    let waits = graph[edge];
                    match graph.edge_endpoints(edge) {
                        Some((a, b)) => waits && component.contains(&a) && component.contains(&b),
                        None => false,
                    }
                })
            })
            .map(|component| component.into_iter().map(|i| graph[i]).collect())
            .collect()
    }

    /// Reset every node and prepare a run without launching anything.
    pub fn start_run(&mut self, context: RunContext) -> Run<'_> {
        for node in self.nodes.values() {
            node.reset();
        }

        let state = Arc::new(RunState {
            execution_id: ExecutionId::new_v4(),
            nodes: Arc::clone(&self.nodes),
            shared: Arc::new(SharedContext::new(context)),
            events: Arc::clone(&self.events),
            evaluator: Arc::clone(&self.evaluator),
            fan_out: Mutex::new(JoinSet::new()),
        });

        Run {
            state,
            workflow_id: self.id,
            entries: self.entry_nodes(),
            max_concurrent_entries: self.max_concurrent_entries,
            started: Instant::now(),
            _graph: PhantomData,
        }
    }

    /// Run every entry node to completion.
    pub async fn run(&mut self, context: RunContext) -> Result<RunOutput, FlowError> {
        let name = self.name.clone();
        let run = self.start_run(context);
        tracing::info!(workflow = %name, execution = %run.execution_id(), "Starting workflow execution");

        let launched = run.launch_entries().await;
        let output = run.finish();

        tracing::info!(
            workflow = %name,
            execution = %output.execution_id,
            executed = output.executed,
            failures = output.failures.len(),
            duration_ms = output.duration_ms,
            "workflow execution finished"
        );
        self.events.emit(ExecutionEvent::RunCompleted {
            execution_id: output.execution_id,
            success: launched.is_ok(),
            duration_ms: output.duration_ms,
            timestamp: Utc::now(),
        });

        launched.map(|_| output)
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.order.len())
            .finish()
    }
}

/// Handle on one in-flight run. Holds the graph exclusively so no second run
/// can reset the nodes underneath it.
pub struct Run<'g> {
    state: Arc<RunState>,
    workflow_id: WorkflowId,
    entries: Vec<NodeId>,
    max_concurrent_entries: usize,
    started: Instant,
    _graph: PhantomData<&'g mut Graph>,
}

impl Run<'_> {
    pub fn execution_id(&self) -> ExecutionId {
        self.state.execution_id
    }

    /// Pull a single node's result, executing whatever it depends on.
    pub async fn result_of(&self, node: NodeId) -> Result<Arc<Document>, GraphError> {
        let node = self
            .state
            .node(node)
            .ok_or_else(|| GraphError::NodeNotFound(node.to_string()))?;
        Ok(node.get_result(&self.state, None).await)
    }

    /// Wait for everything the run has triggered so far, such as the fan-out
    /// of nodes pulled through [`Run::result_of`].
    pub async fn settle(&self) -> Result<(), FlowError> {
        self.state.settle().await
    }

    /// Launch one task per entry node and wait for all of them and for
    /// everything they trigger.
    pub async fn launch_entries(&self) -> Result<(), FlowError> {
        if self.entries.is_empty() {
            tracing::warn!(workflow = %self.workflow_id, "workflow has no entry nodes");
        }
        self.state.events.emit(ExecutionEvent::RunStarted {
            execution_id: self.state.execution_id,
            workflow_id: self.workflow_id,
            entry_nodes: self.entries.clone(),
            timestamp: Utc::now(),
        });

        let permits = Arc::new(Semaphore::new(self.max_concurrent_entries));
        let mut tasks = JoinSet::new();
        for id in &self.entries {
            let Some(node) = self.state.node(*id) else {
                continue;
            };
            let state = Arc::clone(&self.state);
            let permits = Arc::clone(&permits);
            tasks.spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                node.get_result(&state, None).await;
            });
        }

        let mut failure = None;
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "entry execution died");
                failure.get_or_insert(FlowError::Execution(format!("entry execution failed: {}", e)));
            }
        }
        let settled = self.state.settle().await;
        match failure {
            Some(e) => Err(e),
            None => settled,
        }
    }

    /// Current shared document
    pub fn document(&self) -> Document {
        self.state.shared.snapshot()
    }

    pub fn finish(self) -> RunOutput {
        let mut executed = 0;
        let mut failures = Vec::new();
        for node in self.state.nodes.values() {
            if node.result().is_none() {
                continue;
            }
            executed += 1;
            if let Some(message) = node.error_message() {
                failures.push(NodeFailure {
                    node_id: node.id(),
                    node_name: node.name().map(str::to_string),
                    message,
                });
            }
        }
        failures.sort_by_key(|f| f.node_id);

        RunOutput {
            execution_id: self.state.execution_id,
            document: self.state.shared.snapshot(),
            executed,
            failures,
            duration_ms: self.started.elapsed().as_millis() as u64,
        }
    }
}
