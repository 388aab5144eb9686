use crate::graph::RunState;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::{join_all, BoxFuture};
use futures::FutureExt;
use parking_lot::{Mutex, RwLock};
use portcore::{
    Arguments, DictionaryMapping, Document, ExecutionContext, ExecutionEvent, FlowControl,
    GraphError, InputMapping, Invocation, NodeDefinition, NodeError, NodeFunction, NodeId,
    OutputMapping, ParamType, ParameterBinder, PortSink, Position, Returned, DEFAULT_PORT,
    START_FUNCTION,
};
use serde_json::{json, Map, Value};
use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Where a node is in its per-run lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Idle,
    Running,
    Completed,
    Failed,
}

/// An upstream link. Links made through a named port only carry data when
/// the source has already finished; they never make the target wait, which
/// is what lets control flow loop back through ports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Upstream {
    node: NodeId,
    via_port: bool,
}

#[derive(Debug, Default)]
struct PortQueue {
    completed: bool,
    pending: Vec<String>,
}

/// One unit of work: a backing function plus its wiring and per-run state.
pub struct Node {
    id: NodeId,
    name: Option<String>,
    function: Arc<dyn NodeFunction>,
    inputs: Vec<InputMapping>,
    dictionary_inputs: Vec<DictionaryMapping>,
    outputs: Vec<OutputMapping>,
    ports: Vec<String>,
    merge_output_with_input: bool,
    position: Option<Position>,

    upstream: Vec<Upstream>,
    output_nodes: Vec<NodeId>,
    output_ports: HashMap<String, Vec<NodeId>>,

    // Run state. `result` doubles as the memo: set means "already ran".
    result: RwLock<Option<Arc<Document>>>,
    input: RwLock<Document>,
    last_error: RwLock<Option<NodeError>>,
    running: AtomicBool,
    gate: tokio::sync::Mutex<()>,
    port_queue: Mutex<PortQueue>,
}

impl Node {
    pub(crate) fn new(definition: &NodeDefinition, function: Arc<dyn NodeFunction>) -> Self {
        let ports = if definition.ports.is_empty() {
            function.signature().ports.clone()
        } else {
            definition.ports.clone()
        };

        Self {
            id: definition.id,
            name: definition.name.clone(),
            function,
            inputs: definition.inputs.clone(),
            dictionary_inputs: definition.dictionary_inputs.clone(),
            outputs: definition.outputs.clone(),
            ports,
            merge_output_with_input: definition.merge_output_with_input,
            position: definition.position,
            upstream: Vec::new(),
            output_nodes: Vec::new(),
            output_ports: HashMap::new(),
            result: RwLock::new(None),
            input: RwLock::new(Document::new()),
            last_error: RwLock::new(None),
            running: AtomicBool::new(false),
            gate: tokio::sync::Mutex::new(()),
            port_queue: Mutex::new(PortQueue::default()),
        }
    }

    /// Register `target` downstream of this node, through `port` when given.
    pub(crate) fn connect_output(&mut self, port: Option<&str>, target: NodeId) -> Result<(), GraphError> {
        match (self.is_port_driven(), port) {
            (true, None) => {
                return Err(GraphError::InvalidConnection(format!(
                    "node {} is port-driven; connections from it must name one of {:?}",
                    self.id, self.ports
                )))
            }
            (true, Some(port)) => {
                if !self.ports.iter().any(|p| p == port) {
                    return Err(GraphError::UnknownPort {
                        node: self.id.to_string(),
                        port: port.to_string(),
                    });
                }
                let targets = self.output_ports.entry(port.to_string()).or_default();
                if !targets.contains(&target) {
                    targets.push(target);
                }
            }
            (false, Some(port)) if port != DEFAULT_PORT => {
                return Err(GraphError::UnknownPort {
                    node: self.id.to_string(),
                    port: port.to_string(),
                })
            }
            (false, _) => {}
        }
        if !self.output_nodes.contains(&target) {
            self.output_nodes.push(target);
        }
        Ok(())
    }

    pub(crate) fn connect_input(&mut self, source: NodeId, via_port: bool) {
        if let Some(existing) = self.upstream.iter_mut().find(|u| u.node == source) {
            // A plain data edge wins over a port edge from the same source.
            existing.via_port &= via_port;
            return;
        }
        self.upstream.push(Upstream {
            node: source,
            via_port,
        });
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn function_key(&self) -> &str {
        &self.function.signature().key
    }

    pub fn position(&self) -> Option<Position> {
        self.position
    }

    pub fn ports(&self) -> &[String] {
        &self.ports
    }

    pub fn is_port_driven(&self) -> bool {
        !self.ports.is_empty()
    }

    pub fn is_entry(&self) -> bool {
        self.function_key() == START_FUNCTION
    }

    pub fn merges_output_with_input(&self) -> bool {
        self.merge_output_with_input
    }

    /// All upstream nodes in declaration order.
    pub fn input_nodes(&self) -> Vec<NodeId> {
        self.upstream.iter().map(|u| u.node).collect()
    }

    /// Upstream nodes this node waits for.
    pub fn data_inputs(&self) -> Vec<NodeId> {
        self.upstream.iter().filter(|u| !u.via_port).map(|u| u.node).collect()
    }

    pub fn output_nodes(&self) -> &[NodeId] {
        &self.output_nodes
    }

    pub fn port_targets(&self, port: &str) -> &[NodeId] {
        self.output_ports.get(port).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn result(&self) -> Option<Arc<Document>> {
        self.result.read().clone()
    }

    /// The document this node's parameters were bound against.
    pub fn input(&self) -> Document {
        self.input.read().clone()
    }

    pub fn has_error(&self) -> bool {
        self.last_error.read().is_some()
    }

    pub fn error_message(&self) -> Option<String> {
        self.last_error.read().as_ref().map(ToString::to_string)
    }

    pub fn last_error(&self) -> Option<NodeError> {
        self.last_error.read().clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn status(&self) -> NodeStatus {
        if self.result.read().is_some() {
            if self.has_error() {
                NodeStatus::Failed
            } else {
                NodeStatus::Completed
            }
        } else if self.is_running() {
            NodeStatus::Running
        } else {
            NodeStatus::Idle
        }
    }

    /// Back to idle before a new run.
    pub(crate) fn reset(&self) {
        *self.result.write() = None;
        *self.input.write() = Document::new();
        *self.last_error.write() = None;
        self.running.store(false, Ordering::Release);
        *self.port_queue.lock() = PortQueue::default();
    }

    /// Compute this node's result at most once per run and hand the shared
    /// result to every caller.
    pub(crate) fn get_result<'a>(
        self: &'a Arc<Self>,
        run: &'a Arc<RunState>,
        caller: Option<NodeId>,
    ) -> BoxFuture<'a, Arc<Document>> {
        async move {
            if let Some(result) = self.result() {
                return result;
            }

            let result = {
                let _gate = self.gate.lock().await;
                if let Some(result) = self.result() {
                    return result;
                }
                self.running.store(true, Ordering::Release);
                tracing::debug!(node = %self.id, caller = ?caller, function = self.function_key(), "executing node");

                let result = self.execute(run).await;
                *self.result.write() = Some(Arc::clone(&result));
                run.shared.publish_node_result(self.id, &result);
                self.running.store(false, Ordering::Release);
                result
            };

            let pending = {
                let mut queue = self.port_queue.lock();
                queue.completed = true;
                std::mem::take(&mut queue.pending)
            };

            // Detached so a caller that pulled this node does not wait on
            // downstream work that may itself be waiting on the caller.
            let node = Arc::clone(self);
            let state = Arc::clone(run);
            run.spawn_fan_out(async move {
                if node.is_port_driven() {
                    for port in pending {
                        node.route(&state, &port).await;
                    }
                } else {
                    node.trigger(&state, &node.output_nodes).await;
                }
            });
            result
        }
        .boxed()
    }

    async fn execute(self: &Arc<Self>, run: &Arc<RunState>) -> Arc<Document> {
        let started = Instant::now();
        run.events.emit(ExecutionEvent::NodeStarted {
            execution_id: run.execution_id,
            node_id: self.id,
            function: self.function_key().to_string(),
            timestamp: Utc::now(),
        });

        let upstream = self.gather(run).await;
        let outcome = AssertUnwindSafe(self.invoke(run, &upstream)).catch_unwind().await;

        let document = match outcome {
            Ok(Ok(document)) => {
                let duration_ms = started.elapsed().as_millis() as u64;
                tracing::info!(node = %self.id, duration_ms, "node completed");
                run.events.emit(ExecutionEvent::NodeCompleted {
                    execution_id: run.execution_id,
                    node_id: self.id,
                    duration_ms,
                    timestamp: Utc::now(),
                });
                document
            }
            Ok(Err(error)) => self.fail(run, error),
            Err(panic) => self.fail(run, NodeError::Panicked(panic_message(panic.as_ref()))),
        };
        Arc::new(document)
    }

    /// Merge the results of all upstream nodes in declaration order.
    async fn gather(self: &Arc<Self>, run: &Arc<RunState>) -> Document {
        let fetches = self.upstream.iter().map(|upstream| async move {
            let node = run.node(upstream.node)?;
            if upstream.via_port {
                node.result()
            } else {
                Some(node.get_result(run, Some(self.id)).await)
            }
        });
        let results = join_all(fetches).await;

        let mut merged = Document::new();
        for result in results.iter().flatten() {
            merged.merge(result);
        }
        merged
    }

    async fn invoke(self: &Arc<Self>, run: &Arc<RunState>, upstream: &Document) -> Result<Document, NodeError> {
        let scope = self.input_scope(run, upstream)?;
        *self.input.write() = scope.clone();

        let invocation = self.bind(run, &scope)?;
        let returned = self.function.invoke(invocation).await?;

        let mut result = self.shape(returned)?;
        if self.merge_output_with_input {
            let mut merged = upstream.clone();
            merged.merge(&result);
            result = merged;
        }
        Ok(result)
    }

    /// Shared document plus the upstream output under `input` (and any
    /// upstream error payload under `input.error`).
    fn input_scope(&self, run: &RunState, upstream: &Document) -> Result<Document, NodeError> {
        let mut scope = run.shared.snapshot();
        let output = upstream
            .get("output")
            .cloned()
            .unwrap_or_else(|| Value::Object(Map::new()));
        scope.set("input", output)?;
        if let Some(error) = upstream.get("error") {
            scope.set("input.error", error.clone())?;
        }
        Ok(scope)
    }

    fn bind(self: &Arc<Self>, run: &Arc<RunState>, scope: &Document) -> Result<Invocation, NodeError> {
        let binder = ParameterBinder::new(run.evaluator.as_ref());
        let mut arguments = Arguments::new();
        let mut context = None;
        let mut flow = None;

        for parameter in &self.function.signature().parameters {
            match parameter.ty {
                ParamType::Context => {
                    context = Some(ExecutionContext::new(
                        run.execution_id,
                        self.id,
                        self.name.clone(),
                        Arc::clone(&run.shared),
                        run.events.create_emitter(run.execution_id, self.id),
                    ));
                }
                ParamType::Flow => {
                    flow = Some(FlowControl::new(Arc::new(NodePorts {
                        node: Arc::clone(self),
                        run: Arc::clone(run),
                    })));
                }
                ParamType::Map if self.dictionary_inputs.iter().any(|d| d.parameter == parameter.name) => {
                    let value = binder.bind_dictionary(&parameter.name, &self.dictionary_inputs, scope)?;
                    arguments.insert(parameter.name.clone(), value);
                }
                _ => {
                    let value = binder.bind(parameter, self.input_for(&parameter.name), scope)?;
                    arguments.insert(parameter.name.clone(), value);
                }
            }
        }
        Ok(Invocation::new(arguments, context, flow))
    }

    fn input_for(&self, parameter: &str) -> Option<&str> {
        self.inputs
            .iter()
            .find(|m| m.to == parameter)
            .map(|m| m.from.as_str())
    }

    /// Place the return value under `output` and apply the output mappings.
    fn shape(&self, returned: Returned) -> Result<Document, NodeError> {
        let members = Document::from_value(returned.into_members());
        let mut result = Document::new();
        result.set("output", members.as_value().clone())?;

        for mapping in &self.outputs {
            match members.get(&mapping.from) {
                Some(value) => {
                    result.set(&format!("output.{}", mapping.to), value.clone())?;
                }
                None => tracing::warn!(
                    node = %self.id,
                    from = %mapping.from,
                    to = %mapping.to,
                    "output mapping source not found in return value"
                ),
            }
        }
        Ok(result)
    }

    /// Record a contained failure and build the error payload consumers see.
    fn fail(&self, run: &RunState, error: NodeError) -> Document {
        let message = error.to_string();
        tracing::error!(node = %self.id, name = ?self.name, error = %message, "node failed");

        run.events.emit(ExecutionEvent::NodeFailed {
            execution_id: run.execution_id,
            node_id: self.id,
            node_name: self.name.clone(),
            error: message.clone(),
            timestamp: Utc::now(),
        });
        *self.last_error.write() = Some(error);

        Document::from_value(json!({
            "error": {
                "message": message,
                "nodeId": self.id.to_string(),
                "nodeName": self.name,
                "timestamp": Utc::now().to_rfc3339(),
            }
        }))
    }

    async fn route(&self, run: &Arc<RunState>, port: &str) {
        tracing::debug!(node = %self.id, port, "routing port");
        self.trigger(run, self.port_targets(port)).await;
    }

    /// Fan out to `targets` and wait for each of them to produce a result.
    async fn trigger(&self, run: &Arc<RunState>, targets: &[NodeId]) {
        let targets: Vec<Arc<Node>> = targets.iter().filter_map(|id| run.node(*id)).collect();
        join_all(targets.iter().map(|target| target.get_result(run, Some(self.id)))).await;
    }

    pub(crate) async fn fire_port(self: &Arc<Self>, run: &Arc<RunState>, port: &str) -> Result<(), GraphError> {
        if !self.is_port_driven() {
            return Err(GraphError::Invalid(format!("node {} declares no output ports", self.id)));
        }
        if !self.ports.iter().any(|p| p == port) {
            return Err(GraphError::UnknownPort {
                node: self.id.to_string(),
                port: port.to_string(),
            });
        }

        let queued = {
            let mut queue = self.port_queue.lock();
            if queue.completed {
                false
            } else {
                queue.pending.push(port.to_string());
                true
            }
        };
        run.events.emit(ExecutionEvent::PortFired {
            execution_id: run.execution_id,
            node_id: self.id,
            port: port.to_string(),
            queued,
            timestamp: Utc::now(),
        });

        if !queued {
            self.route(run, port).await;
        }
        Ok(())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("function", &self.function_key())
            .field("ports", &self.ports)
            .field("status", &self.status())
            .finish()
    }
}

/// Port sink handed to a running function through its [`FlowControl`].
struct NodePorts {
    node: Arc<Node>,
    run: Arc<RunState>,
}

#[async_trait]
impl PortSink for NodePorts {
    fn ports(&self) -> &[String] {
        self.node.ports()
    }

    async fn fire(&self, port: &str) -> Result<(), GraphError> {
        self.node.fire_port(&self.run, port).await
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
