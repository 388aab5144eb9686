//! Run-scoped state shared between nodes.

use crate::document::Document;
use crate::events::{EventEmitter, ExecutionId};
use crate::{GraphError, NodeId, PathError};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Capability bundle threaded through a run in place of a global service
/// locator. Functions look services up by type.
#[derive(Clone, Default)]
pub struct Services {
    entries: Arc<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        Arc::make_mut(&mut self.entries).insert(TypeId::of::<T>(), Arc::new(service));
        self
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|service| service.downcast::<T>().ok())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services").field("len", &self.entries.len()).finish()
    }
}

/// Immutable inputs of one run.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    pub parameters: BTreeMap<String, Value>,
    pub environment: BTreeMap<String, String>,
    pub services: Services,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(name.into(), value.into());
        self
    }

    pub fn with_service<T: Send + Sync + 'static>(mut self, service: T) -> Self {
        self.services = self.services.with(service);
        self
    }

    /// Copy the current process environment into the run environment.
    pub fn inherit_environment(mut self) -> Self {
        self.environment.extend(std::env::vars());
        self
    }
}

/// The run-wide document. `workflow.parameters` and `environment` are
/// materialized from the [`RunContext`] on first access and stay read-only;
/// everything else is written through the publish operations, which keep
/// node-scoped keys under `nodes.<id>` and workflow outputs under
/// `workflow.output`.
pub struct SharedContext {
    inputs: RunContext,
    document: RwLock<Option<Document>>,
}

impl SharedContext {
    pub fn new(inputs: RunContext) -> Self {
        Self {
            inputs,
            document: RwLock::new(None),
        }
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        &self.inputs.parameters
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        &self.inputs.environment
    }

    pub fn services(&self) -> &Services {
        &self.inputs.services
    }

    fn seed(&self) -> Document {
        let parameters: Map<String, Value> = self
            .inputs
            .parameters
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let environment: Map<String, Value> = self
            .inputs
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect();

        let mut workflow = Map::new();
        workflow.insert("parameters".to_string(), Value::Object(parameters));
        let mut root = Map::new();
        root.insert("workflow".to_string(), Value::Object(workflow));
        root.insert("environment".to_string(), Value::Object(environment));
        Document::from_value(Value::Object(root))
    }

    fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        {
            let guard = self.document.read();
            if let Some(document) = guard.as_ref() {
                return f(document);
            }
        }
        let mut guard = self.document.write();
        let document = guard.get_or_insert_with(|| self.seed());
        f(document)
    }

    fn write<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        let mut guard = self.document.write();
        let document = guard.get_or_insert_with(|| self.seed());
        f(document)
    }

    pub fn snapshot(&self) -> Document {
        self.read(Document::clone)
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        self.read(|document| document.get(path).cloned())
    }

    /// Write a node-scoped value at `nodes.<node>.<key>`.
    pub fn publish_node(&self, node: NodeId, key: &str, value: Value) -> Result<(), PathError> {
        let path = format!("nodes.{}.{}", node, key);
        self.write(|document| document.set(&path, value).map(|_| ()))
    }

    /// Merge a finished node's result document into `nodes.<node>`.
    pub fn publish_node_result(&self, node: NodeId, result: &Document) {
        let mut scoped = Document::new();
        if scoped
            .set(&format!("nodes.{}", node), result.as_value().clone())
            .is_ok()
        {
            self.write(|document| {
                document.merge(&scoped);
            });
        }
    }

    /// Write an unnamespaced workflow output; last writer wins.
    pub fn publish_output(&self, name: &str, value: Value) -> Result<(), PathError> {
        if name.trim().is_empty() {
            return Err(PathError::Empty);
        }
        let path = format!("workflow.output.{}", name);
        self.write(|document| document.set(&path, value).map(|_| ()))
    }
}

impl fmt::Debug for SharedContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedContext")
            .field("parameters", &self.inputs.parameters.len())
            .field("environment", &self.inputs.environment.len())
            .finish()
    }
}

/// Handle injected into functions that declare a `Context` parameter.
#[derive(Clone)]
pub struct ExecutionContext {
    execution_id: ExecutionId,
    node_id: NodeId,
    node_name: Option<String>,
    shared: Arc<SharedContext>,
    events: EventEmitter,
}

impl ExecutionContext {
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        node_name: Option<String>,
        shared: Arc<SharedContext>,
        events: EventEmitter,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            node_name,
            shared,
            events,
        }
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn node_name(&self) -> Option<&str> {
        self.node_name.as_deref()
    }

    pub fn parameters(&self) -> &BTreeMap<String, Value> {
        self.shared.parameters()
    }

    pub fn parameter(&self, name: &str) -> Option<&Value> {
        self.shared.parameters().get(name)
    }

    pub fn environment(&self) -> &BTreeMap<String, String> {
        self.shared.environment()
    }

    pub fn env(&self, name: &str) -> Option<&str> {
        self.shared.environment().get(name).map(String::as_str)
    }

    pub fn service<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.shared.services().get::<T>()
    }

    /// Publish a value scoped to this node (`nodes.<id>.<key>`).
    pub fn publish(&self, key: &str, value: impl Into<Value>) -> Result<(), PathError> {
        self.shared.publish_node(self.node_id, key, value.into())
    }

    /// Publish a workflow output (`workflow.output.<name>`).
    pub fn publish_output(&self, name: &str, value: impl Into<Value>) -> Result<(), PathError> {
        self.shared.publish_output(name, value.into())
    }

    pub fn shared(&self) -> Document {
        self.shared.snapshot()
    }

    pub fn events(&self) -> &EventEmitter {
        &self.events
    }
}

/// Receiver of port fires; implemented by the runtime for each executing node.
#[async_trait]
pub trait PortSink: Send + Sync {
    fn ports(&self) -> &[String];

    async fn fire(&self, port: &str) -> Result<(), GraphError>;
}

/// Handle injected into functions that declare a `Flow` parameter. Firing a
/// port while the function is still running queues it until the node's result
/// is stored; firing afterwards runs the port's targets right away.
#[derive(Clone)]
pub struct FlowControl {
    sink: Arc<dyn PortSink>,
}

impl FlowControl {
    pub fn new(sink: Arc<dyn PortSink>) -> Self {
        Self { sink }
    }

    pub fn ports(&self) -> &[String] {
        self.sink.ports()
    }

    pub async fn fire(&self, port: &str) -> Result<(), GraphError> {
        self.sink.fire(port).await
    }
}
