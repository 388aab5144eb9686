use crate::graph::{Graph, RunOutput};
use crate::registry::FunctionRegistry;
use portcore::{
    EventBus, ExecutionEvent, ExpressionEvaluator, FlowError, GraphError, RunContext, TemplateEngine,
    WorkflowDefinition, WorkflowId,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Main runtime for building and running workflows
pub struct FlowRuntime {
    registry: Arc<FunctionRegistry>,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    workflows: Mutex<HashMap<WorkflowId, Graph>>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings and only the start marker
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_registry(Arc::new(FunctionRegistry::with_start()), config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<FunctionRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            registry,
            config,
            event_bus,
            evaluator: Arc::new(TemplateEngine::new()),
            workflows: Mutex::new(HashMap::new()),
        }
    }

    /// Swap the template engine used for `{{ }}` mappings
    pub fn with_evaluator(mut self, evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    pub fn registry(&self) -> &Arc<FunctionRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Build a graph wired to this runtime's event bus and evaluator
    pub fn build(&self, definition: &WorkflowDefinition) -> Result<Graph, GraphError> {
        Ok(Graph::build(definition, &self.registry, &self.config)?
            .with_event_bus(Arc::clone(&self.event_bus))
            .with_evaluator(Arc::clone(&self.evaluator)))
    }

    /// Build and keep a workflow so it can be run by id
    pub async fn register_workflow(&self, definition: &WorkflowDefinition) -> Result<WorkflowId, GraphError> {
        let graph = self.build(definition)?;
        tracing::info!(workflow = %definition.name, id = %definition.id, "Registered workflow");
        self.workflows.lock().await.insert(definition.id, graph);
        Ok(definition.id)
    }

    /// Run a registered workflow. Runs of the same workflow are serialized.
    pub async fn execute_workflow(&self, workflow_id: WorkflowId, context: RunContext) -> Result<RunOutput, FlowError> {
        let mut workflows = self.workflows.lock().await;
        let graph = workflows
            .get_mut(&workflow_id)
            .ok_or_else(|| GraphError::NotFound(workflow_id.to_string()))?;
        graph.run(context).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(&self, definition: &WorkflowDefinition, context: RunContext) -> Result<RunOutput, FlowError> {
        let mut graph = self.build(definition)?;
        graph.run(context).await
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Capacity of the broadcast channel behind the event bus.
    pub event_buffer_size: usize,
    pub max_concurrent_entries: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: 1000,
            max_concurrent_entries: 16,
        }
    }
}
