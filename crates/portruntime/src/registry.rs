use async_trait::async_trait;
use portcore::{
    GraphError, Invocation, NodeError, NodeFunction, ParamType, Returned, Signature, START_FUNCTION,
};
use serde_json::Map;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry of available backing functions, keyed by signature key
pub struct FunctionRegistry {
    functions: HashMap<String, Arc<dyn NodeFunction>>,
}

impl FunctionRegistry {
    pub fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    /// A registry holding only the start marker.
    pub fn with_start() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(StartFunction::new()));
        registry
    }

    /// Register a function. A later registration under the same key replaces
    /// the earlier one.
    pub fn register(&mut self, function: Arc<dyn NodeFunction>) {
        let key = function.signature().key.clone();
        tracing::info!("Registering function: {}", key);
        if self.functions.insert(key.clone(), function).is_some() {
            tracing::warn!(function = %key, "replaced existing registration");
        }
    }

    pub fn get(&self, key: &str) -> Result<Arc<dyn NodeFunction>, GraphError> {
        self.functions
            .get(key)
            .cloned()
            .ok_or_else(|| GraphError::UnknownFunction(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.functions.contains_key(key)
    }

    /// All registered keys, sorted
    pub fn list_functions(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.functions.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn signature(&self, key: &str) -> Option<&Signature> {
        self.functions.get(key).map(|f| f.signature())
    }

    /// Signatures sorted by category, then key
    pub fn signatures(&self) -> Vec<&Signature> {
        let mut signatures: Vec<&Signature> = self.functions.values().map(|f| f.signature()).collect();
        signatures.sort_by(|a, b| a.category.cmp(&b.category).then_with(|| a.key.cmp(&b.key)));
        signatures
    }

    pub fn len(&self) -> usize {
        self.functions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Entry marker. Exposes the run's workflow parameters as its output members.
pub struct StartFunction {
    signature: Signature,
}

impl StartFunction {
    pub fn new() -> Self {
        Self {
            signature: Signature::new(START_FUNCTION)
                .with_description("Entry point of a run; outputs the workflow parameters")
                .with_category("flow")
                .with_param("context", ParamType::Context),
        }
    }
}

impl Default for StartFunction {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NodeFunction for StartFunction {
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        let context = invocation.context()?;
        let parameters: Map<_, _> = context
            .parameters()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(Returned::Record(parameters))
    }
}
