use crate::context::{ExecutionContext, FlowControl};
use crate::NodeError;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, Timelike, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::sync::Arc;

/// Function key of the well-known start marker. Nodes backed by it are the
/// entry points of a run.
pub const START_FUNCTION: &str = "flow.start";

/// Declared type of a function parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamType {
    Bool,
    Integer,
    Float,
    String,
    Array,
    Object,
    Any,
    /// Key/value parameter filled from the node's dictionary mappings.
    Map,
    /// Injected [`ExecutionContext`] handle.
    Context,
    /// Injected [`FlowControl`] handle.
    Flow,
}

impl ParamType {
    /// Value bound when a parameter has no mapping.
    pub fn zero_value(self) -> Value {
        match self {
            ParamType::Bool => Value::Bool(false),
            ParamType::Integer => Value::from(0),
            ParamType::Float => json!(0.0),
            _ => Value::Null,
        }
    }

    pub fn is_value_type(self) -> bool {
        matches!(self, ParamType::Bool | ParamType::Integer | ParamType::Float)
    }

    pub fn is_injected(self) -> bool {
        matches!(self, ParamType::Context | ParamType::Flow)
    }

    pub fn name(self) -> &'static str {
        match self {
            ParamType::Bool => "bool",
            ParamType::Integer => "integer",
            ParamType::Float => "float",
            ParamType::String => "string",
            ParamType::Array => "array",
            ParamType::Object => "object",
            ParamType::Any => "any",
            ParamType::Map => "map",
            ParamType::Context => "context",
            ParamType::Flow => "flow",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: ParamType,
}

/// Everything the engine needs to know about a function without calling it.
#[derive(Debug, Clone)]
pub struct Signature {
    /// Stable registry key, e.g. `"math.add"`.
    pub key: String,
    pub description: String,
    pub category: String,
    pub parameters: Vec<Parameter>,
    /// Named output ports. Empty means the implicit `default` port.
    pub ports: Vec<String>,
}

impl Signature {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            description: String::new(),
            category: "general".to_string(),
            parameters: Vec::new(),
            ports: Vec::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        self.parameters.push(Parameter { name: name.into(), ty });
        self
    }

    pub fn with_ports<I, S>(mut self, ports: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ports = ports.into_iter().map(Into::into).collect();
        self
    }

    pub fn parameter(&self, name: &str) -> Option<&Parameter> {
        self.parameters.iter().find(|p| p.name == name)
    }

    pub fn is_port_driven(&self) -> bool {
        !self.ports.is_empty()
    }
}

/// A backing function wrapped by a node.
#[async_trait]
pub trait NodeFunction: Send + Sync {
    fn signature(&self) -> &Signature;

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError>;
}

/// Bound arguments, keyed by parameter name.
#[derive(Debug, Clone, Default)]
pub struct Arguments {
    values: Map<String, Value>,
}

impl Arguments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: Value) {
        self.values.insert(name.into(), value);
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.values.get(name)
    }

    pub fn require(&self, name: &str) -> Result<&Value, NodeError> {
        self.values
            .get(name)
            .ok_or_else(|| NodeError::MissingArgument(name.to_string()))
    }

    pub fn i64(&self, name: &str) -> Result<i64, NodeError> {
        let value = self.require(name)?;
        value.as_i64().ok_or_else(|| mismatch(name, "integer", value))
    }

    pub fn f64(&self, name: &str) -> Result<f64, NodeError> {
        let value = self.require(name)?;
        value.as_f64().ok_or_else(|| mismatch(name, "float", value))
    }

    pub fn bool(&self, name: &str) -> Result<bool, NodeError> {
        let value = self.require(name)?;
        value.as_bool().ok_or_else(|| mismatch(name, "bool", value))
    }

    pub fn str(&self, name: &str) -> Result<&str, NodeError> {
        let value = self.require(name)?;
        value.as_str().ok_or_else(|| mismatch(name, "string", value))
    }

    pub fn array(&self, name: &str) -> Result<&Vec<Value>, NodeError> {
        let value = self.require(name)?;
        value.as_array().ok_or_else(|| mismatch(name, "array", value))
    }

    pub fn object(&self, name: &str) -> Result<&Map<String, Value>, NodeError> {
        let value = self.require(name)?;
        value.as_object().ok_or_else(|| mismatch(name, "object", value))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.values.iter()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

fn mismatch(field: &str, expected: &str, actual: &Value) -> NodeError {
    NodeError::InvalidArgumentType {
        field: field.to_string(),
        expected: expected.to_string(),
        actual: crate::value::type_name(actual).to_string(),
    }
}

/// One call of a backing function: its bound arguments plus whichever
/// handles the signature asked for.
pub struct Invocation {
    pub arguments: Arguments,
    context: Option<ExecutionContext>,
    flow: Option<FlowControl>,
}

impl Invocation {
    pub fn new(arguments: Arguments, context: Option<ExecutionContext>, flow: Option<FlowControl>) -> Self {
        Self {
            arguments,
            context,
            flow,
        }
    }

    pub fn args(&self) -> &Arguments {
        &self.arguments
    }

    pub fn context(&self) -> Result<&ExecutionContext, NodeError> {
        self.context.as_ref().ok_or(NodeError::NotInjected("context"))
    }

    pub fn flow(&self) -> Result<&FlowControl, NodeError> {
        self.flow.as_ref().ok_or(NodeError::NotInjected("flow"))
    }
}

/// Return value of a backing function, before it is shaped into the node's
/// `output.*` namespace.
#[derive(Debug, Clone, PartialEq)]
pub enum Returned {
    /// Nothing to expose.
    Unit,
    /// Opaque value exposed as `output.result`: scalars, arrays and maps.
    Value(Value),
    /// Plain structured value; every member becomes `output.<member>`.
    Record(Map<String, Value>),
    /// Exposes only its curated calendar members.
    Temporal(DateTime<Utc>),
}

impl Returned {
    /// Decompose a plain struct into a record. Anything that does not
    /// serialize to an object stays opaque.
    pub fn record<T: Serialize>(value: &T) -> Result<Self, NodeError> {
        let value = serde_json::to_value(value)
            .map_err(|e| NodeError::ExecutionFailed(format!("cannot serialize return value: {}", e)))?;
        Ok(match value {
            Value::Object(members) => Returned::Record(members),
            other => Returned::Value(other),
        })
    }

    /// The members exposed under `output`.
    pub fn into_members(self) -> Value {
        match self {
            Returned::Unit => Value::Object(Map::new()),
            Returned::Value(value) => json!({ "result": value }),
            Returned::Record(members) => Value::Object(members),
            Returned::Temporal(at) => json!({
                "year": at.year(),
                "month": at.month(),
                "day": at.day(),
                "hour": at.hour(),
                "minute": at.minute(),
                "second": at.second(),
                "weekday": at.weekday().to_string(),
                "timestamp": at.timestamp(),
                "iso": at.to_rfc3339(),
            }),
        }
    }
}

impl From<()> for Returned {
    fn from(_: ()) -> Self {
        Returned::Unit
    }
}

impl From<Value> for Returned {
    fn from(value: Value) -> Self {
        Returned::Value(value)
    }
}

impl From<f64> for Returned {
    fn from(n: f64) -> Self {
        Returned::Value(crate::value::number_value(n).unwrap_or(Value::Null))
    }
}

impl From<i64> for Returned {
    fn from(n: i64) -> Self {
        Returned::Value(Value::from(n))
    }
}

impl From<bool> for Returned {
    fn from(b: bool) -> Self {
        Returned::Value(Value::Bool(b))
    }
}

impl From<String> for Returned {
    fn from(s: String) -> Self {
        Returned::Value(Value::String(s))
    }
}

impl From<&str> for Returned {
    fn from(s: &str) -> Self {
        Returned::Value(Value::String(s.to_string()))
    }
}

impl From<Vec<Value>> for Returned {
    fn from(items: Vec<Value>) -> Self {
        Returned::Value(Value::Array(items))
    }
}

impl From<DateTime<Utc>> for Returned {
    fn from(at: DateTime<Utc>) -> Self {
        Returned::Temporal(at)
    }
}

/// [`NodeFunction`] backed by an async closure.
pub struct FnFunction<F> {
    signature: Signature,
    handler: F,
}

#[async_trait]
impl<F, Fut> NodeFunction for FnFunction<F>
where
    F: Fn(Invocation) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Returned, NodeError>> + Send,
{
    fn signature(&self) -> &Signature {
        &self.signature
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        (self.handler)(invocation).await
    }
}

/// Wrap an async closure as a shareable [`NodeFunction`].
pub fn function_fn<F, Fut>(signature: Signature, handler: F) -> Arc<dyn NodeFunction>
where
    F: Fn(Invocation) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Returned, NodeError>> + Send + 'static,
{
    Arc::new(FnFunction { signature, handler })
}
