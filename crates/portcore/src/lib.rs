//! Core abstractions for the portflow engine
//!
//! Documents, templating and parameter binding, the backing-function
//! contract, run-scoped context and the persisted workflow format. The
//! runtime crate builds node graphs on top of these types.

pub mod binder;
pub mod context;
pub mod document;
mod error;
pub mod events;
pub mod function;
pub mod template;
pub mod value;
mod workflow;

pub use binder::ParameterBinder;
pub use context::{ExecutionContext, FlowControl, PortSink, RunContext, Services, SharedContext};
pub use document::Document;
pub use error::{BindingError, FlowError, GraphError, NodeError, PathError, TemplateError};
pub use events::*;
pub use function::{
    function_fn, Arguments, Invocation, NodeFunction, ParamType, Parameter, Returned, Signature,
    START_FUNCTION,
};
pub use template::{ExpressionEvaluator, TemplateEngine};
pub use workflow::{
    Connection, DictionaryMapping, InputMapping, NodeDefinition, NodeId, OutputMapping, Position,
    WorkflowDefinition, WorkflowId, DEFAULT_PORT,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
