use thiserror::Error;

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Node error: {0}")]
    Node(#[from] NodeError),

    #[error("Graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Binding error: {0}")]
    Binding(#[from] BindingError),

    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Execution error: {0}")]
    Execution(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Failure of a single node. Contained at the node boundary: it becomes the
/// node's error payload instead of aborting the run.
#[derive(Error, Debug, Clone)]
pub enum NodeError {
    #[error("Missing required argument: {0}")]
    MissingArgument(String),

    #[error("Invalid argument type for '{field}': expected {expected}, got {actual}")]
    InvalidArgumentType {
        field: String,
        expected: String,
        actual: String,
    },

    #[error("Parameter binding failed: {0}")]
    Binding(#[from] BindingError),

    #[error("Handle not injected: function does not declare a {0} parameter")]
    NotInjected(&'static str),

    #[error("Invalid path: {0}")]
    Path(#[from] PathError),

    #[error("Control flow error: {0}")]
    ControlFlow(#[from] GraphError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Panicked: {0}")]
    Panicked(String),
}

#[derive(Error, Debug, Clone)]
pub enum BindingError {
    #[error("Cannot bind '{parameter}': {source}")]
    Template {
        parameter: String,
        #[source]
        source: TemplateError,
    },

    #[error("Cannot convert '{parameter}' to {expected}: got {actual}")]
    Coercion {
        parameter: String,
        expected: String,
        actual: String,
    },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TemplateError {
    #[error("Syntax error at offset {offset}: {message}")]
    Syntax { offset: usize, message: String },

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Filter '{filter}' failed: {message}")]
    Filter { filter: String, message: String },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PathError {
    #[error("Empty path")]
    Empty,

    #[error("Empty segment in path '{0}'")]
    EmptySegment(String),

    #[error("Unterminated index in path '{0}'")]
    UnterminatedIndex(String),

    #[error("Index {index} in path '{path}' is too far past the end of its array")]
    IndexOutOfRange { path: String, index: usize },
}

/// Structural errors: raised while building or wiring a graph, never contained.
#[derive(Error, Debug, Clone)]
pub enum GraphError {
    #[error("Workflow not found: {0}")]
    NotFound(String),

    #[error("Invalid graph: {0}")]
    Invalid(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Duplicate node id: {0}")]
    DuplicateNode(String),

    #[error("Unknown function: {0}")]
    UnknownFunction(String),

    #[error("Node {node} has no port '{port}'")]
    UnknownPort { node: String, port: String },

    #[error("Invalid connection: {0}")]
    InvalidConnection(String),
}
