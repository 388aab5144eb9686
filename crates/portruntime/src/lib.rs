//! Workflow execution runtime
//!
//! This crate turns workflow definitions into executable node graphs: the
//! per-node memoized execution protocol, port-driven routing, the function
//! registry and the runtime facade.

mod graph;
mod node;
mod registry;
mod runtime;

pub use graph::{Graph, NodeFailure, Run, RunOutput};
pub use node::{Node, NodeStatus};
pub use registry::{FunctionRegistry, StartFunction};
pub use runtime::{FlowRuntime, RuntimeConfig};
