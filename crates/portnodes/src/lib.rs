//! Standard function library
//!
//! Small set of built-in functions: the start marker, arithmetic, branching
//! and looping, logging, clock, JSON helpers and the workflow-output
//! publisher.

mod debug;
mod flow;
mod math;
mod time;
mod transform;

pub use debug::DebugLogFunction;
pub use flow::{
    IfFunction, LoopFunction, WorkflowOutputFunction, DONE_PORT, FALSE_PORT, LOOP_PORT, TRUE_PORT,
};
pub use math::{ArithmeticFunction, DivideFunction};
pub use portruntime::StartFunction;
pub use time::{DelayFunction, NowFunction};
pub use transform::{JsonParseFunction, JsonStringifyFunction};

use portruntime::FunctionRegistry;
use std::sync::Arc;

/// Register all standard functions with a registry
pub fn register_all(registry: &mut FunctionRegistry) {
    registry.register(Arc::new(StartFunction::new()));
    registry.register(Arc::new(ArithmeticFunction::add()));
    registry.register(Arc::new(ArithmeticFunction::subtract()));
    registry.register(Arc::new(ArithmeticFunction::multiply()));
    registry.register(Arc::new(DivideFunction::new()));
    registry.register(Arc::new(IfFunction::new()));
    registry.register(Arc::new(LoopFunction::new()));
    registry.register(Arc::new(WorkflowOutputFunction::new()));
    registry.register(Arc::new(DebugLogFunction::new()));
    registry.register(Arc::new(NowFunction::new()));
    registry.register(Arc::new(DelayFunction::new()));
    registry.register(Arc::new(JsonParseFunction::new()));
    registry.register(Arc::new(JsonStringifyFunction::new()));
}

/// A registry holding every standard function
pub fn standard_registry() -> FunctionRegistry {
    let mut registry = FunctionRegistry::new();
    register_all(&mut registry);
    registry
}
