// crates/portnodes/tests/scenarios_test.rs

use async_trait::async_trait;
use portcore::{
    ExecutionEvent, Invocation, NodeDefinition, NodeError, NodeEvent, NodeFunction, Returned, RunContext,
    Signature, WorkflowDefinition, START_FUNCTION,
};
use portnodes::{standard_registry, ArithmeticFunction, FALSE_PORT, TRUE_PORT};
use portruntime::{FlowRuntime, FunctionRegistry, Graph, NodeStatus, RuntimeConfig};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Wraps a function and counts how often it is invoked.
struct Counted {
    inner: Arc<dyn NodeFunction>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl NodeFunction for Counted {
    fn signature(&self) -> &Signature {
        self.inner.signature()
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Returned, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.invoke(invocation).await
    }
}

fn build(workflow: &WorkflowDefinition, registry: &FunctionRegistry) -> Graph {
    Graph::build(workflow, registry, &RuntimeConfig::default()).expect("graph should build")
}

#[tokio::test]
async fn test_add_two_literals() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("add");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let add = workflow.add_node(
        NodeDefinition::new("math.add")
            .with_input("a", "5")
            .with_input("b", "10"),
    );
    workflow.connect(start, add);

    let mut graph = build(&workflow, &registry);
    let output = graph.run(RunContext::new()).await.unwrap();

    let result = graph.node(add).unwrap().result().unwrap();
    assert_eq!(result.get("output.result"), Some(&json!(15)));
    assert!(output.is_success());
}

#[tokio::test]
async fn test_if_routes_to_multiply() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("if true");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let branch = workflow.add_node(NodeDefinition::new("logic.if").with_input("condition", "true"));
    let multiply = workflow.add_node(
        NodeDefinition::new("math.multiply")
            .with_input("a", "10")
            .with_input("b", "2"),
    );
    workflow.connect(start, branch);
    workflow.connect_port(branch, TRUE_PORT, multiply);

    let mut graph = build(&workflow, &registry);
    let output = graph.run(RunContext::new()).await.unwrap();

    assert_eq!(
        output.node_result(multiply),
        Some(&json!({ "output": { "result": 20 } }))
    );
}

#[tokio::test]
async fn test_if_never_runs_target_on_unfired_port() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("if true, false wired");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let branch = workflow.add_node(NodeDefinition::new("logic.if").with_input("condition", "true"));
    let multiply = workflow.add_node(
        NodeDefinition::new("math.multiply")
            .with_input("a", "10")
            .with_input("b", "2"),
    );
    workflow.connect(start, branch);
    workflow.connect_port(branch, FALSE_PORT, multiply);

    let mut graph = build(&workflow, &registry);
    let output = graph.run(RunContext::new()).await.unwrap();

    assert_eq!(graph.node(multiply).unwrap().status(), NodeStatus::Idle);
    assert_eq!(output.node_result(multiply), None);
    assert_eq!(output.executed, 2);
}

#[tokio::test]
async fn test_condition_from_workflow_parameter() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("param branch");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let branch = workflow.add_node(NodeDefinition::new("logic.if").with_input("condition", "input.enabled"));
    let on_true = workflow.add_node(NodeDefinition::new("debug.log").with_input("message", "yes"));
    let on_false = workflow.add_node(NodeDefinition::new("debug.log").with_input("message", "no"));
    workflow.connect(start, branch);
    workflow.connect_port(branch, TRUE_PORT, on_true);
    workflow.connect_port(branch, FALSE_PORT, on_false);

    let mut graph = build(&workflow, &registry);
    graph
        .run(RunContext::new().with_parameter("enabled", "false"))
        .await
        .unwrap();

    assert_eq!(graph.node(on_true).unwrap().status(), NodeStatus::Idle);
    assert_eq!(graph.node(on_false).unwrap().status(), NodeStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_siblings_share_one_upstream_invocation() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut registry = standard_registry();
    registry.register(Arc::new(Counted {
        inner: Arc::new(ArithmeticFunction::add()),
        calls: Arc::clone(&calls),
    }));

    let mut workflow = WorkflowDefinition::new("siblings");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let add = workflow.add_node(
        NodeDefinition::new("math.add")
            .with_input("a", "10")
            .with_input("b", "20"),
    );
    let left = workflow.add_node(
        NodeDefinition::new("math.multiply")
            .with_input("a", "input.result")
            .with_input("b", "1"),
    );
    let right = workflow.add_node(NodeDefinition::new("debug.log").with_input("message", "input.result"));
    workflow.connect(start, add);
    workflow.connect(add, left);
    workflow.connect(add, right);

    let mut graph = build(&workflow, &registry);
    let output = graph.run(RunContext::new()).await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1, "upstream must be invoked once");
    assert_eq!(output.node_result(left), Some(&json!({ "output": { "result": 30 } })));
    assert_eq!(output.node_result(right), Some(&json!({ "output": { "result": "30" } })));
}

#[tokio::test]
async fn test_loop_fires_body_and_done() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("loop");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let looping = workflow.add_node(NodeDefinition::new("flow.loop").with_input("count", "input.times"));
    let body = workflow.add_node(NodeDefinition::new("debug.log").with_input("message", "tick"));
    let finish = workflow.add_node(
        NodeDefinition::new("workflow.output")
            .with_input("name", "iterations")
            .with_input("value", "input.iterations"),
    );
    workflow.connect(start, looping);
    workflow.connect_port(looping, "loop", body);
    workflow.connect_port(looping, "done", finish);

    let mut graph = build(&workflow, &registry);
    let mut events = graph.subscribe();
    let output = graph.run(RunContext::new().with_parameter("times", 3)).await.unwrap();

    assert!(output.is_success(), "failures: {:?}", output.failures);
    assert_eq!(output.output("iterations"), Some(&json!(3)));
    assert_eq!(
        output.document.get(&format!("nodes.{}.iteration", looping)),
        Some(&json!(2))
    );

    let mut body_starts = 0;
    let mut loop_fires = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::NodeStarted { node_id, .. } if node_id == body => body_starts += 1,
            ExecutionEvent::PortFired { ref port, .. } if port == "loop" => loop_fires += 1,
            _ => {}
        }
    }
    assert_eq!(loop_fires, 3);
    assert_eq!(body_starts, 1, "port targets are memoized within a run");
}

#[tokio::test]
async fn test_debug_log_emits_node_event() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("log");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let log = workflow.add_node(
        NodeDefinition::new("debug.log").with_input("message", "Hello {{ workflow.parameters.who | upcase }}"),
    );
    workflow.connect(start, log);

    let mut graph = build(&workflow, &registry);
    let mut events = graph.subscribe();
    let output = graph.run(RunContext::new().with_parameter("who", "ada")).await.unwrap();

    assert_eq!(output.node_result(log), Some(&json!({ "output": { "result": "Hello ADA" } })));

    let mut messages = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::NodeEvent {
            event: NodeEvent::Info { message },
            ..
        } = event
        {
            messages.push(message);
        }
    }
    assert_eq!(messages, vec!["DEBUG: Hello ADA".to_string()]);
}

#[tokio::test]
async fn test_now_exposes_calendar_members() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("now");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let now = workflow.add_node(NodeDefinition::new("time.now"));
    workflow.connect(start, now);

    let mut graph = build(&workflow, &registry);
    graph.run(RunContext::new()).await.unwrap();

    let result = graph.node(now).unwrap().result().unwrap();
    for member in ["year", "month", "day", "hour", "minute", "second", "weekday", "timestamp", "iso"] {
        assert!(result.contains(&format!("output.{}", member)), "missing output.{}", member);
    }
    assert!(result.get("output.year").and_then(|v| v.as_i64()).unwrap() >= 2024);
}

#[tokio::test]
async fn test_json_parse_spreads_members() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("json");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let parse = workflow.add_node(NodeDefinition::new("transform.json_parse").with_input("json", "input.payload"));
    let stringify = workflow.add_node(
        NodeDefinition::new("transform.json_stringify").with_input("value", "input.items"),
    );
    let bad = workflow.add_node(NodeDefinition::new("transform.json_parse").with_input("json", "{not json"));
    workflow.connect(start, parse);
    workflow.connect(parse, stringify);
    workflow.connect(start, bad);

    let mut graph = build(&workflow, &registry);
    let output = graph
        .run(RunContext::new().with_parameter("payload", r#"{"items":[1,2]}"#))
        .await
        .unwrap();

    assert_eq!(
        output.node_result(parse),
        Some(&json!({ "output": { "items": [1, 2] } }))
    );
    assert_eq!(
        output.node_result(stringify),
        Some(&json!({ "output": { "result": "[\n  1,\n  2\n]" } }))
    );
    assert_eq!(output.failures.len(), 1);
    assert_eq!(output.failures[0].node_id, bad);
}

#[tokio::test]
async fn test_division_by_zero_is_a_node_failure() {
    let registry = standard_registry();

    let mut workflow = WorkflowDefinition::new("divide");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let divide = workflow.add_node(
        NodeDefinition::new("math.divide")
            .with_input("a", "1")
            .with_input("b", "0"),
    );
    workflow.connect(start, divide);

    let mut graph = build(&workflow, &registry);
    let output = graph.run(RunContext::new()).await.unwrap();

    assert_eq!(output.failures.len(), 1);
    assert_eq!(
        graph.node(divide).unwrap().error_message().as_deref(),
        Some("Execution failed: division by zero")
    );
}

#[tokio::test]
async fn test_runtime_registers_and_executes_by_id() {
    let runtime = FlowRuntime::with_registry(Arc::new(standard_registry()), RuntimeConfig::default());

    let mut workflow = WorkflowDefinition::new("registered");
    let start = workflow.add_node(NodeDefinition::new(START_FUNCTION));
    let publish = workflow.add_node(
        NodeDefinition::new("workflow.output")
            .with_input("name", "greeting")
            .with_input("value", "{{ input.name | prepend: 'hi ' }}"),
    );
    workflow.connect(start, publish);

    let id = runtime.register_workflow(&workflow).await.unwrap();
    let mut events = runtime.subscribe_events();

    let first = runtime
        .execute_workflow(id, RunContext::new().with_parameter("name", "ada"))
        .await
        .unwrap();
    let second = runtime
        .execute_workflow(id, RunContext::new().with_parameter("name", "bob"))
        .await
        .unwrap();

    assert_eq!(first.output("greeting"), Some(&json!("hi ada")));
    assert_eq!(second.output("greeting"), Some(&json!("hi bob")));

    let mut completed_runs = 0;
    while let Ok(event) = events.try_recv() {
        if let ExecutionEvent::RunCompleted { success: true, .. } = event {
            completed_runs += 1;
        }
    }
    assert_eq!(completed_runs, 2);

    assert!(runtime
        .execute_workflow(uuid_like_missing(), RunContext::new())
        .await
        .is_err());
}

fn uuid_like_missing() -> portcore::WorkflowId {
    portcore::WorkflowDefinition::new("never registered").id
}

#[test]
fn test_standard_registry_contents() {
    let registry = standard_registry();
    let keys = registry.list_functions();

    for key in [
        START_FUNCTION,
        "math.add",
        "math.multiply",
        "logic.if",
        "flow.loop",
        "workflow.output",
        "debug.log",
        "time.now",
    ] {
        assert!(keys.iter().any(|k| k == key), "missing {}", key);
    }
    assert_eq!(
        registry.signature("logic.if").map(|s| s.ports.clone()),
        Some(vec![TRUE_PORT.to_string(), FALSE_PORT.to_string()])
    );
}
