// crates/portcli/src/main.rs

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use portcore::{ExecutionEvent, NodeDefinition, NodeEvent, RunContext, WorkflowDefinition};
use portruntime::{FlowRuntime, Graph, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "portflow")]
#[command(about = "Port-driven flow graph CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Execute a workflow file
    Run {
        /// Path to workflow JSON file
        #[arg(short, long)]
        file: PathBuf,

        /// Workflow parameters as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Environment value exposed as `environment.<KEY>`
        #[arg(short, long = "env", value_name = "KEY=VALUE")]
        env: Vec<String>,

        /// Expose the process environment to the workflow
        #[arg(long)]
        inherit_env: bool,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available functions
    Functions,

    /// Create a new example workflow
    Init {
        /// Output file path
        #[arg(short, long, default_value = "workflow.json")]
        output: PathBuf,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            env,
            inherit_env,
            verbose,
        } => {
            init_logging(verbose);
            let context = run_context(input.as_deref(), &env, inherit_env)?;
            run_workflow(&file, context).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file)?;
        }

        Commands::Functions => {
            list_functions();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

fn load_workflow(file: &Path) -> Result<WorkflowDefinition> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read workflow file {}", file.display()))?;
    serde_json::from_str(&json).with_context(|| format!("{} is not a valid workflow", file.display()))
}

fn run_context(input: Option<&str>, env: &[String], inherit_env: bool) -> Result<RunContext> {
    let mut context = RunContext::new();
    if inherit_env {
        context = context.inherit_environment();
    }

    if let Some(input) = input {
        let json: serde_json::Value = serde_json::from_str(input).context("--input is not valid JSON")?;
        let serde_json::Value::Object(parameters) = json else {
            bail!("Input must be a JSON object");
        };
        for (name, value) in parameters {
            context = context.with_parameter(name, value);
        }
    }

    for pair in env {
        let Some((key, value)) = pair.split_once('=') else {
            bail!("--env expects KEY=VALUE, got '{}'", pair);
        };
        context = context.with_env(key.trim(), value);
    }
    Ok(context)
}

async fn run_workflow(file: &Path, context: RunContext) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());
    println!();

    let runtime = FlowRuntime::with_registry(Arc::new(portnodes::standard_registry()), RuntimeConfig::default());

    // Subscribe before running so no event is missed
    let mut events = runtime.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::RunStarted { entry_nodes, .. } => {
                    println!("▶️  Workflow started ({} entry nodes)", entry_nodes.len());
                }
                ExecutionEvent::NodeStarted { node_id, function, .. } => {
                    println!("  ⚡ Starting node: {} ({})", node_id, function);
                }
                ExecutionEvent::NodeCompleted { node_id, duration_ms, .. } => {
                    println!("  ✅ Node {} completed in {}ms", node_id, duration_ms);
                }
                ExecutionEvent::NodeFailed {
                    node_id,
                    node_name,
                    error,
                    ..
                } => {
                    let label = node_name.unwrap_or_else(|| node_id.to_string());
                    println!("  ❌ Node {} failed: {}", label, error);
                }
                ExecutionEvent::PortFired { node_id, port, .. } => {
                    println!("  🔀 Node {} fired port '{}'", node_id, port);
                }
                ExecutionEvent::NodeEvent { node_id, event, .. } => match event {
                    NodeEvent::Info { message } => {
                        println!("     ℹ️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Warning { message } => {
                        println!("     ⚠️  [{}] {}", node_id, message);
                    }
                    NodeEvent::Progress { percent, message } => {
                        if let Some(msg) = message {
                            println!("     📊 [{}] {:.0}% - {}", node_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {:.0}%", node_id, percent);
                        }
                    }
                    NodeEvent::Data { key, value } => {
                        println!("     📎 [{}] {} = {}", node_id, key, value);
                    }
                },
                ExecutionEvent::RunCompleted { success, duration_ms, .. } => {
                    if success {
                        println!("✨ Workflow completed in {}ms", duration_ms);
                    } else {
                        println!("💥 Workflow failed after {}ms", duration_ms);
                    }
                    break;
                }
            }
        }
    });

    let result = runtime.execute(&workflow, context).await?;

    // Let the listener print the tail of the event stream
    let _ = tokio::time::timeout(std::time::Duration::from_millis(200), event_task).await;

    println!();
    println!("📊 Execution Summary:");
    println!("   Execution ID: {}", result.execution_id);
    println!("   Executed: {}/{} nodes", result.executed, workflow.nodes.len());

    if !result.failures.is_empty() {
        println!();
        println!("❌ Failures:");
        for failure in &result.failures {
            let label = failure.node_name.clone().unwrap_or_else(|| failure.node_id.to_string());
            println!("   {}: {}", label, failure.message);
        }
    }

    if let Some(outputs) = result.document.get("workflow.output") {
        println!();
        println!("📤 Outputs:");
        println!("{}", serde_json::to_string_pretty(outputs)?);
    }

    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let registry = portnodes::standard_registry();
    let graph = Graph::build(&workflow, &registry, &RuntimeConfig::default())
        .with_context(|| format!("workflow '{}' is not runnable", workflow.name))?;

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Connections: {}", workflow.connections.len());

    let entries = graph.entry_nodes();
    if entries.is_empty() {
        println!("⚠️  No entry nodes: nothing will run");
    } else {
        println!("   Entry nodes: {}", entries.len());
    }

    for cycle in graph.data_cycles() {
        let ids: Vec<String> = cycle.iter().map(ToString::to_string).collect();
        println!("⚠️  Data dependency cycle: {}", ids.join(" -> "));
    }

    Ok(())
}

fn list_functions() {
    println!("📦 Available Functions:");
    println!();

    let registry = portnodes::standard_registry();

    for signature in registry.signatures() {
        println!("  • {} ({})", signature.key, signature.category);
        if !signature.description.is_empty() {
            println!("    {}", signature.description);
        }
        let parameters: Vec<String> = signature
            .parameters
            .iter()
            .filter(|p| !p.ty.is_injected())
            .map(|p| format!("{}: {}", p.name, p.ty.name()))
            .collect();
        if !parameters.is_empty() {
            println!("    params: {}", parameters.join(", "));
        }
        if !signature.ports.is_empty() {
            println!("    ports: {}", signature.ports.join(", "));
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = WorkflowDefinition::new("Example Branching Workflow");
    workflow.description = Some("Adds two parameters and doubles the sum when asked to".to_string());

    let start = workflow.add_node(
        NodeDefinition::new(portcore::START_FUNCTION)
            .with_name("Start")
            .with_position(50.0, 100.0),
    );

    let add = workflow.add_node(
        NodeDefinition::new("math.add")
            .with_name("Add")
            .with_input("a", "input.a")
            .with_input("b", "input.b")
            .with_position(200.0, 100.0),
    );

    let log = workflow.add_node(
        NodeDefinition::new("debug.log")
            .with_name("Log Sum")
            .with_input("message", "Sum is {{ input.result }}")
            .with_position(350.0, 50.0),
    );

    let branch = workflow.add_node(
        NodeDefinition::new("logic.if")
            .with_name("Double?")
            .with_input("condition", "workflow.parameters.double")
            .with_position(350.0, 150.0),
    );

    let multiply = workflow.add_node(
        NodeDefinition::new("math.multiply")
            .with_name("Double")
            .with_input("a", format!("nodes.{}.output.result", add))
            .with_input("b", "2")
            .with_position(500.0, 150.0),
    );

    let publish = workflow.add_node(
        NodeDefinition::new("workflow.output")
            .with_name("Publish")
            .with_input("name", "doubled")
            .with_input("value", "input.result")
            .with_position(650.0, 150.0),
    );

    workflow.connect(start, add);
    workflow.connect(add, log);
    workflow.connect(add, branch);
    workflow.connect_port(branch, portnodes::TRUE_PORT, multiply);
    workflow.connect(multiply, publish);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  portflow run --file {} --input '{{\"a\": 5, \"b\": 10, \"double\": true}}'",
        output.display()
    );

    Ok(())
}
