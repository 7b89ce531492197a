// crates/flowcli/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flowcore::{ExecutionEvent, NodeEvent, NodeSpec, SharedStore, Workflow};
use flowruntime::{FlowRuntime, RuntimeConfig};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "flow")]
#[command(about = "Flow Engine CLI", long_about = None)]
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

        /// Initial store contents as a JSON object
        #[arg(short, long)]
        input: Option<String>,

        /// Cap on concurrently running batch items (0 for no cap)
        #[arg(long)]
        max_parallel: Option<usize>,

        /// Show verbose output
        #[arg(short, long)]
        verbose: bool,
    },

    /// Validate a workflow file
    Validate {
        /// Path to workflow JSON file
        file: PathBuf,
    },

    /// List available node types
    Nodes,

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

fn load_workflow(file: &Path) -> Result<Workflow> {
    let workflow_json = std::fs::read_to_string(file)
        .with_context(|| format!("reading {}", file.display()))?;
    let workflow: Workflow = serde_json::from_str(&workflow_json)
        .with_context(|| format!("parsing {}", file.display()))?;
    Ok(workflow)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            file,
            input,
            max_parallel,
            verbose,
        } => {
            init_logging(verbose);
            run_workflow(&file, input, max_parallel).await?;
        }

        Commands::Validate { file } => {
            init_logging(false);
            validate_workflow(&file)?;
        }

        Commands::Nodes => {
            list_nodes();
        }

        Commands::Init { output } => {
            create_example_workflow(&output)?;
        }
    }

    Ok(())
}

async fn run_workflow(file: &Path, input: Option<String>, max_parallel: Option<usize>) -> Result<()> {
    println!("🚀 Loading workflow from: {}", file.display());

    let workflow = load_workflow(file)?;

    println!("📋 Workflow: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Transitions: {}", workflow.transitions.len());
    println!();

    let store = match input {
        Some(input_str) => {
            let json: serde_json::Value = serde_json::from_str(&input_str)?;
            if !json.is_object() {
                return Err(anyhow::anyhow!("Input must be a JSON object"));
            }
            SharedStore::from_json(json)
        }
        None => SharedStore::new(),
    };

    let mut config = RuntimeConfig::default();
    if let Some(cap) = max_parallel {
        config.max_parallel = Some(cap);
        config.override_workflow_cap = true;
    }
    let runtime = FlowRuntime::with_registry(Arc::new(flownodes::standard_registry()), config);

    // Subscribe to events for real-time output
    let mut events = runtime.subscribe_events();

    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                ExecutionEvent::FlowStarted { flow, .. } => {
                    println!("▶️  Flow '{}' started", flow);
                }
                ExecutionEvent::NodeStarted { name, kind, .. } => {
                    println!("  ⚡ Starting node: {} ({})", name, kind);
                }
                ExecutionEvent::NodeCompleted {
                    node_id,
                    action,
                    duration_ms,
                    ..
                } => {
                    println!("  ✅ Node {} -> '{}' in {}ms", node_id, action, duration_ms);
                }
                ExecutionEvent::NodeRetry {
                    node_id,
                    attempt,
                    error,
                    ..
                } => {
                    println!("  🔁 Node {} attempt {} failed: {}", node_id, attempt, error);
                }
                ExecutionEvent::NodeFallback { node_id, error, .. } => {
                    println!("  ❌ Node {} fell back: {}", node_id, error);
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
                            println!("     📊 [{}] {}% - {}", node_id, percent, msg);
                        } else {
                            println!("     📊 [{}] {}%", node_id, percent);
                        }
                    }
                    NodeEvent::Data { key, value } => {
                        println!("     📎 [{}] {} = {:?}", node_id, key, value);
                    }
                },
                ExecutionEvent::FlowCompleted {
                    flow,
                    success,
                    duration_ms,
                    ..
                } => {
                    if success {
                        println!("✨ Flow '{}' completed in {}ms", flow, duration_ms);
                    } else {
                        println!("💥 Flow '{}' failed after {}ms", flow, duration_ms);
                    }
                }
            }
        }
    });

    let result = runtime.execute(&workflow, &store).await;

    // Wait for events to finish printing
    tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    event_task.abort();

    let result = result?;
    println!();
    println!("📊 Execution Summary:");
    println!("   Final action: {}", result.action);
    println!("   Duration: {}ms", result.duration_ms);
    println!();
    println!("📤 Store:");
    println!("{}", serde_json::to_string_pretty(&store.to_json())?);

    Ok(())
}

fn validate_workflow(file: &Path) -> Result<()> {
    println!("🔍 Validating workflow: {}", file.display());

    let workflow = load_workflow(file)?;
    let report = workflow.validate()?;

    let registry = flownodes::standard_registry();
    let unknown: Vec<&NodeSpec> = workflow
        .nodes
        .iter()
        .filter(|spec| !registry.contains(&spec.node_type))
        .collect();
    if !unknown.is_empty() {
        for spec in &unknown {
            println!("❌ Node '{}' has unknown type '{}'", spec.id, spec.node_type);
        }
        anyhow::bail!("{} node(s) with unknown type", unknown.len());
    }

    println!("✅ Workflow is valid:");
    println!("   Name: {}", workflow.name);
    println!("   Nodes: {}", workflow.nodes.len());
    println!("   Transitions: {}", workflow.transitions.len());
    println!("   Start: {}", report.start);
    for id in &report.unreachable {
        println!("   ⚠️  Unreachable from start: {}", id);
    }
    for transition in &report.overwritten {
        println!("   ⚠️  Transition defined more than once: {}", transition);
    }

    Ok(())
}

fn list_nodes() {
    println!("📦 Available Node Types:");
    println!();

    let registry = flownodes::standard_registry();

    for node_type in registry.list_node_types() {
        if let Some(metadata) = registry.get_metadata(&node_type) {
            println!("  • {} ({}, {})", node_type, metadata.category, metadata.kind);
            println!("    {}", metadata.description);
            for field in &metadata.config {
                let marker = if field.required { "required" } else { "optional" };
                println!("      - {} [{}]: {}", field.name, marker, field.description);
            }
        } else {
            println!("  • {}", node_type);
        }
    }
}

fn create_example_workflow(output: &Path) -> Result<()> {
    let mut workflow = Workflow::new("Example HTTP Workflow");
    workflow.description =
        Some("Fetches a url, parses the JSON body and logs it; parse failures are logged too".to_string());

    let fetch = workflow.add_node(
        NodeSpec::new("fetch", "http.request")
            .with_name("Fetch Data")
            .with_config("method", "GET")
            .with_retry(3, 500),
    );
    let parse = workflow.add_node(
        NodeSpec::new("parse", "transform.json_parse")
            .with_name("Parse Body")
            .with_config("input", "body")
            .with_config("output", "data"),
    );
    let log = workflow.add_node(
        NodeSpec::new("log", "debug.log").with_name("Log Result"),
    );

    workflow.connect(fetch.clone(), "default", parse.clone());
    workflow.connect(parse.clone(), "default", log.clone());
    workflow.connect(parse, "error", log);
    workflow.start = Some(fetch);

    let json = serde_json::to_string_pretty(&workflow)?;
    std::fs::write(output, json)?;

    println!("✨ Created example workflow: {}", output.display());
    println!();
    println!("Run it with:");
    println!(
        "  flow run --file {} --input '{{\"url\": \"https://httpbin.org/json\"}}'",
        output.display()
    );

    Ok(())
}
