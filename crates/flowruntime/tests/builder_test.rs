// crates/flowruntime/tests/builder_test.rs

mod common;

use async_trait::async_trait;
use common::{init_tracing, record_visit, visited};
use flowcore::{
    Action, AsyncNode, AsyncStep, ExecutionEvent, FlowError, Node, NodeContext, NodeError, NodeHandle,
    NodeKind, NodeSpec, SharedStore, Value, Workflow, WorkflowError,
};
use flowruntime::{
    build_flow, AsyncRunner, BuildOptions, FlowRuntime, NodeFactory, NodeMetadata, NodeRegistry,
    NodeRunner, ParallelBatchRunner, RuntimeConfig,
};
use std::collections::HashMap;
use std::sync::Arc;

/// Returns the action named in its config
struct Emit {
    label: String,
    action: String,
}

impl Node for Emit {
    fn name(&self) -> &str {
        &self.label
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, _exec: Value) -> Result<Action, NodeError> {
        record_visit(&ctx.store, &self.label);
        Ok(Action::from(self.action.clone()))
    }
}

struct EmitFactory;

impl NodeFactory for EmitFactory {
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        let label = config
            .get("label")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Configuration("label is required".into()))?;
        let action = config.get("action").and_then(Value::as_str).unwrap_or("");
        let node = Emit {
            label: label.to_string(),
            action: action.to_string(),
        };
        Ok(NodeHandle::Sync(Arc::new(
            NodeRunner::new(node).with_policy(options.retry),
        )))
    }

    fn node_type(&self) -> &str {
        "test.emit"
    }
}

/// Fails until its attempt counter reaches the last allowed attempt
struct LastChance;

#[async_trait]
impl AsyncNode for LastChance {
    async fn exec_async(&self, ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        if ctx.attempt < 2 {
            return Err(NodeError::ExecutionFailed(format!("attempt {}", ctx.attempt)));
        }
        Ok(Value::from("made it"))
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        _prep: Value,
        exec: Value,
    ) -> Result<Action, NodeError> {
        ctx.store.insert("last_chance", exec);
        Ok(Action::default())
    }
}

struct LastChanceFactory;

impl NodeFactory for LastChanceFactory {
    fn create(
        &self,
        _config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        Ok(NodeHandle::Async(Arc::new(
            AsyncRunner::new(LastChance).with_policy(options.retry),
        )))
    }

    fn node_type(&self) -> &str {
        "test.last_chance"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Succeeds on the third attempt".to_string(),
            category: "test".to_string(),
            kind: NodeKind::Async,
            config: vec![],
        }
    }
}

/// Reports the cap it was built with
struct CapFactory;

struct Noop;

#[async_trait]
impl AsyncNode for Noop {}

impl NodeFactory for CapFactory {
    fn create(
        &self,
        _config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        let runner = ParallelBatchRunner::new(Noop).with_max_parallel(options.max_parallel);
        let cap = runner
            .max_parallel()
            .map(|c| c.to_string())
            .unwrap_or_else(|| "none".to_string());
        Ok(NodeHandle::Async(Arc::new(CapReporter { runner, cap })))
    }

    fn node_type(&self) -> &str {
        "test.cap"
    }
}

struct CapReporter {
    runner: ParallelBatchRunner<Noop>,
    cap: String,
}

#[async_trait]
impl AsyncStep for CapReporter {
    fn name(&self) -> &str {
        "cap"
    }

    fn kind(&self) -> NodeKind {
        NodeKind::AsyncParallelBatch
    }

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        ctx.store.insert("cap", self.cap.clone());
        self.runner.run_step(ctx).await
    }
}

fn registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    registry.register(Arc::new(EmitFactory));
    registry.register(Arc::new(LastChanceFactory));
    registry.register(Arc::new(CapFactory));
    registry
}

fn emit(id: &str, action: &str) -> NodeSpec {
    NodeSpec::new(id, "test.emit")
        .with_config("label", id)
        .with_config("action", action)
}

fn agent_like() -> Workflow {
    let mut workflow = Workflow::new("routing");
    workflow.add_node(emit("decide", "answer"));
    workflow.add_node(emit("search", "decide"));
    workflow.add_node(emit("answer", "done"));
    workflow.connect("decide", "search", "search");
    workflow.connect("decide", "answer", "answer");
    workflow.connect("search", "decide", "decide");
    workflow
}

#[tokio::test]
async fn test_built_flow_routes_like_hand_wired_flow() {
    init_tracing();

    let store = SharedStore::new();
    let flow = build_flow(&agent_like(), &registry(), &RuntimeConfig::default()).unwrap();

    let action = flow.run(&store).await.unwrap();

    assert_eq!(action, "done");
    assert_eq!(visited(&store), vec!["decide", "answer"]);
    assert_eq!(flow.name(), "routing");
}

#[tokio::test]
async fn test_explicit_start_node() {
    let store = SharedStore::new();
    let mut workflow = agent_like();
    workflow.start = Some("search".to_string());

    build_flow(&workflow, &registry(), &RuntimeConfig::default())
        .unwrap()
        .run(&store)
        .await
        .unwrap();

    assert_eq!(visited(&store), vec!["search", "decide", "answer"]);
}

#[tokio::test]
async fn test_spec_retry_policy_is_applied() {
    let mut workflow = Workflow::new("retry");
    workflow.add_node(NodeSpec::new("flaky", "test.last_chance").with_retry(3, 0));

    let store = SharedStore::new();
    build_flow(&workflow, &registry(), &RuntimeConfig::default())
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert_eq!(store.get_str("last_chance").unwrap(), "made it");

    // Without a policy the runtime default (one attempt) applies
    let mut workflow = Workflow::new("no_retry");
    workflow.add_node(NodeSpec::new("flaky", "test.last_chance"));

    let store = SharedStore::new();
    build_flow(&workflow, &registry(), &RuntimeConfig::default())
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert!(store.get("last_chance").unwrap().is_error());
}

#[tokio::test]
async fn test_max_parallel_resolution() {
    let mut workflow = Workflow::new("caps");
    workflow.add_node(NodeSpec::new("cap", "test.cap"));

    let store = SharedStore::new();
    build_flow(&workflow, &registry(), &RuntimeConfig::default())
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert_eq!(store.get_str("cap").unwrap(), "10");

    workflow.settings.max_parallel = Some(4);
    build_flow(&workflow, &registry(), &RuntimeConfig::default())
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert_eq!(store.get_str("cap").unwrap(), "4");

    workflow.settings.max_parallel = None;
    let unbounded = RuntimeConfig {
        max_parallel: None,
        ..RuntimeConfig::default()
    };
    build_flow(&workflow, &registry(), &unbounded)
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert_eq!(store.get_str("cap").unwrap(), "none");
}

#[tokio::test]
async fn test_runtime_cap_can_override_workflow_setting() {
    let mut workflow = Workflow::new("caps");
    workflow.add_node(NodeSpec::new("cap", "test.cap"));
    workflow.settings.max_parallel = Some(4);

    let forced = RuntimeConfig {
        max_parallel: Some(2),
        override_workflow_cap: true,
        ..RuntimeConfig::default()
    };
    let store = SharedStore::new();
    build_flow(&workflow, &registry(), &forced)
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert_eq!(store.get_str("cap").unwrap(), "2");

    // Zero lifts the cap, whichever side sets it
    let uncapped = RuntimeConfig {
        max_parallel: Some(0),
        ..forced
    };
    build_flow(&workflow, &registry(), &uncapped)
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert_eq!(store.get_str("cap").unwrap(), "none");

    workflow.settings.max_parallel = Some(0);
    build_flow(&workflow, &registry(), &RuntimeConfig::default())
        .unwrap()
        .run(&store)
        .await
        .unwrap();
    assert_eq!(store.get_str("cap").unwrap(), "none");
}

#[test]
fn test_build_errors() {
    let mut unknown = Workflow::new("unknown");
    unknown.add_node(NodeSpec::new("x", "no.such.type"));
    assert!(matches!(
        build_flow(&unknown, &registry(), &RuntimeConfig::default()),
        Err(FlowError::Workflow(WorkflowError::UnknownNodeType(_)))
    ));

    let mut misconfigured = Workflow::new("misconfigured");
    misconfigured.add_node(NodeSpec::new("x", "test.emit"));
    assert!(matches!(
        build_flow(&misconfigured, &registry(), &RuntimeConfig::default()),
        Err(FlowError::Workflow(WorkflowError::Invalid(_)))
    ));

    let mut dangling = agent_like();
    dangling.connect("answer", "again", "ghost");
    assert!(matches!(
        build_flow(&dangling, &registry(), &RuntimeConfig::default()),
        Err(FlowError::Workflow(WorkflowError::InvalidConnection(_)))
    ));
}

#[tokio::test]
async fn test_runtime_executes_registered_workflow() {
    init_tracing();

    let runtime = FlowRuntime::with_registry(Arc::new(registry()), RuntimeConfig::default());
    let workflow = agent_like();
    let id = workflow.id;
    runtime.register_workflow(workflow).await;

    let mut events = runtime.subscribe_events();
    let store = SharedStore::new();
    let result = runtime.execute_workflow(id, &store).await.unwrap();

    assert_eq!(result.workflow_id, id);
    assert_eq!(result.action, "done");

    let mut node_runs = 0;
    let mut flow_done = false;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::NodeCompleted { .. } => node_runs += 1,
            ExecutionEvent::FlowCompleted { success, .. } => flow_done = success,
            _ => {}
        }
    }
    assert_eq!(node_runs, 2);
    assert!(flow_done);

    let missing = runtime
        .execute_workflow(uuid::Uuid::new_v4(), &store)
        .await;
    assert!(matches!(
        missing,
        Err(FlowError::Workflow(WorkflowError::NotFound(_)))
    ));
}

#[test]
fn test_registry_lookup() {
    let registry = registry();

    assert_eq!(
        registry.list_node_types(),
        vec!["test.cap", "test.emit", "test.last_chance"]
    );
    assert!(registry.contains("test.emit"));
    assert_eq!(
        registry.get_metadata("test.last_chance").map(|m| m.kind),
        Some(NodeKind::Async)
    );
    assert!(registry.get_metadata("nope").is_none());
}
