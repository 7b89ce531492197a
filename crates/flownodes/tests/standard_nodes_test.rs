// crates/flownodes/tests/standard_nodes_test.rs

use flowcore::{NodeKind, NodeSpec, SharedStore, Value, Workflow};
use flownodes::{standard_registry, DelayNode, JsonParseNode, JsonStringifyNode};
use flowruntime::{AsyncRunner, Flow, FlowRuntime, NodeRunner, RuntimeConfig};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_json_parse_writes_structured_value() {
    let store = SharedStore::new();
    store.insert("raw", r#"{"name": "flow", "tags": ["a", "b"]}"#);

    let action = NodeRunner::new(JsonParseNode::new("raw", "doc"))
        .run(&store)
        .unwrap();

    assert!(action.is_default());
    let doc = store.get("doc").unwrap();
    let obj = doc.as_object().unwrap();
    assert_eq!(obj["name"], Value::from("flow"));
    assert_eq!(obj["tags"].as_array().map(<[Value]>::len), Some(2));
}

#[test]
fn test_json_parse_failure_routes_error() {
    let store = SharedStore::new();
    store.insert("raw", "{not json");

    let mut flow = Flow::new();
    let parse = flow.add(NodeRunner::new(JsonParseNode::new("raw", "doc")).with_retry(2, Duration::ZERO));
    let recover = flow.add_node(JsonStringifyNode::new("raw", "recovered"));
    flow.connect(parse, "error", recover).unwrap();

    let action = flow.run(&store).unwrap();

    assert!(action.is_default());
    assert!(!store.contains_key("doc"));
    assert!(store.get("error").unwrap().is_error());
    assert_eq!(store.get_str("recovered").unwrap(), "\"{not json\"");
}

#[test]
fn test_stringify_compact() {
    let store = SharedStore::from_json(serde_json::json!({"value": {"a": 1}}));

    NodeRunner::new(JsonStringifyNode::new("value", "json").compact())
        .run(&store)
        .unwrap();

    assert_eq!(store.get_str("json").unwrap(), r#"{"a":1}"#);
}

#[tokio::test]
async fn test_delay_node_waits() {
    let started = Instant::now();
    AsyncRunner::new(DelayNode::new(Duration::from_millis(30)))
        .run(&SharedStore::new())
        .await
        .unwrap();
    assert!(started.elapsed() >= Duration::from_millis(30));
}

#[test]
fn test_standard_registry_contents() {
    let registry = standard_registry();

    assert_eq!(
        registry.list_node_types(),
        vec![
            "debug.log",
            "http.fetch_all",
            "http.request",
            "time.delay",
            "transform.json_parse",
            "transform.json_stringify",
        ]
    );
    assert_eq!(
        registry.get_metadata("http.fetch_all").map(|m| m.kind),
        Some(NodeKind::AsyncParallelBatch)
    );
    assert_eq!(
        registry.get_metadata("time.delay").map(|m| m.kind),
        Some(NodeKind::Async)
    );
}

#[tokio::test]
async fn test_workflow_of_standard_nodes() {
    let mut workflow = Workflow::new("parse and log");
    workflow.add_node(
        NodeSpec::new("parse", "transform.json_parse")
            .with_config("input", "payload")
            .with_config("output", "data"),
    );
    workflow.add_node(NodeSpec::new("wait", "time.delay").with_config("delay_ms", 5));
    workflow.add_node(
        NodeSpec::new("log", "debug.log").with_config("keys", vec![Value::from("data")]),
    );
    workflow.connect("parse", "default", "wait");
    workflow.connect("wait", "default", "log");

    let runtime = FlowRuntime::with_registry(Arc::new(standard_registry()), RuntimeConfig::default());
    let store = SharedStore::from_json(serde_json::json!({"payload": "[1, 2, 3]"}));

    let result = runtime.execute(&workflow, &store).await.unwrap();

    assert!(result.action.is_default());
    assert_eq!(store.get_array("data").unwrap().len(), 3);
}

#[test]
fn test_bad_node_config_is_rejected() {
    let mut workflow = Workflow::new("bad");
    workflow.add_node(NodeSpec::new("wait", "time.delay").with_config("delay_ms", "soon"));

    let result = flowruntime::build_flow(&workflow, &standard_registry(), &RuntimeConfig::default());
    assert!(result.is_err());
}
