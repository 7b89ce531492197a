// crates/flowruntime/tests/batch_test.rs

mod common;

use common::init_tracing;
use flowcore::{Action, Node, NodeContext, NodeError, Params, SharedStore, Value};
use flowruntime::{BatchFlow, BatchFlowHooks, BatchRunner, Flow};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Multiplies every number in `input` by ten
struct TimesTen {
    calls: AtomicUsize,
}

impl TimesTen {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
        }
    }
}

impl Node for TimesTen {
    fn prep(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(ctx.store.get("input").unwrap_or_default())
    }

    fn exec(&self, _ctx: &NodeContext, item: &Value) -> Result<Value, NodeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let n = item.as_f64().ok_or_else(|| NodeError::InvalidInputType {
            field: "item".into(),
            expected: "number".into(),
            actual: item.type_name().into(),
        })?;
        Ok(Value::from(n * 10.0))
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, exec: Value) -> Result<Action, NodeError> {
        ctx.store.insert("output", exec);
        Ok(Action::default())
    }
}

fn numbers(store: &SharedStore, key: &str) -> Vec<i64> {
    store
        .get_array(key)
        .unwrap()
        .iter()
        .map(|v| v.as_i64().unwrap())
        .collect()
}

#[test]
fn test_batch_preserves_order() {
    init_tracing();

    let store = SharedStore::new();
    store.insert("input", vec![Value::from(1), Value::from(2), Value::from(3)]);

    let runner = BatchRunner::new(TimesTen::new());
    runner.run(&store).unwrap();

    assert_eq!(numbers(&store, "output"), vec![10, 20, 30]);
    assert_eq!(runner.node().calls.load(Ordering::SeqCst), 3);
}

#[test]
fn test_absent_or_empty_input_yields_empty_output() {
    for input in [None, Some(Value::Array(vec![])), Some(Value::from("not a list"))] {
        let store = SharedStore::new();
        if let Some(input) = input {
            store.insert("input", input);
        }

        let runner = BatchRunner::new(TimesTen::new());
        runner.run(&store).unwrap();

        assert!(numbers(&store, "output").is_empty());
        assert_eq!(runner.node().calls.load(Ordering::SeqCst), 0);
    }
}

#[test]
fn test_failed_item_falls_back_in_place() {
    let store = SharedStore::new();
    store.insert("input", vec![Value::from(1), Value::from("two"), Value::from(3)]);

    BatchRunner::new(TimesTen::new()).run(&store).unwrap();

    let output = store.get_array("output").unwrap();
    assert_eq!(output.len(), 3);
    assert_eq!(output[0].as_i64(), Some(10));
    assert!(output[1].is_error());
    assert_eq!(output[2].as_i64(), Some(30));
}

/// Copies `file` from its params into the `processed` list
struct Process;

impl Node for Process {
    fn post(&self, ctx: &NodeContext, _prep: Value, _exec: Value) -> Result<Action, NodeError> {
        let entry = format!(
            "{}{}",
            ctx.require_param("file")?.as_str().unwrap_or_default(),
            ctx.param_or("suffix", Value::from("")).as_str().unwrap_or_default(),
        );
        ctx.store.update("processed", |v| match v {
            Value::Array(items) => items.push(Value::from(entry.clone())),
            other => *other = Value::Array(vec![Value::from(entry.clone())]),
        });
        Ok(Action::default())
    }
}

struct Files(Vec<&'static str>);

impl BatchFlowHooks for Files {
    fn prep(&self, _ctx: &NodeContext) -> Result<Vec<Params>, NodeError> {
        Ok(self
            .0
            .iter()
            .map(|f| Params::from([("file".to_string(), Value::from(*f))]))
            .collect())
    }

    fn post(&self, ctx: &NodeContext, prep: Vec<Params>) -> Result<Action, NodeError> {
        ctx.store.insert("runs", prep.len());
        Ok(Action::from("all_done"))
    }
}

#[test]
fn test_batch_flow_runs_once_per_params_map() {
    init_tracing();

    let store = SharedStore::new();
    let mut flow = Flow::new().with_params(Params::from([
        ("suffix".to_string(), Value::from("!")),
        ("file".to_string(), Value::from("overridden")),
    ]));
    flow.add_node(Process);

    let batch = BatchFlow::new(flow, Files(vec!["a.txt", "b.txt"]));
    let action = batch.run(&store).unwrap();

    assert_eq!(action, "all_done");
    assert_eq!(store.get_i64("runs").unwrap(), 2);
    let processed: Vec<String> = store
        .get_array("processed")
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect();
    assert_eq!(processed, vec!["a.txt!", "b.txt!"]);
}

#[test]
fn test_batch_flow_with_no_batches_only_posts() {
    let store = SharedStore::new();
    let mut flow = Flow::new();
    flow.add_node(Process);

    let action = BatchFlow::new(flow, Files(vec![])).run(&store).unwrap();

    assert_eq!(action, "all_done");
    assert!(!store.contains_key("processed"));
}
