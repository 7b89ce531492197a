// crates/flowruntime/tests/retry_test.rs

mod common;

use async_trait::async_trait;
use common::init_tracing;
use flowcore::{
    Action, AsyncNode, EventBus, ExecutionEvent, ExecutionId, FlowError, Node, NodeContext,
    NodeError, RetryPolicy, SharedStore, Value,
};
use flowruntime::{exec_with_retry, exec_with_retry_async, AsyncRunner, NodeRunner};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Fails its first `failures` exec calls, then succeeds with the attempt number
struct Flaky {
    failures: u32,
    calls: AtomicU32,
    attempts_seen: Mutex<Vec<u32>>,
}

impl Flaky {
    fn new(failures: u32) -> Self {
        Self {
            failures,
            calls: AtomicU32::new(0),
            attempts_seen: Mutex::new(Vec::new()),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempt(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.attempts_seen.lock().unwrap().push(ctx.attempt);
        if call <= self.failures {
            Err(NodeError::ExecutionFailed(format!("failure {}", call)))
        } else {
            Ok(Value::from(ctx.attempt as i64))
        }
    }
}

impl Node for Flaky {
    fn exec(&self, ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        self.attempt(ctx)
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, exec: Value) -> Result<Action, NodeError> {
        ctx.store.insert("result", exec);
        Ok(Action::default())
    }
}

#[async_trait]
impl AsyncNode for Flaky {
    async fn exec_async(&self, ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        self.attempt(ctx)
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        _prep: Value,
        exec: Value,
    ) -> Result<Action, NodeError> {
        ctx.store.insert("result", exec);
        Ok(Action::default())
    }
}

fn listening_context(bus: &EventBus) -> NodeContext {
    NodeContext::with_events(
        SharedStore::new(),
        bus.create_emitter(ExecutionId::new_v4(), uuid::Uuid::new_v4()),
    )
}

#[test]
fn test_always_failing_exec_runs_max_retries_then_falls_back() {
    init_tracing();

    let node = Flaky::new(u32::MAX);
    let bus = EventBus::new(64);
    let mut events = bus.subscribe();
    let ctx = listening_context(&bus);
    let policy = RetryPolicy::new(3, Duration::ZERO);

    let result = exec_with_retry(&node, &policy, &ctx, &Value::Null).unwrap();

    assert_eq!(node.calls(), 3);
    // The default fallback surfaces the last error as the result
    assert_eq!(result, Value::from(NodeError::ExecutionFailed("failure 3".into())));
    assert_eq!(*node.attempts_seen.lock().unwrap(), vec![0, 1, 2]);

    let mut retries = 0;
    let mut fallbacks = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            ExecutionEvent::NodeRetry { .. } => retries += 1,
            ExecutionEvent::NodeFallback { .. } => fallbacks += 1,
            _ => {}
        }
    }
    assert_eq!(retries, 2);
    assert_eq!(fallbacks, 1);
}

#[test]
fn test_waits_between_attempts_only() {
    let node = Flaky::new(u32::MAX);
    let ctx = NodeContext::new(SharedStore::new());
    let policy = RetryPolicy::new(3, Duration::from_millis(30));

    let started = Instant::now();
    exec_with_retry(&node, &policy, &ctx, &Value::Null).unwrap();
    let elapsed = started.elapsed();

    // two waits for three attempts
    assert!(elapsed >= Duration::from_millis(60), "waited {:?}", elapsed);
    assert!(elapsed < Duration::from_millis(500), "waited {:?}", elapsed);
}

#[test]
fn test_sub_millisecond_waits_are_kept() {
    let node = Flaky::new(u32::MAX);
    let ctx = NodeContext::new(SharedStore::new());
    let policy = RetryPolicy::new(3, Duration::from_micros(900));
    assert_eq!(policy.wait(), Duration::from_micros(900));

    let started = Instant::now();
    exec_with_retry(&node, &policy, &ctx, &Value::Null).unwrap();

    assert_eq!(node.calls(), 3);
    assert!(started.elapsed() >= Duration::from_micros(1800));
}

#[test]
fn test_success_after_failures_returns_immediately() {
    let node = NodeRunner::new(Flaky::new(1)).with_retry(3, Duration::ZERO);
    let store = SharedStore::new();

    node.run(&store).unwrap();

    assert_eq!(node.node().calls(), 2);
    assert_eq!(store.get_i64("result").unwrap(), 1);
}

#[test]
fn test_single_attempt_by_default() {
    let node = NodeRunner::new(Flaky::new(u32::MAX));
    let store = SharedStore::new();

    let action = node.run(&store).unwrap();

    assert_eq!(node.node().calls(), 1);
    assert!(action.is_default());
    assert!(store.get("result").unwrap().is_error());
}

struct Panicky;

impl Node for Panicky {
    fn exec(&self, _ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        panic!("boom");
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, exec: Value) -> Result<Action, NodeError> {
        ctx.store.insert("result", exec);
        Ok(Action::from("recovered"))
    }
}

#[test]
fn test_panic_in_exec_is_recovered_as_error() {
    let store = SharedStore::new();
    let action = NodeRunner::new(Panicky)
        .with_retry(2, Duration::ZERO)
        .run(&store)
        .unwrap();

    assert_eq!(action, "recovered");
    assert_eq!(
        store.get("result"),
        Some(Value::from(NodeError::Panicked("boom".to_string())))
    );
}

struct Escalating;

impl Node for Escalating {
    fn exec(&self, _ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        Err(NodeError::ExecutionFailed("unavailable".into()))
    }

    fn exec_fallback(
        &self,
        _ctx: &NodeContext,
        _prep: &Value,
        error: NodeError,
    ) -> Result<Value, NodeError> {
        Err(error)
    }
}

#[test]
fn test_fallback_error_escalates() {
    let result = NodeRunner::new(Escalating)
        .with_retry(2, Duration::ZERO)
        .run(&SharedStore::new());

    assert!(matches!(
        result,
        Err(FlowError::Node(NodeError::ExecutionFailed(_)))
    ));
}

struct CustomFallback;

impl Node for CustomFallback {
    fn exec(&self, _ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        Err(NodeError::ExecutionFailed("unavailable".into()))
    }

    fn exec_fallback(
        &self,
        _ctx: &NodeContext,
        _prep: &Value,
        _error: NodeError,
    ) -> Result<Value, NodeError> {
        Ok(Value::from("cached answer"))
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, exec: Value) -> Result<Action, NodeError> {
        ctx.store.insert("result", exec);
        Ok(Action::default())
    }
}

#[test]
fn test_fallback_result_replaces_exec_result() {
    let store = SharedStore::new();
    NodeRunner::new(CustomFallback).run(&store).unwrap();

    assert_eq!(store.get_str("result").unwrap(), "cached answer");
}

#[tokio::test]
async fn test_async_retry_matches_sync_semantics() {
    init_tracing();

    let node = Flaky::new(u32::MAX);
    let ctx = NodeContext::new(SharedStore::new());
    let policy = RetryPolicy::new(3, Duration::from_millis(10));

    let started = Instant::now();
    let result = exec_with_retry_async(&node, &policy, &ctx, &Value::Null)
        .await
        .unwrap();

    assert_eq!(node.calls(), 3);
    assert!(result.is_error());
    assert!(started.elapsed() >= Duration::from_millis(20));
}

#[tokio::test]
async fn test_async_runner_recovers_after_failure() {
    let runner = AsyncRunner::new(Flaky::new(2)).with_retry(3, Duration::ZERO);
    let store = SharedStore::new();

    runner.run(&store).await.unwrap();

    assert_eq!(runner.node().calls(), 3);
    assert_eq!(store.get_i64("result").unwrap(), 2);
}

#[tokio::test]
async fn test_run_async_completes_once_with_final_action() {
    let runner = AsyncRunner::new(Flaky::new(0));
    let store = SharedStore::new();

    let handle = runner.run_async(store.clone());
    let action = handle.await.unwrap().unwrap();

    assert!(action.is_default());
    assert_eq!(store.get_i64("result").unwrap(), 0);
}
