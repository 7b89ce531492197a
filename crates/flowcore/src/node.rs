use crate::{Action, EventEmitter, FlowError, NodeError, SharedStore, Value};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

pub type NodeId = Uuid;

/// Per-run parameters handed to every node of a flow
pub type Params = HashMap<String, Value>;

/// Overlay `overrides` on top of `base`
pub fn merge_params(base: &Params, overrides: &Params) -> Params {
    let mut merged = base.clone();
    merged.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Synchronous node lifecycle: prep, exec, post.
///
/// Every phase has a no-op default, so a node only overrides what it needs.
/// `exec` is the only phase that is retried; its failures never leave the
/// node, they end up in [`Node::exec_fallback`] once retries are exhausted.
/// `exec` gets the full context, so it may read the store mid-exec.
pub trait Node: Send + Sync {
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    fn prep(&self, _ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    fn exec(&self, _ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    /// Stands in for `exec` after the last failed attempt. The default
    /// surfaces the error itself as the result.
    fn exec_fallback(
        &self,
        _ctx: &NodeContext,
        _prep: &Value,
        error: NodeError,
    ) -> Result<Value, NodeError> {
        Ok(Value::from(error))
    }

    /// Persist results into the store and pick the next action
    fn post(&self, _ctx: &NodeContext, _prep: Value, _exec: Value) -> Result<Action, NodeError> {
        Ok(Action::default())
    }
}

/// Asynchronous counterpart of [`Node`]
#[async_trait]
pub trait AsyncNode: Send + Sync {
    fn name(&self) -> &str {
        short_type_name::<Self>()
    }

    async fn prep_async(&self, _ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    async fn exec_async(&self, _ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    async fn exec_fallback_async(
        &self,
        _ctx: &NodeContext,
        _prep: &Value,
        error: NodeError,
    ) -> Result<Value, NodeError> {
        Ok(Value::from(error))
    }

    async fn post_async(
        &self,
        _ctx: &NodeContext,
        _prep: Value,
        _exec: Value,
    ) -> Result<Action, NodeError> {
        Ok(Action::default())
    }
}

/// Execution context passed to each phase of a node
#[derive(Clone)]
pub struct NodeContext {
    /// Id of the node within the running flow (nil outside a flow)
    pub node_id: NodeId,

    /// Parameters for this run step
    pub params: Arc<Params>,

    /// Store shared by the whole flow run
    pub store: SharedStore,

    /// Event emitter for real-time updates
    pub events: EventEmitter,

    /// Zero-based exec attempt, advanced by the retry executor
    pub attempt: u32,
}

impl NodeContext {
    /// Context for running outside a flow: no params, nobody listening
    pub fn new(store: SharedStore) -> Self {
        Self::with_events(store, EventEmitter::detached())
    }

    pub fn with_events(store: SharedStore, events: EventEmitter) -> Self {
        Self {
            node_id: events.node_id(),
            params: Arc::new(Params::new()),
            store,
            events,
            attempt: 0,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = Arc::new(params);
        self
    }

    /// Rebind to another node of the same execution
    pub fn for_node(&self, node_id: NodeId) -> Self {
        Self {
            node_id,
            params: Arc::clone(&self.params),
            store: self.store.clone(),
            events: self.events.for_node(node_id),
            attempt: 0,
        }
    }

    pub fn with_attempt(&self, attempt: u32) -> Self {
        Self {
            attempt,
            ..self.clone()
        }
    }

    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params.get(name)
    }

    /// Get required parameter or return error
    pub fn require_param(&self, name: &str) -> Result<&Value, NodeError> {
        self.params
            .get(name)
            .ok_or_else(|| NodeError::MissingInput(name.to_string()))
    }

    pub fn param_or(&self, name: &str, default: Value) -> Value {
        self.params.get(name).cloned().unwrap_or(default)
    }
}

/// The execution strategy behind a node-shaped unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    Base,
    Batch,
    Async,
    AsyncBatch,
    AsyncParallelBatch,
    Flow,
    BatchFlow,
    AsyncFlow,
    AsyncBatchFlow,
    ParallelBatchFlow,
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            NodeKind::Base => "base",
            NodeKind::Batch => "batch",
            NodeKind::Async => "async",
            NodeKind::AsyncBatch => "async_batch",
            NodeKind::AsyncParallelBatch => "async_parallel_batch",
            NodeKind::Flow => "flow",
            NodeKind::BatchFlow => "batch_flow",
            NodeKind::AsyncFlow => "async_flow",
            NodeKind::AsyncBatchFlow => "async_batch_flow",
            NodeKind::ParallelBatchFlow => "parallel_batch_flow",
        };
        f.write_str(label)
    }
}

/// A unit a synchronous flow can route to: a wrapped node or a nested flow.
/// Running a step runs its whole lifecycle once and yields its action.
pub trait Step: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind;

    fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError>;
}

/// A unit an async flow awaits
#[async_trait]
pub trait AsyncStep: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> NodeKind;

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError>;
}

/// Any node-shaped unit, tagged with whether it must be awaited
#[derive(Clone)]
pub enum NodeHandle {
    Sync(Arc<dyn Step>),
    Async(Arc<dyn AsyncStep>),
}

impl NodeHandle {
    pub fn name(&self) -> &str {
        match self {
            NodeHandle::Sync(step) => step.name(),
            NodeHandle::Async(step) => step.name(),
        }
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeHandle::Sync(step) => step.kind(),
            NodeHandle::Async(step) => step.kind(),
        }
    }

    pub fn is_async(&self) -> bool {
        matches!(self, NodeHandle::Async(_))
    }
}

impl fmt::Debug for NodeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeHandle")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish()
    }
}
