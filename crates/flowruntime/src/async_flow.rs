use crate::flow::DefaultHooks;
use crate::parallel::run_indexed;
use crate::router::{Graph, Router};
use crate::runner::{AsyncRunner, NodeRunner};
use crate::runtime::{DEFAULT_EVENT_BUFFER, DEFAULT_MAX_PARALLEL};
use crate::trace;
use async_trait::async_trait;
use flowcore::{
    merge_params, Action, AsyncNode, AsyncStep, EventBus, ExecutionEvent, FlowError, Node,
    NodeContext, NodeError, NodeHandle, NodeId, NodeKind, Params, SharedStore, Step, Value,
};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Setup and teardown around an async flow run; both may await
#[async_trait]
pub trait AsyncFlowHooks: Send + Sync {
    async fn prep_async(&self, _ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    /// Receives the action of the last node run; its result is the flow's action
    async fn post_async(
        &self,
        _ctx: &NodeContext,
        _prep: Value,
        last: Action,
    ) -> Result<Action, NodeError> {
        Ok(last)
    }
}

#[async_trait]
impl AsyncFlowHooks for DefaultHooks {}

/// Hooks of the async batch flows
#[async_trait]
pub trait AsyncBatchFlowHooks: Send + Sync {
    /// One params map per run, merged over the flow's own params
    async fn prep_async(&self, ctx: &NodeContext) -> Result<Vec<Params>, NodeError>;

    /// Runs once, after every run finished
    async fn post_async(
        &self,
        _ctx: &NodeContext,
        _prep: Vec<Params>,
    ) -> Result<Action, NodeError> {
        Ok(Action::default())
    }
}

/// Orchestrator for graphs mixing sync and async nodes.
///
/// Async steps are awaited, sync steps run in place on the orchestrating
/// task (a sync retry wait therefore blocks that task's thread).
pub struct AsyncFlow<H = DefaultHooks> {
    graph: Graph<NodeHandle>,
    hooks: H,
    bus: Arc<EventBus>,
}

impl AsyncFlow {
    pub fn new() -> Self {
        Self::with_hooks(DefaultHooks)
    }
}

impl Default for AsyncFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: AsyncFlowHooks> AsyncFlow<H> {
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            graph: Graph::new("async_flow"),
            hooks,
            bus: Arc::new(EventBus::new(DEFAULT_EVENT_BUFFER)),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.graph.name = name.into();
        self
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.graph.params = params;
        self
    }

    pub fn set_params(&mut self, params: Params) {
        self.graph.params = params;
    }

    pub fn params(&self) -> &Params {
        &self.graph.params
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.bus.subscribe()
    }

    pub fn add_handle(&mut self, handle: NodeHandle) -> NodeId {
        self.graph.add(handle)
    }

    pub fn add(&mut self, step: impl Step + 'static) -> NodeId {
        self.add_handle(NodeHandle::Sync(Arc::new(step)))
    }

    pub fn add_async(&mut self, step: impl AsyncStep + 'static) -> NodeId {
        self.add_handle(NodeHandle::Async(Arc::new(step)))
    }

    pub fn add_node(&mut self, node: impl Node + 'static) -> NodeId {
        self.add(NodeRunner::new(node))
    }

    pub fn add_async_node(&mut self, node: impl AsyncNode + 'static) -> NodeId {
        self.add_async(AsyncRunner::new(node))
    }

    pub fn connect(
        &mut self,
        from: NodeId,
        action: impl Into<Action>,
        to: NodeId,
    ) -> Result<(), FlowError> {
        Ok(self.graph.connect(from, action.into(), to)?)
    }

    pub fn start(&mut self, id: NodeId) -> Result<(), FlowError> {
        Ok(self.graph.set_start(id)?)
    }

    pub fn router(&self) -> &Router {
        &self.graph.router
    }

    pub fn name(&self) -> &str {
        &self.graph.name
    }

    pub async fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        let ctx = trace::root_context(&self.bus, store, self.graph.params.clone());
        let started = trace::flow_started(&ctx, &self.graph.name);
        let result = self.run_lifecycle(&ctx, self.graph.params.clone()).await;
        trace::flow_completed(&ctx, &self.graph.name, &result, started);
        result
    }

    async fn run_lifecycle(&self, ctx: &NodeContext, params: Params) -> Result<Action, FlowError> {
        let prep = self.hooks.prep_async(ctx).await?;
        let last = self.orchestrate(ctx, params).await?;
        Ok(self.hooks.post_async(ctx, prep, last).await?)
    }

    pub(crate) async fn orchestrate(
        &self,
        ctx: &NodeContext,
        params: Params,
    ) -> Result<Action, FlowError> {
        let params = Arc::new(params);
        let mut current = self.graph.start()?;
        loop {
            let handle = self.graph.node(current)?;
            let mut step_ctx = ctx.for_node(current);
            step_ctx.params = Arc::clone(&params);

            let started = trace::node_started(&step_ctx, handle.name(), handle.kind());
            let action = match handle {
                NodeHandle::Async(step) => step.run_step(&step_ctx).await?,
                NodeHandle::Sync(step) => step.run_step(&step_ctx)?,
            };
            trace::node_completed(&step_ctx, handle.name(), &action, started);

            match self.graph.router.resolve(current, &action) {
                Some(next) => current = next,
                None => return Ok(action),
            }
        }
    }
}

impl<H: AsyncFlowHooks + 'static> AsyncFlow<H> {
    /// Run on a separate task; the handle resolves once with the final action
    pub fn run_async(self: Arc<Self>, store: SharedStore) -> JoinHandle<Result<Action, FlowError>> {
        tokio::spawn(async move { self.run(&store).await })
    }
}

#[async_trait]
impl<H: AsyncFlowHooks> AsyncStep for AsyncFlow<H> {
    fn name(&self) -> &str {
        &self.graph.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::AsyncFlow
    }

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        self.run_lifecycle(ctx, merge_params(&self.graph.params, &ctx.params))
            .await
    }
}

/// Async batch flow: one full run per params map, one after another
pub struct AsyncBatchFlow<H> {
    flow: AsyncFlow,
    hooks: H,
}

impl<H: AsyncBatchFlowHooks> AsyncBatchFlow<H> {
    pub fn new(flow: AsyncFlow, hooks: H) -> Self {
        Self { flow, hooks }
    }

    pub fn flow(&self) -> &AsyncFlow {
        &self.flow
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.flow.subscribe()
    }

    pub async fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        let params = self.flow.graph.params.clone();
        let ctx = trace::root_context(&self.flow.bus, store, params.clone());
        let started = trace::flow_started(&ctx, &self.flow.graph.name);
        let result = self.run_batches(&ctx, params).await;
        trace::flow_completed(&ctx, &self.flow.graph.name, &result, started);
        result
    }

    async fn run_batches(&self, ctx: &NodeContext, base: Params) -> Result<Action, FlowError> {
        let batches = self.hooks.prep_async(ctx).await?;
        for (idx, overrides) in batches.iter().enumerate() {
            tracing::debug!("Batch flow '{}' run {}/{}", self.flow.graph.name, idx + 1, batches.len());
            self.flow
                .orchestrate(ctx, merge_params(&base, overrides))
                .await?;
        }
        Ok(self.hooks.post_async(ctx, batches).await?)
    }
}

impl<H: AsyncBatchFlowHooks + 'static> AsyncBatchFlow<H> {
    pub fn run_async(self: Arc<Self>, store: SharedStore) -> JoinHandle<Result<Action, FlowError>> {
        tokio::spawn(async move { self.run(&store).await })
    }
}

#[async_trait]
impl<H: AsyncBatchFlowHooks> AsyncStep for AsyncBatchFlow<H> {
    fn name(&self) -> &str {
        &self.flow.graph.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::AsyncBatchFlow
    }

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        self.run_batches(ctx, merge_params(&self.flow.graph.params, &ctx.params))
            .await
    }
}

/// Runs the whole flow concurrently, once per params map.
///
/// Every run shares the same store; post runs only after all of them have
/// finished. Runs that fail do not stop the others, the first failure is
/// reported once all are done.
pub struct ParallelBatchFlow<H> {
    flow: Arc<AsyncFlow>,
    hooks: H,
    max_parallel: Option<usize>,
}

impl<H: AsyncBatchFlowHooks> ParallelBatchFlow<H> {
    pub fn new(flow: AsyncFlow, hooks: H) -> Self {
        Self {
            flow: Arc::new(flow),
            hooks,
            max_parallel: Some(DEFAULT_MAX_PARALLEL),
        }
    }

    /// Cap on concurrently running flows; `None` or `Some(0)` starts them all at once
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn flow(&self) -> &AsyncFlow {
        &self.flow
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.flow.subscribe()
    }

    pub async fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        let params = self.flow.graph.params.clone();
        let ctx = trace::root_context(&self.flow.bus, store, params.clone());
        let started = trace::flow_started(&ctx, &self.flow.graph.name);
        let result = self.run_batches(&ctx, params).await;
        trace::flow_completed(&ctx, &self.flow.graph.name, &result, started);
        result
    }

    async fn run_batches(&self, ctx: &NodeContext, base: Params) -> Result<Action, FlowError> {
        let batches = self.hooks.prep_async(ctx).await?;
        let runs: Vec<Params> = batches
            .iter()
            .map(|overrides| merge_params(&base, overrides))
            .collect();

        let outcomes = run_indexed(runs, self.max_parallel, |_, params| {
            let flow = Arc::clone(&self.flow);
            let ctx = ctx.clone();
            async move { flow.orchestrate(&ctx, params).await }
        })
        .await?;

        for outcome in outcomes {
            outcome?;
        }
        Ok(self.hooks.post_async(ctx, batches).await?)
    }
}

impl<H: AsyncBatchFlowHooks + 'static> ParallelBatchFlow<H> {
    /// Run every batch from a separate task; the handle resolves after post
    pub fn run_async(self: Arc<Self>, store: SharedStore) -> JoinHandle<Result<Action, FlowError>> {
        tokio::spawn(async move { self.run(&store).await })
    }
}

#[async_trait]
impl<H: AsyncBatchFlowHooks> AsyncStep for ParallelBatchFlow<H> {
    fn name(&self) -> &str {
        &self.flow.graph.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::ParallelBatchFlow
    }

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        self.run_batches(ctx, merge_params(&self.flow.graph.params, &ctx.params))
            .await
    }
}
