use crate::router::{Graph, Router};
use crate::runner::NodeRunner;
use crate::runtime::DEFAULT_EVENT_BUFFER;
use crate::trace;
use flowcore::{
    merge_params, Action, EventBus, ExecutionEvent, FlowError, Node, NodeContext, NodeError,
    NodeId, NodeKind, Params, SharedStore, Step, Value,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Setup and teardown around a whole flow run
pub trait FlowHooks: Send + Sync {
    fn prep(&self, _ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Null)
    }

    /// Receives the action of the last node run; its result is the flow's action
    fn post(&self, _ctx: &NodeContext, _prep: Value, last: Action) -> Result<Action, NodeError> {
        Ok(last)
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultHooks;

impl FlowHooks for DefaultHooks {}

/// Hooks of a batch flow: prep decides how many runs happen and with which params
pub trait BatchFlowHooks: Send + Sync {
    /// One params map per run, merged over the flow's own params
    fn prep(&self, ctx: &NodeContext) -> Result<Vec<Params>, NodeError>;

    /// Runs once, after every run finished
    fn post(&self, _ctx: &NodeContext, _prep: Vec<Params>) -> Result<Action, NodeError> {
        Ok(Action::default())
    }
}

/// Synchronous orchestrator.
///
/// Starting from the start node, runs one node's lifecycle at a time and
/// asks the router for the successor of the returned action, until there
/// is none. The flow's result is the last action produced. A flow is itself
/// a [`Step`], so it can be nested inside another flow.
pub struct Flow<H = DefaultHooks> {
    graph: Graph<Arc<dyn Step>>,
    hooks: H,
    bus: Arc<EventBus>,
}

impl Flow {
    pub fn new() -> Self {
        Self::with_hooks(DefaultHooks)
    }
}

impl Default for Flow {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: FlowHooks> Flow<H> {
    pub fn with_hooks(hooks: H) -> Self {
        Self {
            graph: Graph::new("flow"),
            hooks,
            bus: Arc::new(EventBus::new(DEFAULT_EVENT_BUFFER)),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.graph.name = name.into();
        self
    }

    /// Flow-level default params
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

    /// Add any step. The first one added is the start node until
    /// [`Flow::start`] says otherwise.
    pub fn add(&mut self, step: impl Step + 'static) -> NodeId {
        self.graph.add(Arc::new(step))
    }

    /// Add a plain node with the default retry policy
    pub fn add_node(&mut self, node: impl Node + 'static) -> NodeId {
        self.add(NodeRunner::new(node))
    }

    /// Add a step that is also used elsewhere
    pub fn add_shared(&mut self, step: Arc<dyn Step>) -> NodeId {
        self.graph.add(step)
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

    /// Run the flow to completion against `store`
    pub fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        let ctx = trace::root_context(&self.bus, store, self.graph.params.clone());
        let started = trace::flow_started(&ctx, &self.graph.name);
        let result = self.run_lifecycle(&ctx, self.graph.params.clone());
        trace::flow_completed(&ctx, &self.graph.name, &result, started);
        result
    }

    fn run_lifecycle(&self, ctx: &NodeContext, params: Params) -> Result<Action, FlowError> {
        let prep = self.hooks.prep(ctx)?;
        let last = self.orchestrate(ctx, params)?;
        Ok(self.hooks.post(ctx, prep, last)?)
    }

    /// The routing loop, without the flow's own prep and post
    pub(crate) fn orchestrate(&self, ctx: &NodeContext, params: Params) -> Result<Action, FlowError> {
        let params = Arc::new(params);
        let mut current = self.graph.start()?;
        loop {
            let step = self.graph.node(current)?;
            let mut step_ctx = ctx.for_node(current);
            step_ctx.params = Arc::clone(&params);

            let started = trace::node_started(&step_ctx, step.name(), step.kind());
            let action = step.run_step(&step_ctx)?;
            trace::node_completed(&step_ctx, step.name(), &action, started);

            match self.graph.router.resolve(current, &action) {
                Some(next) => current = next,
                None => return Ok(action),
            }
        }
    }
}

impl<H: FlowHooks> Step for Flow<H> {
    fn name(&self) -> &str {
        &self.graph.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Flow
    }

    /// Nested run: the parent's params override this flow's defaults
    fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        self.run_lifecycle(ctx, merge_params(&self.graph.params, &ctx.params))
    }
}

/// Runs a whole flow once per params map returned by the hooks' prep,
/// sequentially and in order. Only store side effects survive between runs.
pub struct BatchFlow<H> {
    flow: Flow,
    hooks: H,
}

impl<H: BatchFlowHooks> BatchFlow<H> {
    pub fn new(flow: Flow, hooks: H) -> Self {
        Self { flow, hooks }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.flow.subscribe()
    }

    pub fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        let params = self.flow.graph.params.clone();
        let ctx = trace::root_context(&self.flow.bus, store, params.clone());
        let started = trace::flow_started(&ctx, &self.flow.graph.name);
        let result = self.run_batches(&ctx, params);
        trace::flow_completed(&ctx, &self.flow.graph.name, &result, started);
        result
    }

    fn run_batches(&self, ctx: &NodeContext, base: Params) -> Result<Action, FlowError> {
        let batches = self.hooks.prep(ctx)?;
        for (idx, overrides) in batches.iter().enumerate() {
            tracing::debug!("Batch flow '{}' run {}/{}", self.flow.graph.name, idx + 1, batches.len());
            self.flow.orchestrate(ctx, merge_params(&base, overrides))?;
        }
        Ok(self.hooks.post(ctx, batches)?)
    }
}

impl<H: BatchFlowHooks> Step for BatchFlow<H> {
    fn name(&self) -> &str {
        &self.flow.graph.name
    }

    fn kind(&self) -> NodeKind {
        NodeKind::BatchFlow
    }

    fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        self.run_batches(ctx, merge_params(&self.flow.graph.params, &ctx.params))
    }
}
