use chrono::Utc;
use flowcore::{
    Action, EventBus, ExecutionEvent, ExecutionId, FlowError, NodeContext, NodeError, NodeId,
    NodeKind, Params, SharedStore,
};
use std::time::Instant;

/// Context for the outermost run of a flow: fresh execution id, no node yet
pub(crate) fn root_context(bus: &EventBus, store: &SharedStore, params: Params) -> NodeContext {
    let emitter = bus.create_emitter(ExecutionId::new_v4(), NodeId::nil());
    NodeContext::with_events(store.clone(), emitter).with_params(params)
}

pub(crate) fn flow_started(ctx: &NodeContext, flow: &str) -> Instant {
    tracing::info!(execution_id = %ctx.events.execution_id(), "Starting flow '{}'", flow);
    ctx.events.send(ExecutionEvent::FlowStarted {
        execution_id: ctx.events.execution_id(),
        flow: flow.to_string(),
        timestamp: Utc::now(),
    });
    Instant::now()
}

pub(crate) fn flow_completed(
    ctx: &NodeContext,
    flow: &str,
    result: &Result<Action, FlowError>,
    started: Instant,
) {
    let duration_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(action) => {
            tracing::info!("Flow '{}' finished with '{}' in {}ms", flow, action, duration_ms)
        }
        Err(e) => tracing::error!("Flow '{}' failed after {}ms: {}", flow, duration_ms, e),
    }
    ctx.events.send(ExecutionEvent::FlowCompleted {
        execution_id: ctx.events.execution_id(),
        flow: flow.to_string(),
        action: result.as_ref().ok().map(ToString::to_string),
        success: result.is_ok(),
        duration_ms,
        timestamp: Utc::now(),
    });
}

pub(crate) fn node_started(ctx: &NodeContext, name: &str, kind: NodeKind) -> Instant {
    tracing::debug!(node_id = %ctx.node_id, %kind, "Running node '{}'", name);
    ctx.events.send(ExecutionEvent::NodeStarted {
        execution_id: ctx.events.execution_id(),
        node_id: ctx.node_id,
        name: name.to_string(),
        kind,
        timestamp: Utc::now(),
    });
    Instant::now()
}

pub(crate) fn node_completed(ctx: &NodeContext, name: &str, action: &Action, started: Instant) {
    let duration_ms = started.elapsed().as_millis() as u64;
    tracing::debug!(node_id = %ctx.node_id, "Node '{}' returned '{}' in {}ms", name, action, duration_ms);
    ctx.events.send(ExecutionEvent::NodeCompleted {
        execution_id: ctx.events.execution_id(),
        node_id: ctx.node_id,
        action: action.to_string(),
        duration_ms,
        timestamp: Utc::now(),
    });
}

pub(crate) fn exec_retry(ctx: &NodeContext, name: &str, attempt: u32, error: &NodeError) {
    tracing::warn!(node_id = %ctx.node_id, attempt, "Node '{}' exec failed, retrying: {}", name, error);
    ctx.events.send(ExecutionEvent::NodeRetry {
        execution_id: ctx.events.execution_id(),
        node_id: ctx.node_id,
        attempt,
        error: error.to_string(),
        timestamp: Utc::now(),
    });
}

pub(crate) fn exec_fallback(ctx: &NodeContext, name: &str, error: &NodeError) {
    tracing::warn!(node_id = %ctx.node_id, "Node '{}' out of retries, using fallback: {}", name, error);
    ctx.events.send(ExecutionEvent::NodeFallback {
        execution_id: ctx.events.execution_id(),
        node_id: ctx.node_id,
        error: error.to_string(),
        timestamp: Utc::now(),
    });
}
