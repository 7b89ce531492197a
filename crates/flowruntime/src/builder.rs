use crate::registry::{BuildOptions, NodeRegistry};
use crate::runtime::RuntimeConfig;
use crate::AsyncFlow;
use flowcore::{FlowError, NodeId, Workflow, WorkflowError};
use std::collections::HashMap;

/// Turn a declarative workflow into a runnable flow.
///
/// Every node spec is created through the registry, with the spec's retry
/// policy or the runtime default, then transitions are wired by node id.
pub fn build_flow(
    workflow: &Workflow,
    registry: &NodeRegistry,
    config: &RuntimeConfig,
) -> Result<AsyncFlow, FlowError> {
    let report = workflow.validate()?;
    for id in &report.unreachable {
        tracing::warn!("Node '{}' is unreachable from start node '{}'", id, report.start);
    }

    let mut flow = AsyncFlow::new()
        .named(workflow.name.clone())
        .with_params(workflow.params.clone());

    let mut ids: HashMap<&str, NodeId> = HashMap::new();
    for spec in &workflow.nodes {
        let options = BuildOptions {
            retry: spec.retry_policy.unwrap_or(config.default_retry),
            max_parallel: resolve_max_parallel(workflow, config),
        };
        let handle = registry.create_node(&spec.node_type, &spec.config, &options)?;
        tracing::debug!("Built node '{}' ({}, {})", spec.id, spec.node_type, handle.kind());
        ids.insert(spec.id.as_str(), flow.add_handle(handle));
    }

    let lookup = |id: &str| {
        ids.get(id)
            .copied()
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))
    };

    for t in &workflow.transitions {
        flow.connect(lookup(&t.from)?, t.action.clone(), lookup(&t.to)?)?;
    }
    flow.start(lookup(&report.start)?)?;

    Ok(flow)
}

/// The runtime cap wins when it overrides workflows, otherwise the
/// workflow's own setting does. Zero means no cap.
pub(crate) fn resolve_max_parallel(workflow: &Workflow, config: &RuntimeConfig) -> Option<usize> {
    let cap = if config.override_workflow_cap {
        config.max_parallel
    } else {
        workflow.settings.max_parallel.or(config.max_parallel)
    };
    cap.filter(|c| *c > 0)
}
