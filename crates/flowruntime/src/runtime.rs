use crate::builder::build_flow;
use crate::registry::NodeRegistry;
use chrono::Utc;
use flowcore::{
    Action, EventBus, ExecutionEvent, FlowError, RetryPolicy, SharedStore, Workflow, WorkflowError,
    WorkflowId,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

pub const DEFAULT_MAX_PARALLEL: usize = 10;
pub const DEFAULT_EVENT_BUFFER: usize = 1000;

/// Main runtime for executing workflow definitions
pub struct FlowRuntime {
    registry: Arc<NodeRegistry>,
    config: RuntimeConfig,
    event_bus: Arc<EventBus>,
    workflows: Arc<RwLock<HashMap<WorkflowId, Workflow>>>,
}

impl FlowRuntime {
    /// Create a new runtime with default settings
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a new runtime with custom configuration
    pub fn with_config(config: RuntimeConfig) -> Self {
        let registry = Arc::new(NodeRegistry::new());
        Self::with_registry(registry, config)
    }

    /// Create a new runtime with a pre-configured registry
    pub fn with_registry(registry: Arc<NodeRegistry>, config: RuntimeConfig) -> Self {
        let event_bus = Arc::new(EventBus::new(config.event_buffer_size));

        Self {
            registry,
            config,
            event_bus,
            workflows: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get access to the node registry
    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Register a workflow
    pub async fn register_workflow(&self, workflow: Workflow) {
        let mut workflows = self.workflows.write().await;
        workflows.insert(workflow.id, workflow);
    }

    /// Execute a registered workflow by ID
    pub async fn execute_workflow(
        &self,
        workflow_id: WorkflowId,
        store: &SharedStore,
    ) -> Result<ExecutionResult, FlowError> {
        let workflows = self.workflows.read().await;
        let workflow = workflows
            .get(&workflow_id)
            .ok_or_else(|| FlowError::Workflow(WorkflowError::NotFound(workflow_id.to_string())))?;

        self.execute(workflow, store).await
    }

    /// Execute a workflow directly (without registration)
    pub async fn execute(
        &self,
        workflow: &Workflow,
        store: &SharedStore,
    ) -> Result<ExecutionResult, FlowError> {
        let flow = build_flow(workflow, &self.registry, &self.config)?
            .with_event_bus(Arc::clone(&self.event_bus));

        let started_at = Utc::now();
        let start = Instant::now();
        let action = flow.run(store).await?;

        Ok(ExecutionResult {
            workflow_id: workflow.id,
            action,
            started_at,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }

    /// Subscribe to execution events
    pub fn subscribe_events(&self) -> tokio::sync::broadcast::Receiver<ExecutionEvent> {
        self.event_bus.subscribe()
    }

    /// Get the event bus for direct access
    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }
}

impl Default for FlowRuntime {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a workflow execution; node outputs live in the store
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub workflow_id: WorkflowId,
    pub action: Action,
    pub started_at: chrono::DateTime<Utc>,
    pub duration_ms: u64,
}

/// Configuration for the runtime
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Concurrency cap for parallel batch nodes; `None` or `Some(0)` is unbounded
    pub max_parallel: Option<usize>,
    /// Apply `max_parallel` even to workflows that set their own cap
    pub override_workflow_cap: bool,
    pub event_buffer_size: usize,
    /// Retry policy for node specs that do not carry one
    pub default_retry: RetryPolicy,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_parallel: Some(DEFAULT_MAX_PARALLEL),
            override_workflow_cap: false,
            event_buffer_size: DEFAULT_EVENT_BUFFER,
            default_retry: RetryPolicy::default(),
        }
    }
}
