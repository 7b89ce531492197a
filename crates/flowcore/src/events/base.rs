use crate::{NodeId, NodeKind, Value};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

pub type ExecutionId = Uuid;

/// Events emitted while a flow runs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ExecutionEvent {
    FlowStarted {
        execution_id: ExecutionId,
        flow: String,
        timestamp: DateTime<Utc>,
    },
    FlowCompleted {
        execution_id: ExecutionId,
        flow: String,
        action: Option<String>,
        success: bool,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execution_id: ExecutionId,
        node_id: NodeId,
        name: String,
        kind: NodeKind,
        timestamp: DateTime<Utc>,
    },
    NodeCompleted {
        execution_id: ExecutionId,
        node_id: NodeId,
        action: String,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeRetry {
        execution_id: ExecutionId,
        node_id: NodeId,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeFallback {
        execution_id: ExecutionId,
        node_id: NodeId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    NodeEvent {
        execution_id: ExecutionId,
        node_id: NodeId,
        event: NodeEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Events specific to node execution
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum NodeEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
    Data { key: String, value: Value },
}

/// Event emitter bound to one execution and one node.
///
/// Sending never fails from the caller's point of view: with no subscriber
/// the event is dropped.
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    node_id: NodeId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        node_id: NodeId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            node_id,
            sender,
        }
    }

    /// An emitter nobody listens to, for nodes run outside any flow
    pub fn detached() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(ExecutionId::new_v4(), NodeId::nil(), sender)
    }

    pub fn execution_id(&self) -> ExecutionId {
        self.execution_id
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Same execution, different node
    pub fn for_node(&self, node_id: NodeId) -> Self {
        Self {
            execution_id: self.execution_id,
            node_id,
            sender: self.sender.clone(),
        }
    }

    /// Emit an engine-level event
    pub fn send(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    /// Emit a node-specific event
    pub fn emit(&self, event: NodeEvent) {
        self.send(ExecutionEvent::NodeEvent {
            execution_id: self.execution_id,
            node_id: self.node_id,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(NodeEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(NodeEvent::Progress { percent, message });
    }

    /// Announce a value a node wrote to the store
    pub fn data(&self, key: impl Into<String>, value: Value) {
        self.emit(NodeEvent::Data {
            key: key.into(),
            value,
        });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, node_id: NodeId) -> EventEmitter {
        EventEmitter::new(execution_id, node_id, self.sender.clone())
    }
}
