use crate::{Action, Params, Value, WorkflowError};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use uuid::Uuid;

pub type WorkflowId = Uuid;

/// Declarative flow definition, loadable from JSON
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default = "Uuid::new_v4")]
    pub id: WorkflowId,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub nodes: Vec<NodeSpec>,
    #[serde(default)]
    pub transitions: Vec<Transition>,
    /// Id of the start node; the first node when absent
    #[serde(default)]
    pub start: Option<String>,
    /// Flow-level default params
    #[serde(default)]
    pub params: Params,
    #[serde(default)]
    pub settings: WorkflowSettings,
}

impl Workflow {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            nodes: Vec::new(),
            transitions: Vec::new(),
            start: None,
            params: Params::new(),
            settings: WorkflowSettings::default(),
        }
    }

    pub fn add_node(&mut self, node: NodeSpec) -> String {
        let id = node.id.clone();
        self.nodes.push(node);
        id
    }

    /// Route `from` to `to` when `from`'s post returns `action`
    pub fn connect(
        &mut self,
        from: impl Into<String>,
        action: impl Into<Action>,
        to: impl Into<String>,
    ) {
        self.transitions.push(Transition {
            from: from.into(),
            action: action.into(),
            to: to.into(),
        });
    }

    pub fn find_node(&self, id: &str) -> Option<&NodeSpec> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn start_node(&self) -> Option<&NodeSpec> {
        match &self.start {
            Some(id) => self.find_node(id),
            None => self.nodes.first(),
        }
    }

    /// Check that ids are unique, the start node and every transition
    /// endpoint exist, and report nodes the start can never reach.
    /// Cycles are legal: routing loops are an ordinary flow shape.
    pub fn validate(&self) -> Result<ValidationReport, WorkflowError> {
        let mut graph: DiGraph<&str, &str> = DiGraph::new();
        let mut index: HashMap<&str, NodeIndex> = HashMap::new();

        for node in &self.nodes {
            if index.insert(&node.id, graph.add_node(&node.id)).is_some() {
                return Err(WorkflowError::Invalid(format!(
                    "duplicate node id '{}'",
                    node.id
                )));
            }
        }

        let mut seen = HashSet::new();
        let mut overwritten = Vec::new();
        for t in &self.transitions {
            let from = index.get(t.from.as_str()).ok_or_else(|| {
                WorkflowError::InvalidConnection(format!("unknown source node '{}'", t.from))
            })?;
            let to = index.get(t.to.as_str()).ok_or_else(|| {
                WorkflowError::InvalidConnection(format!("unknown target node '{}'", t.to))
            })?;
            if !seen.insert((t.from.as_str(), t.action.as_str())) {
                overwritten.push(format!("{} --{}-->", t.from, t.action));
            }
            graph.add_edge(*from, *to, t.action.as_str());
        }

        let start = match &self.start {
            Some(id) => *index
                .get(id.as_str())
                .ok_or_else(|| WorkflowError::NodeNotFound(id.clone()))?,
            None => graph
                .node_indices()
                .next()
                .ok_or(WorkflowError::NoStartNode)?,
        };

        let mut reachable = HashSet::new();
        let mut dfs = Dfs::new(&graph, start);
        while let Some(idx) = dfs.next(&graph) {
            reachable.insert(idx);
        }

        let unreachable = graph
            .node_indices()
            .filter(|idx| !reachable.contains(idx))
            .map(|idx| graph[idx].to_string())
            .collect();

        Ok(ValidationReport {
            start: graph[start].to_string(),
            unreachable,
            overwritten,
        })
    }
}

/// Findings of [`Workflow::validate`] that are legal but worth reporting
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub start: String,
    pub unreachable: Vec<String>,
    /// Transitions registered twice for the same action; the last one wins
    pub overwritten: Vec<String>,
}

/// Node specification in a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSpec {
    pub id: String,
    pub node_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub config: HashMap<String, Value>,
    #[serde(default)]
    pub retry_policy: Option<RetryPolicy>,
}

impl NodeSpec {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            name: None,
            config: HashMap::new(),
            retry_policy: None,
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_retry(mut self, max_retries: u32, wait_ms: u64) -> Self {
        self.retry_policy = Some(RetryPolicy::new(
            max_retries,
            Duration::from_millis(wait_ms),
        ));
        self
    }
}

/// Action-labelled edge between two nodes
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transition {
    pub from: String,
    #[serde(default)]
    pub action: Action,
    pub to: String,
}

/// How many times exec is attempted and how long to wait between attempts.
/// Waits are fixed; there is no backoff.
///
/// In workflow files the wait is `wait_ms`, which may be fractional.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    #[serde(default, rename = "wait_ms", with = "millis")]
    wait: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, wait: Duration) -> Self {
        Self {
            max_retries: max_retries.max(1),
            wait,
        }
    }

    /// Attempts actually made; never less than one
    pub fn attempts(&self) -> u32 {
        self.max_retries.max(1)
    }

    pub fn wait(&self) -> Duration {
        self.wait
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 1,
            wait: Duration::ZERO,
        }
    }
}

/// `Duration` as a number of milliseconds, whole when it can be
mod millis {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(wait: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        if wait.subsec_nanos() % 1_000_000 == 0 {
            serializer.serialize_u64(wait.as_millis() as u64)
        } else {
            serializer.serialize_f64(wait.as_nanos() as f64 / 1_000_000.0)
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = f64::deserialize(deserializer)?;
        if !ms.is_finite() || ms < 0.0 {
            return Err(D::Error::custom(format!(
                "wait_ms must be a non-negative number, got {}",
                ms
            )));
        }
        Ok(Duration::from_nanos((ms * 1_000_000.0).round() as u64))
    }
}

/// Global workflow settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowSettings {
    /// Concurrency cap for parallel batch nodes built from this workflow;
    /// falls back to the runtime's cap when absent. Zero means no cap.
    #[serde(default)]
    pub max_parallel: Option<usize>,
}
