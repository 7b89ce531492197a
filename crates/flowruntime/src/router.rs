use flowcore::{Action, NodeId, Params, WorkflowError};
use std::collections::HashMap;
use uuid::Uuid;

/// Per-node transition table: which node runs after a node returns an action.
///
/// There is no terminal marker. A flow ends when the router has nothing for
/// the returned action, whether that is a dead end or the intended finish.
#[derive(Debug, Clone, Default)]
pub struct Router {
    successors: HashMap<NodeId, HashMap<Action, NodeId>>,
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `to` as the successor of `from` for `action`, returning the
    /// successor it replaced. Re-registering an action overwrites it.
    pub fn connect(
        &mut self,
        from: NodeId,
        action: impl Into<Action>,
        to: NodeId,
    ) -> Option<NodeId> {
        let action = action.into();
        let previous = self
            .successors
            .entry(from)
            .or_default()
            .insert(action.clone(), to);
        if previous.is_some() {
            tracing::warn!(%from, %action, "Overwriting successor for action '{}'", action);
        }
        previous
    }

    pub fn successors(&self, from: NodeId) -> Option<&HashMap<Action, NodeId>> {
        self.successors.get(&from)
    }

    pub fn has_successors(&self, from: NodeId) -> bool {
        self.successors
            .get(&from)
            .is_some_and(|succ| !succ.is_empty())
    }

    /// The node to run after `from` returned `action`, if any.
    /// A miss on a node that does have successors is logged, never an error.
    pub fn resolve(&self, from: NodeId, action: &Action) -> Option<NodeId> {
        let succ = self.successors.get(&from).filter(|s| !s.is_empty())?;
        match succ.get(action) {
            Some(next) => Some(*next),
            None => {
                let mut known: Vec<&str> = succ.keys().map(Action::as_str).collect();
                known.sort_unstable();
                tracing::warn!(%from, "Flow ends: '{}' not found in {:?}", action, known);
                None
            }
        }
    }
}

/// Nodes of one flow plus their wiring, generic over how a node is held
pub(crate) struct Graph<S> {
    pub(crate) name: String,
    pub(crate) nodes: HashMap<NodeId, S>,
    pub(crate) router: Router,
    pub(crate) start: Option<NodeId>,
    pub(crate) params: Params,
}

impl<S> Graph<S> {
    pub(crate) fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            nodes: HashMap::new(),
            router: Router::new(),
            start: None,
            params: Params::new(),
        }
    }

    /// The first node added becomes the start node unless one is set
    pub(crate) fn add(&mut self, node: S) -> NodeId {
        let id = Uuid::new_v4();
        self.nodes.insert(id, node);
        if self.start.is_none() {
            self.start = Some(id);
        }
        id
    }

    pub(crate) fn connect(
        &mut self,
        from: NodeId,
        action: Action,
        to: NodeId,
    ) -> Result<(), WorkflowError> {
        for id in [from, to] {
            if !self.nodes.contains_key(&id) {
                return Err(WorkflowError::NodeNotFound(id.to_string()));
            }
        }
        self.router.connect(from, action, to);
        Ok(())
    }

    pub(crate) fn set_start(&mut self, id: NodeId) -> Result<(), WorkflowError> {
        if !self.nodes.contains_key(&id) {
            return Err(WorkflowError::NodeNotFound(id.to_string()));
        }
        self.start = Some(id);
        Ok(())
    }

    pub(crate) fn start(&self) -> Result<NodeId, WorkflowError> {
        self.start.ok_or(WorkflowError::NoStartNode)
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&S, WorkflowError> {
        self.nodes
            .get(&id)
            .ok_or_else(|| WorkflowError::NodeNotFound(id.to_string()))
    }
}
