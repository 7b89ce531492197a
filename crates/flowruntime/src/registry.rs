use flowcore::{NodeError, NodeHandle, NodeKind, RetryPolicy, Value, WorkflowError};
use std::collections::HashMap;
use std::sync::Arc;

/// What a factory gets besides the node's own config
#[derive(Debug, Clone, Copy, Default)]
pub struct BuildOptions {
    pub retry: RetryPolicy,
    pub max_parallel: Option<usize>,
}

/// Factory trait for creating node instances
pub trait NodeFactory: Send + Sync {
    /// Create a runnable node from its configuration
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError>;

    /// Get node type identifier
    fn node_type(&self) -> &str;

    /// Optional: Get node metadata (description, config keys, ...)
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::default()
    }
}

/// Metadata about a node type
#[derive(Debug, Clone)]
pub struct NodeMetadata {
    pub description: String,
    pub category: String,
    pub kind: NodeKind,
    pub config: Vec<ConfigField>,
}

impl Default for NodeMetadata {
    fn default() -> Self {
        Self {
            description: String::new(),
            category: "general".to_string(),
            kind: NodeKind::Base,
            config: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConfigField {
    pub name: String,
    pub description: String,
    pub required: bool,
}

impl ConfigField {
    pub fn required(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: true,
        }
    }

    pub fn optional(name: &str, description: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            required: false,
        }
    }
}

/// Registry of available node types
pub struct NodeRegistry {
    factories: HashMap<String, Arc<dyn NodeFactory>>,
}

impl NodeRegistry {
    pub fn new() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a node factory
    pub fn register(&mut self, factory: Arc<dyn NodeFactory>) {
        let node_type = factory.node_type().to_string();
        tracing::info!("Registering node type: {}", node_type);
        if self.factories.insert(node_type.clone(), factory).is_some() {
            tracing::warn!("Node type '{}' registered twice, keeping the last one", node_type);
        }
    }

    /// Create a node instance from a node type and config
    pub fn create_node(
        &self,
        node_type: &str,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, WorkflowError> {
        let factory = self
            .factories
            .get(node_type)
            .ok_or_else(|| WorkflowError::UnknownNodeType(node_type.to_string()))?;

        factory
            .create(config, options)
            .map_err(|e| WorkflowError::Invalid(format!("Failed to create node: {}", e)))
    }

    pub fn contains(&self, node_type: &str) -> bool {
        self.factories.contains_key(node_type)
    }

    /// Get all registered node types, sorted
    pub fn list_node_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.factories.keys().cloned().collect();
        types.sort();
        types
    }

    /// Get metadata for a node type
    pub fn get_metadata(&self, node_type: &str) -> Option<NodeMetadata> {
        self.factories.get(node_type).map(|f| f.metadata())
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
