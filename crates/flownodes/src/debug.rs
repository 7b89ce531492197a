use flowcore::{Node, NodeContext, NodeError, NodeHandle, NodeKind, Value};
use flowruntime::{BuildOptions, ConfigField, NodeFactory, NodeMetadata, NodeRunner};
use std::collections::HashMap;
use std::sync::Arc;

/// Simple debug node that logs store entries
pub struct DebugNode {
    keys: Option<Vec<String>>,
}

impl DebugNode {
    /// Log every key of the store
    pub fn all() -> Self {
        Self { keys: None }
    }

    /// Log only the given keys
    pub fn keys(keys: Vec<String>) -> Self {
        Self { keys: Some(keys) }
    }
}

impl Node for DebugNode {
    fn name(&self) -> &str {
        "debug.log"
    }

    fn prep(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let keys = match &self.keys {
            Some(keys) => keys.clone(),
            None => ctx.store.keys(),
        };
        let entries = keys
            .into_iter()
            .map(|key| {
                let value = ctx.store.get(&key).unwrap_or_default();
                (key, value)
            })
            .collect::<HashMap<_, _>>();
        Ok(Value::Object(entries))
    }

    fn exec(&self, ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let Some(entries) = prep.as_object() else {
            return Ok(Value::Null);
        };

        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort();
        ctx.events.info(format!("DEBUG: {} store entries", keys.len()));
        for key in keys {
            tracing::info!("  {}: {:?}", key, entries[key]);
            ctx.events.info(format!("  {}: {:?}", key, entries[key]));
        }
        Ok(Value::Null)
    }
}

pub struct DebugNodeFactory;

impl NodeFactory for DebugNodeFactory {
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        let node = match config.get("keys") {
            None | Some(Value::Null) => DebugNode::all(),
            Some(Value::Array(items)) => DebugNode::keys(
                items
                    .iter()
                    .map(|item| {
                        item.as_str().map(str::to_string).ok_or_else(|| {
                            NodeError::InvalidInputType {
                                field: "keys".to_string(),
                                expected: "string".to_string(),
                                actual: item.type_name().to_string(),
                            }
                        })
                    })
                    .collect::<Result<_, _>>()?,
            ),
            Some(other) => {
                return Err(NodeError::InvalidInputType {
                    field: "keys".to_string(),
                    expected: "array".to_string(),
                    actual: other.type_name().to_string(),
                })
            }
        };

        Ok(NodeHandle::Sync(Arc::new(
            NodeRunner::new(node).with_policy(options.retry),
        )))
    }

    fn node_type(&self) -> &str {
        "debug.log"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Logs store entries for debugging".to_string(),
            category: "debug".to_string(),
            kind: NodeKind::Base,
            config: vec![ConfigField::optional(
                "keys",
                "Store keys to log; every key when absent",
            )],
        }
    }
}
