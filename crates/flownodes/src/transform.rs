use flowcore::{Action, Node, NodeContext, NodeError, NodeHandle, NodeKind, Value};
use flowruntime::{BuildOptions, ConfigField, NodeFactory, NodeMetadata, NodeRunner};
use std::collections::HashMap;
use std::sync::Arc;

/// Action taken when a transform could not produce a result
pub const ERROR_ACTION: &str = "error";

fn config_key(config: &HashMap<String, Value>, name: &str, default: &str) -> Result<String, NodeError> {
    match config.get(name) {
        None => Ok(default.to_string()),
        Some(value) => value
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "string".to_string(),
                actual: value.type_name().to_string(),
            }),
    }
}

/// Writes a transform result, or records its failure under `error`
fn store_result(ctx: &NodeContext, output: &str, exec: Value) -> Action {
    match exec {
        Value::Error(message) => {
            tracing::warn!("Transform into '{}' failed: {}", output, message);
            ctx.store.insert("error", Value::Error(message));
            Action::from(ERROR_ACTION)
        }
        value => {
            ctx.store.insert(output, value);
            Action::default()
        }
    }
}

/// Parse a JSON string from the store into a structured value
pub struct JsonParseNode {
    input: String,
    output: String,
}

impl JsonParseNode {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }
}

impl Node for JsonParseNode {
    fn name(&self) -> &str {
        "transform.json_parse"
    }

    fn prep(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::String(ctx.store.get_str(&self.input)?))
    }

    fn exec(&self, _ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let input = prep.as_str().unwrap_or_default();
        let parsed: serde_json::Value = serde_json::from_str(input)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON parse error: {}", e)))?;

        Ok(Value::from_json(parsed))
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, exec: Value) -> Result<Action, NodeError> {
        Ok(store_result(ctx, &self.output, exec))
    }
}

pub struct JsonParseNodeFactory;

impl NodeFactory for JsonParseNodeFactory {
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        let node = JsonParseNode::new(
            config_key(config, "input", "json")?,
            config_key(config, "output", "parsed")?,
        );
        Ok(NodeHandle::Sync(Arc::new(
            NodeRunner::new(node).with_policy(options.retry),
        )))
    }

    fn node_type(&self) -> &str {
        "transform.json_parse"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Parse JSON string".to_string(),
            category: "transform".to_string(),
            kind: NodeKind::Base,
            config: vec![
                ConfigField::optional("input", "Store key holding the JSON text (default \"json\")"),
                ConfigField::optional("output", "Store key for the parsed value (default \"parsed\")"),
            ],
        }
    }
}

/// Render a store value as JSON text
pub struct JsonStringifyNode {
    input: String,
    output: String,
    pretty: bool,
}

impl JsonStringifyNode {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
            pretty: true,
        }
    }

    pub fn compact(mut self) -> Self {
        self.pretty = false;
        self
    }
}

impl Node for JsonStringifyNode {
    fn name(&self) -> &str {
        "transform.json_stringify"
    }

    fn prep(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(ctx.store.require(&self.input)?)
    }

    fn exec(&self, _ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let json = prep.to_json();
        let rendered = if self.pretty {
            serde_json::to_string_pretty(&json)
        } else {
            serde_json::to_string(&json)
        };

        rendered
            .map(Value::String)
            .map_err(|e| NodeError::ExecutionFailed(format!("JSON stringify error: {}", e)))
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, exec: Value) -> Result<Action, NodeError> {
        Ok(store_result(ctx, &self.output, exec))
    }
}

pub struct JsonStringifyNodeFactory;

impl NodeFactory for JsonStringifyNodeFactory {
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        let mut node = JsonStringifyNode::new(
            config_key(config, "input", "value")?,
            config_key(config, "output", "json")?,
        );
        if config.get("pretty").and_then(Value::as_bool) == Some(false) {
            node = node.compact();
        }
        Ok(NodeHandle::Sync(Arc::new(
            NodeRunner::new(node).with_policy(options.retry),
        )))
    }

    fn node_type(&self) -> &str {
        "transform.json_stringify"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Convert value to JSON string".to_string(),
            category: "transform".to_string(),
            kind: NodeKind::Base,
            config: vec![
                ConfigField::optional("input", "Store key of the value (default \"value\")"),
                ConfigField::optional("output", "Store key for the JSON text (default \"json\")"),
                ConfigField::optional("pretty", "Pretty-print (default true)"),
            ],
        }
    }
}
