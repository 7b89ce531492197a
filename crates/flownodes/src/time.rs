use async_trait::async_trait;
use flowcore::{AsyncNode, NodeContext, NodeError, NodeHandle, NodeKind, Value};
use flowruntime::{AsyncRunner, BuildOptions, ConfigField, NodeFactory, NodeMetadata};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Delay execution for a specified duration
pub struct DelayNode {
    delay: Duration,
}

impl DelayNode {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }
}

#[async_trait]
impl AsyncNode for DelayNode {
    fn name(&self) -> &str {
        "time.delay"
    }

    async fn exec_async(&self, ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        ctx.events
            .info(format!("Delaying for {}ms", self.delay.as_millis()));

        sleep(self.delay).await;

        Ok(Value::Null)
    }
}

pub struct DelayNodeFactory;

impl NodeFactory for DelayNodeFactory {
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        // One second when not specified
        let delay_ms = match config.get("delay_ms") {
            None => 1000,
            Some(value) => value
                .as_f64()
                .filter(|ms| *ms >= 0.0)
                .ok_or_else(|| {
                    NodeError::Configuration(format!(
                        "delay_ms must be a non-negative number, got {}",
                        value.type_name()
                    ))
                })? as u64,
        };

        let node = DelayNode::new(Duration::from_millis(delay_ms));
        Ok(NodeHandle::Async(Arc::new(
            AsyncRunner::new(node).with_policy(options.retry),
        )))
    }

    fn node_type(&self) -> &str {
        "time.delay"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Delay execution for specified milliseconds".to_string(),
            category: "time".to_string(),
            kind: NodeKind::Async,
            config: vec![ConfigField::optional("delay_ms", "Delay in milliseconds (default 1000)")],
        }
    }
}
