#![allow(dead_code)]

use async_trait::async_trait;
use flowcore::{Action, AsyncNode, Node, NodeContext, NodeError, SharedStore, Value};

/// Initialize tracing for tests
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};
    let _ = fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .with_test_writer()
        .try_init();
}

/// Append `name` to the `visited` list in the store
pub fn record_visit(store: &SharedStore, name: &str) {
    store.update("visited", |value| match value {
        Value::Array(items) => items.push(Value::from(name)),
        other => *other = Value::Array(vec![Value::from(name)]),
    });
}

pub fn visited(store: &SharedStore) -> Vec<String> {
    store
        .get_array("visited")
        .unwrap_or_default()
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect()
}

/// Records its visit and returns a fixed action
pub struct Visit {
    pub name: &'static str,
    pub action: &'static str,
}

impl Visit {
    pub fn new(name: &'static str, action: &'static str) -> Self {
        Self { name, action }
    }
}

impl Node for Visit {
    fn name(&self) -> &str {
        self.name
    }

    fn post(&self, ctx: &NodeContext, _prep: Value, _exec: Value) -> Result<Action, NodeError> {
        record_visit(&ctx.store, self.name);
        Ok(Action::from(self.action))
    }
}

/// Async twin of [`Visit`]
pub struct AsyncVisit {
    pub name: &'static str,
    pub action: &'static str,
}

impl AsyncVisit {
    pub fn new(name: &'static str, action: &'static str) -> Self {
        Self { name, action }
    }
}

#[async_trait]
impl AsyncNode for AsyncVisit {
    fn name(&self) -> &str {
        self.name
    }

    async fn exec_async(&self, _ctx: &NodeContext, _prep: &Value) -> Result<Value, NodeError> {
        tokio::task::yield_now().await;
        Ok(Value::Null)
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        _prep: Value,
        _exec: Value,
    ) -> Result<Action, NodeError> {
        record_visit(&ctx.store, self.name);
        Ok(Action::from(self.action))
    }
}
