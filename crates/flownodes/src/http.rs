use async_trait::async_trait;
use flowcore::{Action, AsyncNode, NodeContext, NodeError, NodeHandle, NodeKind, Value};
use flowruntime::{
    AsyncRunner, BuildOptions, ConfigField, NodeFactory, NodeMetadata, ParallelBatchRunner,
};
use std::collections::HashMap;
use std::sync::Arc;

fn string_config(config: &HashMap<String, Value>, name: &str) -> Result<Option<String>, NodeError> {
    match config.get(name) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| NodeError::InvalidInputType {
                field: name.to_string(),
                expected: "string".to_string(),
                actual: value.type_name().to_string(),
            }),
    }
}

fn header_config(config: &HashMap<String, Value>) -> Vec<(String, String)> {
    let Some(Value::Object(headers)) = config.get("headers") else {
        return Vec::new();
    };
    headers
        .iter()
        .filter_map(|(key, value)| value.as_str().map(|v| (key.clone(), v.to_string())))
        .collect()
}

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
    method: String,
    url: Option<String>,
    headers: Vec<(String, String)>,
    prefix: String,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            method: "GET".to_string(),
            url: None,
            headers: Vec::new(),
            prefix: String::new(),
        }
    }

    /// Fixed url; without one the node reads `url` from the store
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_method(mut self, method: impl Into<String>) -> Self {
        self.method = method.into().to_uppercase();
        self
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Store keys are written as `<prefix>_status`, `<prefix>_body`
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn key(&self, name: &str) -> String {
        if self.prefix.is_empty() {
            name.to_string()
        } else {
            format!("{}_{}", self.prefix, name)
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AsyncNode for HttpRequestNode {
    fn name(&self) -> &str {
        "http.request"
    }

    async fn prep_async(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        let url = match &self.url {
            Some(url) => url.clone(),
            None => ctx.store.get_str("url")?,
        };
        let body = ctx.store.get("body").unwrap_or_default();

        Ok(Value::Object(HashMap::from([
            ("url".to_string(), Value::String(url)),
            ("body".to_string(), body),
        ])))
    }

    async fn exec_async(&self, ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let request = prep.as_object().cloned().unwrap_or_default();
        let url = request
            .get("url")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::MissingInput("url".to_string()))?;

        ctx.events.info(format!("{} {}", self.method, url));

        let builder = match self.method.as_str() {
            "GET" => self.client.get(url),
            "DELETE" => self.client.delete(url),
            "POST" | "PUT" => {
                let builder = if self.method == "POST" {
                    self.client.post(url)
                } else {
                    self.client.put(url)
                };
                match request.get("body") {
                    Some(Value::String(text)) => builder.body(text.clone()),
                    Some(Value::Null) | None => builder,
                    Some(other) => builder.json(&other.to_json()),
                }
            }
            other => {
                return Err(NodeError::Configuration(format!("Unsupported method: {}", other)))
            }
        };

        let builder = self
            .headers
            .iter()
            .fold(builder, |req, (key, value)| req.header(key, value));

        let response = builder
            .send()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        ctx.events.info(format!("Response status: {}", status));

        Ok(Value::Object(HashMap::from([
            ("status".to_string(), Value::from(status as f64)),
            ("body".to_string(), Value::String(body)),
        ])))
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        _prep: Value,
        exec: Value,
    ) -> Result<Action, NodeError> {
        match exec {
            Value::Error(message) => {
                ctx.store.insert(self.key("error"), Value::Error(message));
                Ok(Action::from("error"))
            }
            Value::Object(mut response) => {
                for name in ["status", "body"] {
                    let value = response.remove(name).unwrap_or_default();
                    ctx.store.insert(self.key(name), value);
                }
                Ok(Action::default())
            }
            other => Err(NodeError::ExecutionFailed(format!(
                "unexpected response value: {}",
                other.type_name()
            ))),
        }
    }
}

pub struct HttpRequestNodeFactory;

impl NodeFactory for HttpRequestNodeFactory {
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        let mut node = HttpRequestNode::new();
        if let Some(url) = string_config(config, "url")? {
            node = node.with_url(url);
        }
        if let Some(method) = string_config(config, "method")? {
            node = node.with_method(method);
        }
        if let Some(prefix) = string_config(config, "prefix")? {
            node = node.with_prefix(prefix);
        }
        for (key, value) in header_config(config) {
            node = node.with_header(key, value);
        }

        Ok(NodeHandle::Async(Arc::new(
            AsyncRunner::new(node).with_policy(options.retry),
        )))
    }

    fn node_type(&self) -> &str {
        "http.request"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Make HTTP requests".to_string(),
            category: "http".to_string(),
            kind: NodeKind::Async,
            config: vec![
                ConfigField::optional("url", "Request url; read from the store key \"url\" when absent"),
                ConfigField::optional("method", "GET, POST, PUT or DELETE (default GET)"),
                ConfigField::optional("headers", "Object of header names to values"),
                ConfigField::optional("prefix", "Prefix for the status/body store keys"),
            ],
        }
    }
}

/// Fetches a list of urls concurrently, one GET per url.
///
/// A url that keeps failing contributes an error value instead of aborting
/// the batch; the bodies are written to the output key in input order.
pub struct FetchAllNode {
    client: reqwest::Client,
    input: String,
    output: String,
}

impl FetchAllNode {
    pub fn new(input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            input: input.into(),
            output: output.into(),
        }
    }
}

#[async_trait]
impl AsyncNode for FetchAllNode {
    fn name(&self) -> &str {
        "http.fetch_all"
    }

    async fn prep_async(&self, ctx: &NodeContext) -> Result<Value, NodeError> {
        Ok(Value::Array(ctx.store.get_array(&self.input)?))
    }

    async fn exec_async(&self, _ctx: &NodeContext, prep: &Value) -> Result<Value, NodeError> {
        let url = prep.as_str().ok_or_else(|| NodeError::InvalidInputType {
            field: self.input.clone(),
            expected: "string".to_string(),
            actual: prep.type_name().to_string(),
        })?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| NodeError::ExecutionFailed(format!("GET {} failed: {}", url, e)))?;

        response
            .text()
            .await
            .map(Value::String)
            .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read {}: {}", url, e)))
    }

    async fn post_async(
        &self,
        ctx: &NodeContext,
        _prep: Value,
        exec: Value,
    ) -> Result<Action, NodeError> {
        let failed = exec
            .as_array()
            .map(|items| items.iter().filter(|v| v.is_error()).count())
            .unwrap_or_default();
        if failed > 0 {
            ctx.events.warn(format!("{} url(s) could not be fetched", failed));
        }
        ctx.store.insert(self.output.clone(), exec);
        Ok(Action::default())
    }
}

pub struct FetchAllNodeFactory;

impl NodeFactory for FetchAllNodeFactory {
    fn create(
        &self,
        config: &HashMap<String, Value>,
        options: &BuildOptions,
    ) -> Result<NodeHandle, NodeError> {
        let input = string_config(config, "input")?.unwrap_or_else(|| "urls".to_string());
        let output = string_config(config, "output")?.unwrap_or_else(|| "responses".to_string());

        Ok(NodeHandle::Async(Arc::new(
            ParallelBatchRunner::new(FetchAllNode::new(input, output))
                .with_policy(options.retry)
                .with_max_parallel(options.max_parallel),
        )))
    }

    fn node_type(&self) -> &str {
        "http.fetch_all"
    }

    fn metadata(&self) -> NodeMetadata {
        NodeMetadata {
            description: "Fetch a list of urls concurrently".to_string(),
            category: "http".to_string(),
            kind: NodeKind::AsyncParallelBatch,
            config: vec![
                ConfigField::optional("input", "Store key holding the url list (default \"urls\")"),
                ConfigField::optional("output", "Store key for the bodies (default \"responses\")"),
            ],
        }
    }
}
