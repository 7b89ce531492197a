//! Execution strategies for a single node.
//!
//! Each runner owns a node and its retry policy and turns it into a
//! [`Step`] or [`AsyncStep`] a flow can route to. Runners can also be run on
//! their own; a node run outside a flow has no successors to follow.

use crate::parallel::run_indexed;
use crate::retry::{exec_with_retry, exec_with_retry_async};
use crate::runtime::DEFAULT_MAX_PARALLEL;
use async_trait::async_trait;
use flowcore::{
    Action, AsyncNode, AsyncStep, FlowError, Node, NodeContext, NodeError, NodeKind, RetryPolicy,
    SharedStore, Step, Value,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Items of a batch prep result. `Null` is an empty batch; anything else
/// that is not an array is logged and treated as empty.
fn batch_items<'a>(name: &str, prep: &'a Value) -> &'a [Value] {
    match prep {
        Value::Array(items) => items.as_slice(),
        Value::Null => &[],
        other => {
            tracing::warn!(
                "Batch node '{}' expected a list from prep, got {}; nothing to do",
                name,
                other.type_name()
            );
            &[]
        }
    }
}

/// Plain node: prep, retrying exec, post
pub struct NodeRunner<N> {
    node: N,
    retry: RetryPolicy,
}

impl<N: Node> NodeRunner<N> {
    pub fn new(node: N) -> Self {
        Self {
            node,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(self, max_retries: u32, wait: Duration) -> Self {
        self.with_policy(RetryPolicy::new(max_retries, wait))
    }

    pub fn with_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        self.run_step(&NodeContext::new(store.clone()))
    }
}

impl<N: Node> Step for NodeRunner<N> {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Base
    }

    fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        let prep = self.node.prep(ctx)?;
        let exec = exec_with_retry(&self.node, &self.retry, ctx, &prep)?;
        Ok(self.node.post(ctx, prep, exec)?)
    }
}

/// Applies the node's retrying exec to every item of its prep list, in
/// order. Post receives the results as a `Value::Array` of equal length.
pub struct BatchRunner<N> {
    node: N,
    retry: RetryPolicy,
}

impl<N: Node> BatchRunner<N> {
    pub fn new(node: N) -> Self {
        Self {
            node,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(self, max_retries: u32, wait: Duration) -> Self {
        self.with_policy(RetryPolicy::new(max_retries, wait))
    }

    pub fn with_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        self.run_step(&NodeContext::new(store.clone()))
    }

    /// The batch exec step on its own
    pub fn exec_batch(&self, ctx: &NodeContext, prep: &Value) -> Result<Vec<Value>, NodeError> {
        batch_items(self.node.name(), prep)
            .iter()
            .map(|item| exec_with_retry(&self.node, &self.retry, ctx, item))
            .collect()
    }
}

impl<N: Node> Step for BatchRunner<N> {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Batch
    }

    fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        let prep = self.node.prep(ctx)?;
        let results = self.exec_batch(ctx, &prep)?;
        Ok(self.node.post(ctx, prep, Value::Array(results))?)
    }
}

/// Async node: awaited prep, retrying exec and post
pub struct AsyncRunner<N> {
    node: Arc<N>,
    retry: RetryPolicy,
}

impl<N: AsyncNode> AsyncRunner<N> {
    pub fn new(node: N) -> Self {
        Self {
            node: Arc::new(node),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(self, max_retries: u32, wait: Duration) -> Self {
        self.with_policy(RetryPolicy::new(max_retries, wait))
    }

    pub fn with_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn node(&self) -> &N {
        &self.node
    }

    pub async fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        self.run_step(&NodeContext::new(store.clone())).await
    }
}

impl<N: AsyncNode + 'static> AsyncRunner<N> {
    /// Run the lifecycle on its own task; the handle resolves once, with
    /// the action post returned.
    pub fn run_async(&self, store: SharedStore) -> JoinHandle<Result<Action, FlowError>> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(&store).await })
    }
}

impl<N> Clone for AsyncRunner<N> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            retry: self.retry,
        }
    }
}

#[async_trait]
impl<N: AsyncNode> AsyncStep for AsyncRunner<N> {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::Async
    }

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        let prep = self.node.prep_async(ctx).await?;
        let exec = exec_with_retry_async(self.node.as_ref(), &self.retry, ctx, &prep).await?;
        Ok(self.node.post_async(ctx, prep, exec).await?)
    }
}

/// Async batch: items are processed one after another, each awaited
pub struct AsyncBatchRunner<N> {
    node: Arc<N>,
    retry: RetryPolicy,
}

impl<N: AsyncNode> AsyncBatchRunner<N> {
    pub fn new(node: N) -> Self {
        Self {
            node: Arc::new(node),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(self, max_retries: u32, wait: Duration) -> Self {
        self.with_policy(RetryPolicy::new(max_retries, wait))
    }

    pub fn with_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        self.run_step(&NodeContext::new(store.clone())).await
    }

    pub async fn exec_batch(
        &self,
        ctx: &NodeContext,
        prep: &Value,
    ) -> Result<Vec<Value>, NodeError> {
        let items = batch_items(self.node.name(), prep);
        let mut results = Vec::with_capacity(items.len());
        for item in items {
            results.push(exec_with_retry_async(self.node.as_ref(), &self.retry, ctx, item).await?);
        }
        Ok(results)
    }
}

impl<N: AsyncNode + 'static> AsyncBatchRunner<N> {
    /// Process the batch on its own task
    pub fn run_async(&self, store: SharedStore) -> JoinHandle<Result<Action, FlowError>> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(&store).await })
    }
}

impl<N> Clone for AsyncBatchRunner<N> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            retry: self.retry,
        }
    }
}

#[async_trait]
impl<N: AsyncNode> AsyncStep for AsyncBatchRunner<N> {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::AsyncBatch
    }

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        let prep = self.node.prep_async(ctx).await?;
        let results = self.exec_batch(ctx, &prep).await?;
        Ok(self.node.post_async(ctx, prep, Value::Array(results)).await?)
    }
}

/// Async batch with one task per item.
///
/// All items run concurrently up to `max_parallel` at a time and post only
/// runs once every item has finished. Results keep the input order. Items
/// share the store: nodes writing to it from exec must keep their keys apart.
pub struct ParallelBatchRunner<N> {
    node: Arc<N>,
    retry: RetryPolicy,
    max_parallel: Option<usize>,
}

impl<N: AsyncNode + 'static> ParallelBatchRunner<N> {
    pub fn new(node: N) -> Self {
        Self {
            node: Arc::new(node),
            retry: RetryPolicy::default(),
            max_parallel: Some(DEFAULT_MAX_PARALLEL),
        }
    }

    pub fn with_retry(self, max_retries: u32, wait: Duration) -> Self {
        self.with_policy(RetryPolicy::new(max_retries, wait))
    }

    pub fn with_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Cap on concurrently running items; `None` or `Some(0)` starts them all at once
    pub fn with_max_parallel(mut self, max_parallel: Option<usize>) -> Self {
        self.max_parallel = max_parallel;
        self
    }

    pub fn max_parallel(&self) -> Option<usize> {
        self.max_parallel
    }

    pub async fn run(&self, store: &SharedStore) -> Result<Action, FlowError> {
        self.run_step(&NodeContext::new(store.clone())).await
    }

    pub async fn exec_batch(
        &self,
        ctx: &NodeContext,
        prep: &Value,
    ) -> Result<Vec<Value>, FlowError> {
        let items = batch_items(self.node.name(), prep).to_vec();
        let outputs = run_indexed(items, self.max_parallel, |_, item| {
            let node = Arc::clone(&self.node);
            let ctx = ctx.clone();
            let retry = self.retry;
            async move { exec_with_retry_async(node.as_ref(), &retry, &ctx, &item).await }
        })
        .await?;

        Ok(outputs.into_iter().collect::<Result<Vec<_>, NodeError>>()?)
    }

    /// Fan the batch out from a separate task; the handle resolves after post
    pub fn run_async(&self, store: SharedStore) -> JoinHandle<Result<Action, FlowError>> {
        let runner = self.clone();
        tokio::spawn(async move { runner.run(&store).await })
    }
}

impl<N> Clone for ParallelBatchRunner<N> {
    fn clone(&self) -> Self {
        Self {
            node: Arc::clone(&self.node),
            retry: self.retry,
            max_parallel: self.max_parallel,
        }
    }
}

#[async_trait]
impl<N: AsyncNode + 'static> AsyncStep for ParallelBatchRunner<N> {
    fn name(&self) -> &str {
        self.node.name()
    }

    fn kind(&self) -> NodeKind {
        NodeKind::AsyncParallelBatch
    }

    async fn run_step(&self, ctx: &NodeContext) -> Result<Action, FlowError> {
        let prep = self.node.prep_async(ctx).await?;
        let results = self.exec_batch(ctx, &prep).await?;
        Ok(self.node.post_async(ctx, prep, Value::Array(results)).await?)
    }
}
