//! Workflow execution runtime
//!
//! This crate provides the execution strategies built on the `flowcore`
//! node contract: the retry executor, batch and parallel batch runners,
//! the action router and the sync / async flow orchestrators, plus the
//! node registry used to build flows from workflow definitions.

mod async_flow;
mod builder;
mod flow;
pub mod parallel;
mod registry;
pub mod retry;
mod router;
mod runner;
mod runtime;
mod trace;

pub use async_flow::{
    AsyncBatchFlow, AsyncBatchFlowHooks, AsyncFlow, AsyncFlowHooks, ParallelBatchFlow,
};
pub use builder::build_flow;
pub use flow::{BatchFlow, BatchFlowHooks, DefaultHooks, Flow, FlowHooks};
pub use registry::{BuildOptions, ConfigField, NodeFactory, NodeMetadata, NodeRegistry};
pub use retry::{exec_with_retry, exec_with_retry_async};
pub use router::Router;
pub use runner::{AsyncBatchRunner, AsyncRunner, BatchRunner, NodeRunner, ParallelBatchRunner};
pub use runtime::{
    ExecutionResult, FlowRuntime, RuntimeConfig, DEFAULT_EVENT_BUFFER, DEFAULT_MAX_PARALLEL,
};
