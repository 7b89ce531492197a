//! Core abstractions for the flow engine
//!
//! This crate provides the node contract (prep / exec / post and its async
//! counterpart), the shared store nodes exchange data through, routing
//! actions, execution events and declarative workflow definitions. The
//! execution strategies themselves live in `flowruntime`.

mod action;
mod error;
pub mod events;
mod node;
mod store;
mod value;
mod workflow;

pub use action::Action;
pub use error::{FlowError, NodeError, StoreError, WorkflowError};
pub use events::*;
pub use node::{
    merge_params, AsyncNode, AsyncStep, Node, NodeContext, NodeHandle, NodeId, NodeKind, Params,
    Step,
};
pub use store::SharedStore;
pub use value::Value;
pub use workflow::{
    NodeSpec, RetryPolicy, Transition, ValidationReport, Workflow, WorkflowId,
    WorkflowSettings,
};

/// Result type for flow operations
pub type Result<T> = std::result::Result<T, FlowError>;
