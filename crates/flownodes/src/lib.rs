//! Standard node library
//!
//! Collection of built-in nodes for common operations, plus the research
//! agent nodes which need a completion and a search collaborator.

pub mod agent;
mod debug;
mod http;
mod time;
mod transform;

pub use agent::{
    agent_flow, AgentAction, AnswerQuestion, Completion, DecideAction, Decision, HttpSearch,
    Search, SearchWeb,
};
pub use debug::DebugNode;
pub use http::{FetchAllNode, HttpRequestNode};
pub use time::DelayNode;
pub use transform::{JsonParseNode, JsonStringifyNode, ERROR_ACTION};
use flowruntime::NodeRegistry;

use std::sync::Arc;

/// Register all standard nodes with a registry
pub fn register_all(registry: &mut NodeRegistry) {
    registry.register(Arc::new(debug::DebugNodeFactory));
    registry.register(Arc::new(http::HttpRequestNodeFactory));
    registry.register(Arc::new(http::FetchAllNodeFactory));
    registry.register(Arc::new(transform::JsonParseNodeFactory));
    registry.register(Arc::new(transform::JsonStringifyNodeFactory));
    registry.register(Arc::new(time::DelayNodeFactory));
}

/// A registry holding every standard node type
pub fn standard_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    register_all(&mut registry);
    registry
}
