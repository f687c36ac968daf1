//! The backend handle interface.
//!
//! The engine never talks to concrete agent or tool adapters; it sees them
//! only through the two narrow async handles on [`Backend`]. Handles are
//! addressed by integer index into flat per-kind vectors, matching the
//! arena-with-indices layout of the config graph.

use crate::node::{NodeKind, NodeSpec};
use crate::workflow::Workflow;
use async_trait::async_trait;
use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Errors surfaced by backend handles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// No resource is registered at the given index.
    NotConfigured { kind: &'static str, index: u32 },
    /// The underlying call failed.
    Call { message: String },
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotConfigured { kind, index } => {
                write!(f, "no {kind} configured at index {index}")
            }
            Self::Call { message } => write!(f, "backend call failed: {message}"),
        }
    }
}

impl std::error::Error for BackendError {}

/// The two contracts the engine consumes from the backend layer.
///
/// Implementations must be safe to invoke from multiple tasks concurrently.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Runs the agent at `index` with a request message.
    async fn run_agent(&self, index: u32, request: JsonValue) -> Result<JsonValue, BackendError>;

    /// Runs the tool at `index` over a source value with keyword arguments.
    async fn run_tool(
        &self,
        index: u32,
        source: JsonValue,
        args: Map<String, JsonValue>,
    ) -> Result<JsonValue, BackendError>;
}

/// The resource injected into a node at instantiation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeResource {
    /// No injected resource.
    None,
    /// An agent handle by index.
    Agent(u32),
    /// A tool handle by index.
    Tool(u32),
}

/// Computes the per-node resource vector for a workflow.
///
/// Agent and tool nodes whose `config` field is an integer receive the
/// matching handle; a node whose config was inlined (or is absent) gets no
/// resource and reports the failure at execution time.
#[must_use]
pub fn node_resources(workflow: &Workflow) -> Vec<NodeResource> {
    workflow.nodes.iter().map(node_resource).collect()
}

fn node_resource(node: &NodeSpec) -> NodeResource {
    let index = node
        .fields
        .get("config")
        .and_then(JsonValue::as_u64)
        .and_then(|index| u32::try_from(index).ok());

    match (node.kind(), index) {
        (Some(NodeKind::Agent), Some(index)) => NodeResource::Agent(index),
        (Some(NodeKind::Tool), Some(index)) => NodeResource::Tool(index),
        _ => NodeResource::None,
    }
}

/// A backend that echoes its inputs back; useful for tests and wiring checks.
pub struct EchoBackend;

#[async_trait]
impl Backend for EchoBackend {
    async fn run_agent(&self, index: u32, request: JsonValue) -> Result<JsonValue, BackendError> {
        Ok(serde_json::json!({"agent": index, "echo": request}))
    }

    async fn run_tool(
        &self,
        index: u32,
        source: JsonValue,
        args: Map<String, JsonValue>,
    ) -> Result<JsonValue, BackendError> {
        Ok(serde_json::json!({"tool": index, "echo": source, "args": args}))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn agent_node_with_index_gets_handle() {
        let mut workflow = Workflow::named("wired");
        workflow.add_node(NodeSpec::new(NodeKind::Agent).field("config", serde_json::json!(2)));
        workflow.add_node(NodeSpec::new(NodeKind::Tool).field("config", serde_json::json!(0)));
        workflow.add_node(NodeSpec::new(NodeKind::Start));

        let resources = node_resources(&workflow);
        assert_eq!(resources[0], NodeResource::Agent(2));
        assert_eq!(resources[1], NodeResource::Tool(0));
        assert_eq!(resources[2], NodeResource::None);
    }

    #[test]
    fn inlined_config_gets_no_handle() {
        let mut workflow = Workflow::named("inline");
        workflow.add_node(
            NodeSpec::new(NodeKind::Agent).field("config", serde_json::json!({"name": "helper"})),
        );

        let resources = node_resources(&workflow);
        assert_eq!(resources[0], NodeResource::None);
    }

    #[tokio::test]
    async fn echo_backend_roundtrips() {
        let backend = EchoBackend;
        let response = backend
            .run_agent(1, serde_json::json!("hello"))
            .await
            .expect("agent call");
        assert_eq!(response["agent"], 1);
        assert_eq!(response["echo"], "hello");

        let response = backend
            .run_tool(0, serde_json::json!({"q": "rust"}), Map::new())
            .await
            .expect("tool call");
        assert_eq!(response["tool"], 0);
    }

    #[test]
    fn backend_error_display() {
        let err = BackendError::NotConfigured {
            kind: "agent",
            index: 3,
        };
        assert!(err.to_string().contains("no agent configured at index 3"));
    }
}
