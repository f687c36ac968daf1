//! Event records published on the bus.
//!
//! An event captures one observable state change: workflow lifecycle, node
//! lifecycle, user interaction, or a registry operation. Events are plain
//! data; ordering and delivery guarantees live in the bus.

use cascade_core::{EventId, ExecutionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The type of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A workflow execution was started.
    WorkflowStarted,
    /// A workflow execution completed successfully.
    WorkflowCompleted,
    /// A workflow execution failed.
    WorkflowFailed,
    /// A workflow execution was cancelled.
    WorkflowCancelled,
    /// A node began executing.
    NodeStarted,
    /// A node completed successfully.
    NodeCompleted,
    /// A node failed.
    NodeFailed,
    /// A user-input node is waiting for a value.
    UserInputRequested,
    /// A pending user-input promise was resolved.
    UserInputReceived,
    /// A workflow was added to the registry.
    RegistryAdded,
    /// A workflow was removed from the registry.
    RegistryRemoved,
    /// A workflow was retrieved from the registry.
    RegistryGot,
    /// The registry names were listed.
    RegistryListed,
    /// The registry was cleared.
    RegistryCleared,
    /// An empty workflow was created in the registry.
    RegistryCreated,
    /// A stored workflow's execution plan was prepared.
    RegistryPrepared,
}

impl EventType {
    /// Returns the topic string used for subscription matching.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        match self {
            Self::WorkflowStarted => "workflow.started",
            Self::WorkflowCompleted => "workflow.completed",
            Self::WorkflowFailed => "workflow.failed",
            Self::WorkflowCancelled => "workflow.cancelled",
            Self::NodeStarted => "node.started",
            Self::NodeCompleted => "node.completed",
            Self::NodeFailed => "node.failed",
            Self::UserInputRequested => "user.input_requested",
            Self::UserInputReceived => "user.input_received",
            Self::RegistryAdded => "registry.added",
            Self::RegistryRemoved => "registry.removed",
            Self::RegistryGot => "registry.got",
            Self::RegistryListed => "registry.listed",
            Self::RegistryCleared => "registry.cleared",
            Self::RegistryCreated => "registry.created",
            Self::RegistryPrepared => "registry.prepared",
        }
    }

    /// Returns true for the terminal workflow lifecycle types.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowCompleted | Self::WorkflowFailed | Self::WorkflowCancelled
        )
    }
}

/// A single lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,
    /// The event type.
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// When the event was emitted. Assigned by the bus; non-decreasing
    /// within one execution.
    pub timestamp: DateTime<Utc>,
    /// The workflow this event belongs to, if any.
    pub workflow_id: Option<String>,
    /// The execution this event belongs to, if any.
    pub execution_id: Option<ExecutionId>,
    /// The node that produced this event, if any.
    pub source_node_id: Option<String>,
    /// Structured event payload.
    pub data: JsonValue,
    /// Error message for failure events.
    pub error: Option<String>,
}

impl Event {
    /// Creates a bare event of the given type with an empty payload.
    ///
    /// The timestamp set here is provisional; the bus overwrites it at
    /// emission time.
    #[must_use]
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            timestamp: Utc::now(),
            workflow_id: None,
            execution_id: None,
            source_node_id: None,
            data: JsonValue::Null,
            error: None,
        }
    }

    /// Sets the workflow id.
    #[must_use]
    pub fn workflow(mut self, workflow_id: impl Into<String>) -> Self {
        self.workflow_id = Some(workflow_id.into());
        self
    }

    /// Sets the execution id.
    #[must_use]
    pub fn execution(mut self, execution_id: ExecutionId) -> Self {
        self.execution_id = Some(execution_id);
        self
    }

    /// Sets the source node id.
    #[must_use]
    pub fn node(mut self, node_id: impl Into<String>) -> Self {
        self.source_node_id = Some(node_id.into());
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn data(mut self, data: JsonValue) -> Self {
        self.data = data;
        self
    }

    /// Sets the error message.
    #[must_use]
    pub fn error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    /// Returns the topic string for subscription matching.
    #[must_use]
    pub fn topic(&self) -> &'static str {
        self.event_type.topic()
    }
}
