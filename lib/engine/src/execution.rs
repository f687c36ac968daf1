//! Observable execution state.
//!
//! The scheduler task owns the live frontier; what callers see through the
//! status verbs is this snapshot record, updated after every transition.

use cascade_core::ExecutionId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use std::collections::BTreeMap;

/// The overall phase of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    /// The scheduler loop is live.
    Running,
    /// Every executable node completed.
    Completed,
    /// At least one node failed, or the frontier deadlocked.
    Failed,
    /// The cancellation signal was honored.
    Cancelled,
}

impl ExecutionPhase {
    /// Returns true if this is a terminal phase.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// The status of a single node within an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunStatus {
    /// Waiting for upstream nodes.
    Pending,
    /// All dependencies completed; eligible to run.
    Ready,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Completed,
    /// Failed; dependents stay pending.
    Failed,
    /// Resolved with cancellation while waiting or running.
    Cancelled,
}

/// Per-node execution record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRunRecord {
    /// Current status.
    pub status: NodeRunStatus,
    /// Outputs written on successful completion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Map<String, JsonValue>>,
    /// Error message on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeRunRecord {
    /// Creates a pending record.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            status: NodeRunStatus::Pending,
            output: None,
            error: None,
        }
    }
}

/// The observable record of one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionState {
    /// The workflow this execution runs.
    pub workflow_id: String,
    /// The execution id.
    pub execution_id: ExecutionId,
    /// Current phase.
    pub phase: ExecutionPhase,
    /// Executable indices waiting on dependencies.
    pub pending: Vec<usize>,
    /// Executable indices eligible to run.
    pub ready: Vec<usize>,
    /// Executable indices currently running.
    pub running: Vec<usize>,
    /// Executable indices that completed.
    pub completed: Vec<usize>,
    /// Executable indices that failed.
    pub failed: Vec<usize>,
    /// Per-node records keyed by effective node id.
    pub nodes: BTreeMap<String, NodeRunRecord>,
    /// When the execution started.
    pub started_at: DateTime<Utc>,
    /// When the execution reached a terminal phase.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Terminal error message, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecutionState {
    /// Creates a running state covering the given node ids.
    #[must_use]
    pub fn new(
        workflow_id: impl Into<String>,
        execution_id: ExecutionId,
        node_ids: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            workflow_id: workflow_id.into(),
            execution_id,
            phase: ExecutionPhase::Running,
            pending: Vec::new(),
            ready: Vec::new(),
            running: Vec::new(),
            completed: Vec::new(),
            failed: Vec::new(),
            nodes: node_ids
                .into_iter()
                .map(|id| (id, NodeRunRecord::pending()))
                .collect(),
            started_at: Utc::now(),
            finished_at: None,
            error: None,
        }
    }

    /// Returns the record for a node id, if known.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&NodeRunRecord> {
        self.nodes.get(node_id)
    }

    /// Marks the terminal phase with an optional reason.
    pub fn finish(&mut self, phase: ExecutionPhase, error: Option<String>) {
        self.phase = phase;
        self.finished_at = Some(Utc::now());
        self.error = error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_terminality() {
        assert!(!ExecutionPhase::Running.is_terminal());
        assert!(ExecutionPhase::Completed.is_terminal());
        assert!(ExecutionPhase::Failed.is_terminal());
        assert!(ExecutionPhase::Cancelled.is_terminal());
    }

    #[test]
    fn new_state_is_running_with_pending_records() {
        let state = ExecutionState::new(
            "pipeline",
            ExecutionId::new(),
            vec!["0".to_string(), "1".to_string()],
        );

        assert_eq!(state.phase, ExecutionPhase::Running);
        assert_eq!(state.nodes.len(), 2);
        assert_eq!(state.node("0").map(|r| r.status), Some(NodeRunStatus::Pending));
        assert!(state.finished_at.is_none());
    }

    #[test]
    fn finish_records_phase_and_reason() {
        let mut state = ExecutionState::new("pipeline", ExecutionId::new(), vec![]);
        state.finish(ExecutionPhase::Failed, Some("1 node(s) failed".to_string()));

        assert_eq!(state.phase, ExecutionPhase::Failed);
        assert!(state.finished_at.is_some());
        assert_eq!(state.error.as_deref(), Some("1 node(s) failed"));
    }

    #[test]
    fn state_serde_roundtrip() {
        let mut state =
            ExecutionState::new("pipeline", ExecutionId::new(), vec!["entry".to_string()]);
        state.completed.push(0);

        let json = serde_json::to_string(&state).expect("serialize");
        let parsed: ExecutionState = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(state, parsed);
    }
}
