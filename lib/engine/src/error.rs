//! Error types for the execution engine.

use cascade_core::ExecutionId;
use cascade_workflow::{BackendError, LinkError};
use std::fmt;

/// Terminal reason recorded when dependents of failed nodes can never run.
pub const DEADLOCK_REASON: &str = "deadlock / failed dependency";

/// Errors surfaced by engine verbs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The workflow failed link-time validation.
    InvalidWorkflow { reason: String },
    /// No execution with the given id exists.
    NotFound { execution_id: ExecutionId },
    /// The execution has already reached a terminal state.
    AlreadyTerminal { execution_id: ExecutionId },
    /// No pending user-input promise matches the given node.
    NotWaiting {
        execution_id: ExecutionId,
        node_id: String,
    },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidWorkflow { reason } => write!(f, "invalid workflow: {reason}"),
            Self::NotFound { execution_id } => {
                write!(f, "execution not found: {execution_id}")
            }
            Self::AlreadyTerminal { execution_id } => {
                write!(f, "execution already terminal: {execution_id}")
            }
            Self::NotWaiting {
                execution_id,
                node_id,
            } => {
                write!(
                    f,
                    "node '{node_id}' in execution {execution_id} is not waiting for input"
                )
            }
        }
    }
}

impl std::error::Error for EngineError {}

impl From<LinkError> for EngineError {
    fn from(e: LinkError) -> Self {
        Self::InvalidWorkflow {
            reason: e.to_string(),
        }
    }
}

/// Errors from a single node execution.
///
/// A node error is captured per node and reported via events; it never fails
/// the whole execution by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    /// A script failed to evaluate.
    Script { message: String },
    /// A required input was missing.
    MissingInput { slot: String },
    /// The injected backend handle failed.
    Backend(BackendError),
    /// An agent or tool node has no injected handle.
    NotConfigured { kind: &'static str },
    /// A user-input wait timed out.
    Timeout { seconds: u64 },
    /// The node observed the cancellation signal.
    Cancelled,
    /// Any other execution failure.
    Failed { message: String },
}

impl fmt::Display for NodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Script { message } => write!(f, "script error: {message}"),
            Self::MissingInput { slot } => write!(f, "missing input '{slot}'"),
            Self::Backend(e) => write!(f, "{e}"),
            Self::NotConfigured { kind } => write!(f, "no {kind} configured"),
            Self::Timeout { seconds } => {
                write!(f, "user input timeout after {seconds}s")
            }
            Self::Cancelled => write!(f, "cancelled"),
            Self::Failed { message } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for NodeError {}

impl From<BackendError> for NodeError {
    fn from(e: BackendError) -> Self {
        Self::Backend(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_error_display() {
        let execution_id = ExecutionId::new();
        let err = EngineError::NotWaiting {
            execution_id,
            node_id: "1".to_string(),
        };
        assert!(err.to_string().contains("not waiting for input"));
    }

    #[test]
    fn link_error_converts_to_invalid_workflow() {
        let err: EngineError = LinkError::UnknownKind {
            index: 0,
            tag: "mystery_node".to_string(),
        }
        .into();
        assert!(matches!(err, EngineError::InvalidWorkflow { .. }));
    }

    #[test]
    fn node_error_display() {
        assert_eq!(
            NodeError::Timeout { seconds: 60 }.to_string(),
            "user input timeout after 60s"
        );
        assert_eq!(NodeError::Cancelled.to_string(), "cancelled");
    }
}
