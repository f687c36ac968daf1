//! HTTP error mapping.
//!
//! Every error surfaced to clients carries a stable `kind` tag alongside the
//! human-readable message.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cascade_engine::EngineError;
use cascade_workflow::RegistryError;
use serde::Serialize;

/// An API error with its HTTP mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiError {
    /// HTTP status to respond with.
    pub status: StatusCode,
    /// Stable machine-readable kind tag.
    pub kind: &'static str,
    /// Human-readable message.
    pub message: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    kind: &'a str,
    error: &'a str,
}

impl ApiError {
    /// A name or execution id that matched nothing.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            kind: "not_found",
            message: message.into(),
        }
    }

    /// A request body that cannot be interpreted.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            kind: "bad_request",
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody {
            kind: self.kind,
            error: &self.message,
        });
        (self.status, body).into_response()
    }
}

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        let (status, kind) = match &e {
            EngineError::InvalidWorkflow { .. } => {
                (StatusCode::UNPROCESSABLE_ENTITY, "invalid_workflow")
            }
            EngineError::NotFound { .. } => (StatusCode::NOT_FOUND, "not_found"),
            EngineError::AlreadyTerminal { .. } => (StatusCode::CONFLICT, "already_terminal"),
            EngineError::NotWaiting { .. } => (StatusCode::CONFLICT, "not_waiting"),
        };
        Self {
            status,
            kind,
            message: e.to_string(),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let (status, kind) = match &e {
            RegistryError::DuplicateName { .. } => (StatusCode::CONFLICT, "duplicate_name"),
            RegistryError::Invalid(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid_workflow"),
        };
        Self {
            status,
            kind,
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_core::ExecutionId;

    #[test]
    fn engine_errors_map_to_statuses() {
        let execution_id = ExecutionId::new();

        let err: ApiError = EngineError::NotFound { execution_id }.into();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.kind, "not_found");

        let err: ApiError = EngineError::InvalidWorkflow {
            reason: "bad edge".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(err.kind, "invalid_workflow");

        let err: ApiError = EngineError::NotWaiting {
            execution_id,
            node_id: "1".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.kind, "not_waiting");
    }

    #[test]
    fn registry_errors_map_to_statuses() {
        let err: ApiError = RegistryError::DuplicateName {
            name: "taken".to_string(),
        }
        .into();
        assert_eq!(err.status, StatusCode::CONFLICT);
        assert_eq!(err.kind, "duplicate_name");
    }
}
