//! HTTP error bodies and status mapping for the host's endpoints.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use switchboard_core::errors::TransportError;
use switchboard_core::invocation::{FailureKind, ToolInvocationResult};

pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
pub const SESSION_NOT_FOUND: &str = "SESSION_NOT_FOUND";
pub const SESSION_CLOSED: &str = "SESSION_CLOSED";
pub const INVALID_MESSAGE: &str = "INVALID_MESSAGE";
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// `{ "error": { "code", "message" } }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
}

#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, UNAUTHORIZED, "missing or invalid credential")
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, INVALID_MESSAGE, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn code(&self) -> &'static str {
        self.code
    }
}

impl From<TransportError> for ApiError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Unauthorized => Self::unauthorized(),
            TransportError::SessionNotFound(id) => Self::new(
                StatusCode::NOT_FOUND,
                SESSION_NOT_FOUND,
                format!("no open session {id}"),
            ),
            TransportError::SessionClosed => {
                Self::new(StatusCode::GONE, SESSION_CLOSED, "session is closing or closed")
            }
            TransportError::Protocol(message) => Self::bad_request(message),
            other => Self::new(StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR, other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code.to_string(),
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

/// Status for a direct (dev route) tool invocation.
pub fn status_for_result(result: &ToolInvocationResult) -> StatusCode {
    match result.error().map(|e| e.kind) {
        None => StatusCode::OK,
        Some(FailureKind::UnknownTool) => StatusCode::NOT_FOUND,
        Some(FailureKind::Validation) => StatusCode::UNPROCESSABLE_ENTITY,
        Some(FailureKind::Timeout) => StatusCode::GATEWAY_TIMEOUT,
        Some(FailureKind::Execution) => StatusCode::INTERNAL_SERVER_ERROR,
        Some(FailureKind::Transport) => StatusCode::BAD_GATEWAY,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use switchboard_core::ids::CorrelationId;
    use switchboard_core::invocation::ToolFailure;

    #[test]
    fn transport_errors_map_to_statuses() {
        assert_eq!(ApiError::from(TransportError::Unauthorized).status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::from(TransportError::SessionNotFound("sess_x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(ApiError::from(TransportError::SessionClosed).status(), StatusCode::GONE);
        let bad = ApiError::from(TransportError::Protocol("not json".into()));
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);
        assert_eq!(bad.code(), INVALID_MESSAGE);
    }

    #[test]
    fn error_body_shape() {
        let body = ErrorBody {
            error: ErrorDetail {
                code: UNAUTHORIZED.into(),
                message: "nope".into(),
            },
        };
        assert_eq!(
            serde_json::to_value(body).unwrap(),
            json!({ "error": { "code": "UNAUTHORIZED", "message": "nope" } })
        );
    }

    #[test]
    fn result_statuses() {
        let ok = ToolInvocationResult::success(CorrelationId::new(), "t", json!({}), Duration::ZERO);
        assert_eq!(status_for_result(&ok), StatusCode::OK);

        let failed = |kind| {
            ToolInvocationResult::failure(
                CorrelationId::new(),
                "t",
                ToolFailure {
                    kind,
                    tool: "t".into(),
                    message: "m".into(),
                    field: None,
                },
                Duration::ZERO,
            )
        };
        assert_eq!(status_for_result(&failed(FailureKind::UnknownTool)), StatusCode::NOT_FOUND);
        assert_eq!(
            status_for_result(&failed(FailureKind::Validation)),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(status_for_result(&failed(FailureKind::Timeout)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for_result(&failed(FailureKind::Execution)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
