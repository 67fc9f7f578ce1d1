use std::time::Duration;

/// Session-level failures between the orchestrator and the tool host.
/// Any of these ends the session it occurred on, never the process.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("unauthorized: missing or invalid credential")]
    Unauthorized,
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("session closed")]
    SessionClosed,
    #[error("protocol error: {0}")]
    Protocol(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
    #[error("unexpected status {status}: {body}")]
    Http { status: u16, body: String },
}

impl TransportError {
    /// Worth retrying on a fresh connection.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SessionClosed | Self::SessionNotFound(_) | Self::Network(_) | Self::Timeout(_)
        )
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::SessionNotFound(_) => "session_not_found",
            Self::SessionClosed => "session_closed",
            Self::Protocol(_) => "protocol_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Http { .. } => "http_error",
        }
    }

    /// Classify an HTTP status returned by the tool host.
    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::Unauthorized,
            404 => Self::SessionNotFound(body),
            410 => Self::SessionClosed,
            400 => Self::Protocol(body),
            _ => Self::Http { status, body },
        }
    }
}

/// Failures of the model collaborator. Any of these ends the current
/// orchestration run as model-unavailable.
#[derive(Clone, Debug, thiserror::Error)]
pub enum ModelError {
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("rate limited")]
    RateLimited,
    #[error("server error {status}: {body}")]
    ServerError { status: u16, body: String },
    #[error("model unavailable: {0}")]
    Unavailable(String),
    #[error("invalid response: {0}")]
    InvalidResponse(String),
    #[error("timeout after {0:?}")]
    Timeout(Duration),
}

impl ModelError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::RateLimited | Self::ServerError { .. } | Self::Unavailable(_) | Self::Timeout(_)
        )
    }

    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AuthenticationFailed(_) => "authentication_failed",
            Self::InvalidRequest(_) => "invalid_request",
            Self::RateLimited => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::Unavailable(_) => "unavailable",
            Self::InvalidResponse(_) => "invalid_response",
            Self::Timeout(_) => "timeout",
        }
    }

    pub fn from_status(status: u16, body: String) -> Self {
        match status {
            401 | 403 => Self::AuthenticationFailed(body),
            400 | 404 => Self::InvalidRequest(body),
            429 => Self::RateLimited,
            500..=599 => Self::ServerError { status, body },
            _ => Self::InvalidRequest(format!("unexpected status {status}: {body}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_from_status_mapping() {
        assert_eq!(TransportError::from_status(401, String::new()), TransportError::Unauthorized);
        assert_eq!(TransportError::from_status(410, String::new()), TransportError::SessionClosed);
        assert!(matches!(
            TransportError::from_status(404, "sess_x".into()),
            TransportError::SessionNotFound(id) if id == "sess_x"
        ));
        assert!(matches!(
            TransportError::from_status(502, "bad gateway".into()),
            TransportError::Http { status: 502, .. }
        ));
    }

    #[test]
    fn transport_retry_classification() {
        assert!(TransportError::SessionClosed.is_retryable());
        assert!(TransportError::Network("reset".into()).is_retryable());
        assert!(!TransportError::Unauthorized.is_retryable());
        assert!(!TransportError::Protocol("bad frame".into()).is_retryable());
    }

    #[test]
    fn transport_error_kinds() {
        assert_eq!(TransportError::Unauthorized.error_kind(), "unauthorized");
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(1)).error_kind(),
            "timeout"
        );
    }

    #[test]
    fn model_from_status_mapping() {
        assert!(matches!(ModelError::from_status(401, "no".into()), ModelError::AuthenticationFailed(_)));
        assert!(matches!(ModelError::from_status(429, String::new()), ModelError::RateLimited));
        assert!(ModelError::from_status(503, "down".into()).is_retryable());
        assert!(!ModelError::from_status(400, "bad".into()).is_retryable());
    }

    #[test]
    fn model_error_kinds() {
        assert_eq!(ModelError::Unavailable("dns".into()).error_kind(), "unavailable");
        assert_eq!(ModelError::InvalidResponse("empty".into()).error_kind(), "invalid_response");
    }
}
