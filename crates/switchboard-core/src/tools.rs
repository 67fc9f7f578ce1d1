use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::ids::{CorrelationId, SessionId};
use crate::invocation::{FailureKind, ToolFailure};

/// Validated, coerced arguments handed to a handler.
pub type ToolArgs = Map<String, Value>;

/// Per-invocation context. A fresh one is built for every call and nothing
/// in it outlives the call.
#[derive(Clone, Debug)]
pub struct ToolContext {
    pub correlation_id: CorrelationId,
    pub session_id: Option<SessionId>,
    pub cancel: CancellationToken,
    pub started_at: Instant,
}

impl ToolContext {
    pub fn new(correlation_id: CorrelationId, session_id: Option<SessionId>) -> Self {
        Self {
            correlation_id,
            session_id,
            cancel: CancellationToken::new(),
            started_at: Instant::now(),
        }
    }
}

/// Errors a handler may return. The dispatcher turns every one of them into
/// a structured execution error.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("backend failure: {0}")]
    Backend(String),
}

/// Implemented by each tool. Handlers must be stateless across invocations:
/// anything they read is either in `args` or behind a read-only reference.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(&self, args: ToolArgs, ctx: ToolContext) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ToolHandler for FnHandler<F>
where
    F: Fn(ToolArgs, ToolContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn call(&self, args: ToolArgs, ctx: ToolContext) -> Result<Value, HandlerError> {
        (self.0)(args, ctx).await
    }
}

/// Wrap an async closure as a handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ToolHandler>
where
    F: Fn(ToolArgs, ToolContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Why a single tool call failed. Never escapes a session or a run; it is
/// always folded into a [`ToolFailure`] result.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid argument '{field}' for {tool}: {message}")]
    Validation {
        tool: String,
        field: String,
        message: String,
    },
    #[error("{tool} failed: {message}")]
    Execution { tool: String, message: String },
    #[error("{tool} timed out after {after:?}")]
    Timeout { tool: String, after: Duration },
    #[error("{tool} could not be delivered: {message}")]
    Transport { tool: String, message: String },
}

impl ToolError {
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::UnknownTool(_) => FailureKind::UnknownTool,
            Self::Validation { .. } => FailureKind::Validation,
            Self::Execution { .. } => FailureKind::Execution,
            Self::Timeout { .. } => FailureKind::Timeout,
            Self::Transport { .. } => FailureKind::Transport,
        }
    }

    pub fn tool(&self) -> &str {
        match self {
            Self::UnknownTool(tool) => tool,
            Self::Validation { tool, .. }
            | Self::Execution { tool, .. }
            | Self::Timeout { tool, .. }
            | Self::Transport { tool, .. } => tool,
        }
    }

    pub fn to_failure(&self) -> ToolFailure {
        let field = match self {
            Self::Validation { field, .. } => Some(field.clone()),
            _ => None,
        };
        ToolFailure {
            kind: self.kind(),
            tool: self.tool().to_string(),
            message: self.to_string(),
            field,
        }
    }
}
