use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::ids::CorrelationId;

/// Classification of a failed tool call, as carried on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    UnknownTool,
    Validation,
    Execution,
    Timeout,
    Transport,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownTool => "unknown_tool",
            Self::Validation => "validation",
            Self::Execution => "execution",
            Self::Timeout => "timeout",
            Self::Transport => "transport",
        }
    }
}

/// Structured error outcome of a tool call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolFailure {
    pub kind: FailureKind,
    pub tool: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

/// One request to run a tool, consumed exactly once by the dispatcher.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationRequest {
    pub correlation_id: CorrelationId,
    pub tool_name: String,
    #[serde(default)]
    pub arguments: Value,
    #[serde(default = "now")]
    pub issued_at: DateTime<Utc>,
}

fn now() -> DateTime<Utc> {
    Utc::now()
}

impl ToolInvocationRequest {
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            tool_name: tool_name.into(),
            arguments,
            issued_at: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ToolOutcome {
    Success { payload: Value },
    Error { error: ToolFailure },
}

/// The single result produced for a [`ToolInvocationRequest`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocationResult {
    pub correlation_id: CorrelationId,
    pub tool_name: String,
    #[serde(flatten)]
    pub outcome: ToolOutcome,
    #[serde(rename = "durationMs", with = "duration_ms")]
    pub duration: Duration,
}

impl ToolInvocationResult {
    pub fn success(
        correlation_id: CorrelationId,
        tool_name: impl Into<String>,
        payload: Value,
        duration: Duration,
    ) -> Self {
        Self {
            correlation_id,
            tool_name: tool_name.into(),
            outcome: ToolOutcome::Success { payload },
            duration,
        }
    }

    pub fn failure(
        correlation_id: CorrelationId,
        tool_name: impl Into<String>,
        error: ToolFailure,
        duration: Duration,
    ) -> Self {
        Self {
            correlation_id,
            tool_name: tool_name.into(),
            outcome: ToolOutcome::Error { error },
            duration,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.outcome, ToolOutcome::Error { .. })
    }

    pub fn error(&self) -> Option<&ToolFailure> {
        match &self.outcome {
            ToolOutcome::Error { error } => Some(error),
            ToolOutcome::Success { .. } => None,
        }
    }

    /// Value shown to the model: the payload itself, or
    /// `{error: true, kind, message}` for a failed call.
    pub fn to_model_value(&self) -> Value {
        match &self.outcome {
            ToolOutcome::Success { payload } => payload.clone(),
            ToolOutcome::Error { error } => json!({
                "error": true,
                "kind": error.kind.as_str(),
                "message": error.message,
            }),
        }
    }
}

/// Serde helper for Duration as milliseconds.
pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(d)?;
        Ok(Duration::from_millis(ms))
    }
}
