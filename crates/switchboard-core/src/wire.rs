//! Framing shared by the tool host and the client.
//!
//! Outbound units travel as server-sent events: `id`, `event` and a JSON
//! `data` line, terminated by a blank line. Inbound units are JSON bodies
//! posted to the message endpoint of an open session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::errors::TransportError;
use crate::ids::{CorrelationId, SessionId};
use crate::invocation::{ToolFailure, ToolInvocationRequest, ToolInvocationResult};

/// Header carrying the shared-secret credential.
pub const AUTH_HEADER: &str = "x-switchboard-key";
pub const SSE_PATH: &str = "/sse";
pub const MESSAGES_PATH: &str = "/messages";
pub const SESSION_QUERY: &str = "session_id";

/// Whether `id` can be sent as an SSE `id` field.
pub fn is_valid_frame_id(id: &str) -> bool {
    !id.is_empty() && !id.contains(['\n', '\r', '\0'])
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Connected,
    ToolResult,
    ToolError,
    ResourceResult,
    ProtocolError,
    Timeout,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::ToolResult => "tool_result",
            Self::ToolError => "tool_error",
            Self::ResourceResult => "resource_result",
            Self::ProtocolError => "protocol_error",
            Self::Timeout => "timeout",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "connected" => Some(Self::Connected),
            "tool_result" => Some(Self::ToolResult),
            "tool_error" => Some(Self::ToolError),
            "resource_result" => Some(Self::ResourceResult),
            "protocol_error" => Some(Self::ProtocolError),
            "timeout" => Some(Self::Timeout),
            _ => None,
        }
    }
}

/// One outbound unit on a session stream.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub id: Option<String>,
    pub event: EventKind,
    pub data: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub session_id: SessionId,
    pub messages_path: String,
    pub server: String,
    pub version: String,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolResultData {
    correlation_id: CorrelationId,
    tool_name: String,
    result: Value,
    duration_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ToolErrorData {
    correlation_id: CorrelationId,
    tool_name: String,
    error: ToolFailure,
    duration_ms: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolErrorData {
    message: String,
}

impl Frame {
    pub fn new(event: EventKind, data: Value) -> Self {
        Self {
            id: None,
            event,
            data,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn connected(payload: &ConnectedPayload) -> Self {
        let data = serde_json::to_value(payload).unwrap_or(Value::Null);
        Self::new(EventKind::Connected, data).with_id(payload.session_id.as_str())
    }

    /// `tool_result` or `tool_error`, keyed by the request's correlation id.
    pub fn from_result(result: &ToolInvocationResult) -> Self {
        let duration_ms = result.duration.as_millis() as u64;
        let (event, data) = match result.error() {
            None => (
                EventKind::ToolResult,
                serde_json::to_value(ToolResultData {
                    correlation_id: result.correlation_id.clone(),
                    tool_name: result.tool_name.clone(),
                    result: result.to_model_value(),
                    duration_ms,
                }),
            ),
            Some(error) => (
                EventKind::ToolError,
                serde_json::to_value(ToolErrorData {
                    correlation_id: result.correlation_id.clone(),
                    tool_name: result.tool_name.clone(),
                    error: error.clone(),
                    duration_ms,
                }),
            ),
        };
        Self::new(event, data.unwrap_or(Value::Null)).with_id(result.correlation_id.as_str())
    }

    pub fn resource(correlation_id: &CorrelationId, resource: &str, data: Value) -> Self {
        Self::new(
            EventKind::ResourceResult,
            json!({
                "correlationId": correlation_id,
                "resource": resource,
                "data": data,
            }),
        )
        .with_id(correlation_id.as_str())
    }

    pub fn protocol_error(correlation_id: Option<&CorrelationId>, message: impl Into<String>) -> Self {
        let message = message.into();
        match correlation_id {
            Some(id) => Self::new(
                EventKind::ProtocolError,
                json!({ "correlationId": id, "message": message }),
            )
            .with_id(id.as_str()),
            None => Self::new(EventKind::ProtocolError, json!({ "message": message })),
        }
    }

    pub fn timeout(session_id: &SessionId, idle: Duration) -> Self {
        Self::new(
            EventKind::Timeout,
            json!({ "sessionId": session_id, "idleSecs": idle.as_secs() }),
        )
    }

    /// Rebuild a frame from its decoded SSE fields.
    pub fn from_parts(id: Option<String>, event: &str, data: &str) -> Result<Self, TransportError> {
        let event = EventKind::parse(event)
            .ok_or_else(|| TransportError::Protocol(format!("unknown event type: {event}")))?;
        let data = if data.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(data)
                .map_err(|e| TransportError::Protocol(format!("invalid {} payload: {e}", event.as_str())))?
        };
        Ok(Self { id, event, data })
    }

    pub fn correlation_id(&self) -> Option<CorrelationId> {
        self.data
            .get("correlationId")
            .and_then(Value::as_str)
            .map(CorrelationId::from_raw)
    }

    /// SSE text encoding, including the terminating blank line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        out.push_str("event: ");
        out.push_str(self.event.as_str());
        out.push('\n');
        out.push_str("data: ");
        out.push_str(&self.data.to_string());
        out.push_str("\n\n");
        out
    }

    /// Interpret a reply frame as the result of a tool call.
    pub fn into_tool_result(self) -> Result<ToolInvocationResult, TransportError> {
        match self.event {
            EventKind::ToolResult => {
                let data: ToolResultData = serde_json::from_value(self.data)
                    .map_err(|e| TransportError::Protocol(format!("invalid tool_result: {e}")))?;
                Ok(ToolInvocationResult::success(
                    data.correlation_id,
                    data.tool_name,
                    data.result,
                    Duration::from_millis(data.duration_ms),
                ))
            }
            EventKind::ToolError => {
                let data: ToolErrorData = serde_json::from_value(self.data)
                    .map_err(|e| TransportError::Protocol(format!("invalid tool_error: {e}")))?;
                Ok(ToolInvocationResult::failure(
                    data.correlation_id,
                    data.tool_name,
                    data.error,
                    Duration::from_millis(data.duration_ms),
                ))
            }
            EventKind::ProtocolError => Err(TransportError::Protocol(protocol_message(self.data))),
            other => Err(TransportError::Protocol(format!(
                "expected a tool result, got {}",
                other.as_str()
            ))),
        }
    }

    /// Interpret a reply frame as the answer to a resource query.
    pub fn into_resource_data(self) -> Result<Value, TransportError> {
        match self.event {
            EventKind::ResourceResult => Ok(self.data.get("data").cloned().unwrap_or(Value::Null)),
            EventKind::ProtocolError => Err(TransportError::Protocol(protocol_message(self.data))),
            other => Err(TransportError::Protocol(format!(
                "expected a resource result, got {}",
                other.as_str()
            ))),
        }
    }
}

fn protocol_message(data: Value) -> String {
    serde_json::from_value::<ProtocolErrorData>(data)
        .map(|d| d.message)
        .unwrap_or_else(|_| "unspecified protocol error".to_string())
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceQuery {
    pub correlation_id: CorrelationId,
    /// `tools`, `tools/<name>` or `session`.
    pub resource: String,
}

impl ResourceQuery {
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            correlation_id: CorrelationId::new(),
            resource: resource.into(),
        }
    }
}

/// Body accepted by the message endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InboundMessage {
    ToolCall(ToolInvocationRequest),
    ResourceQuery(ResourceQuery),
}

impl InboundMessage {
    pub fn correlation_id(&self) -> &CorrelationId {
        match self {
            Self::ToolCall(req) => &req.correlation_id,
            Self::ResourceQuery(q) => &q.correlation_id,
        }
    }
}
