use async_trait::async_trait;
use serde_json::Value;

use crate::errors::TransportError;
use crate::invocation::ToolInvocationResult;
use crate::schema::ToolDescriptor;

/// The orchestrator's view of the tool host.
#[async_trait]
pub trait ToolGateway: Send + Sync {
    /// Currently available tools, in registration order.
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError>;

    /// Run one tool. Never fails: transport problems come back as an error
    /// outcome so the caller always has a well-formed result.
    async fn call_tool(&self, name: &str, arguments: Value) -> ToolInvocationResult;
}
