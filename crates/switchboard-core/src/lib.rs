pub mod errors;
pub mod gateway;
pub mod ids;
pub mod invocation;
pub mod messages;
pub mod model;
pub mod schema;
pub mod tokens;
pub mod tools;
pub mod wire;

pub use errors::{ModelError, TransportError};
pub use gateway::ToolGateway;
pub use ids::{CorrelationId, RunId, SessionId};
pub use invocation::{FailureKind, ToolFailure, ToolInvocationRequest, ToolInvocationResult, ToolOutcome};
pub use schema::{ParamSpec, ParamType, ToolDescriptor};
pub use tools::{HandlerError, ToolArgs, ToolContext, ToolError, ToolHandler};
