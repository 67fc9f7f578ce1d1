pub mod declarations;
pub mod error;
pub mod gemini;
pub mod mock;
pub mod runner;

pub use error::AgentError;
pub use gemini::GeminiProvider;
pub use mock::{ScriptedModel, ScriptedReply};
pub use runner::{AgentRunner, LoopState, RunOutcome, RunStatus, RunnerConfig, ToolCallRecord};
