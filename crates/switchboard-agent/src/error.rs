/// Errors constructing an orchestration runner. A run itself never fails;
/// every failure path produces a [`crate::RunOutcome`].
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("invalid runner configuration: {0}")]
    InvalidConfig(String),
}
