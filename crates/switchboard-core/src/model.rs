use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ModelError;
use crate::messages::{AssistantMessage, Message};
use crate::tokens::TokenUsage;

/// A tool as presented to the model.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FunctionDeclaration {
    pub name: String,
    pub description: String,
    /// JSON-schema-shaped parameter object.
    pub parameters: Value,
}

/// Everything the model sees for one round-trip.
#[derive(Clone, Debug, Default)]
pub struct ModelRequest {
    pub system_prompt: Option<String>,
    pub messages: Vec<Message>,
    pub tools: Vec<FunctionDeclaration>,
}

#[derive(Clone, Debug)]
pub struct ModelResponse {
    pub message: AssistantMessage,
    pub usage: TokenUsage,
}

impl ModelResponse {
    pub fn new(message: AssistantMessage) -> Self {
        Self {
            message,
            usage: TokenUsage::default(),
        }
    }
}

/// The model collaborator: an opaque function from a conversation to either
/// text or a set of tool-call requests.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    fn name(&self) -> &str;
    fn model(&self) -> &str;

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError>;
}
