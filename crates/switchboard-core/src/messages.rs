use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::ids::CorrelationId;
use crate::invocation::ToolInvocationResult;
use crate::tokens::TokenUsage;

/// One turn of a conversation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role")]
pub enum Message {
    #[serde(rename = "user")]
    User(UserMessage),
    #[serde(rename = "assistant")]
    Assistant(AssistantMessage),
    /// Results for every tool call of the preceding assistant turn, in the
    /// order the calls were issued.
    #[serde(rename = "tool_results")]
    ToolResults(ToolResultsMessage),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserMessage {
    pub text: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub content: Vec<AssistantContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AssistantContent {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "tool_call")]
    ToolCall(ToolCallBlock),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolCallBlock {
    pub id: CorrelationId,
    pub name: String,
    pub arguments: Value,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultsMessage {
    pub results: Vec<ToolResultBlock>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    pub call_id: CorrelationId,
    pub name: String,
    pub content: Value,
    #[serde(default)]
    pub is_error: bool,
}

// --- Convenience constructors ---

impl Message {
    pub fn user_text(text: impl Into<String>) -> Self {
        Message::User(UserMessage { text: text.into() })
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Message::Assistant(AssistantMessage::text(text))
    }

    pub fn tool_results(results: Vec<ToolResultBlock>) -> Self {
        Message::ToolResults(ToolResultsMessage { results })
    }
}

impl AssistantMessage {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![AssistantContent::Text { text: text.into() }],
            usage: None,
        }
    }

    pub fn with_tool_calls(calls: Vec<ToolCallBlock>) -> Self {
        Self {
            content: calls.into_iter().map(AssistantContent::ToolCall).collect(),
            usage: None,
        }
    }

    pub fn tool_calls(&self) -> Vec<&ToolCallBlock> {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::ToolCall(tc) => Some(tc),
                _ => None,
            })
            .collect()
    }

    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                AssistantContent::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    pub fn has_tool_calls(&self) -> bool {
        self.content
            .iter()
            .any(|c| matches!(c, AssistantContent::ToolCall(_)))
    }
}

impl ToolCallBlock {
    pub fn new(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: CorrelationId::new(),
            name: name.into(),
            arguments,
        }
    }
}

impl ToolResultBlock {
    /// Pair a model-issued call with the result the gateway produced for it.
    pub fn from_result(call: &ToolCallBlock, result: &ToolInvocationResult) -> Self {
        Self {
            call_id: call.id.clone(),
            name: call.name.clone(),
            content: result.to_model_value(),
            is_error: result.is_error(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn user_text_message() {
        let json = serde_json::to_value(Message::user_text("hello")).unwrap();
        assert_eq!(json["role"], "user");
        assert_eq!(json["text"], "hello");
    }

    #[test]
    fn assistant_tool_calls_extracted() {
        let msg = AssistantMessage {
            content: vec![
                AssistantContent::Text {
                    text: "Let me check.".into(),
                },
                AssistantContent::ToolCall(ToolCallBlock::new("lookup", json!({ "email": "a@b.c" }))),
            ],
            usage: None,
        };
        assert!(msg.has_tool_calls());
        assert_eq!(msg.tool_calls().len(), 1);
        assert_eq!(msg.tool_calls()[0].name, "lookup");
        assert_eq!(msg.text_content(), "Let me check.");
    }

    #[test]
    fn text_only_message_has_no_tool_calls() {
        assert!(!AssistantMessage::text("done").has_tool_calls());
    }

    #[test]
    fn result_block_carries_error_flag() {
        let call = ToolCallBlock::new("lookup", json!({}));
        let result = ToolInvocationResult::failure(
            call.id.clone(),
            "lookup",
            crate::tools::ToolError::UnknownTool("lookup".into()).to_failure(),
            Duration::ZERO,
        );
        let block = ToolResultBlock::from_result(&call, &result);
        assert!(block.is_error);
        assert_eq!(block.call_id, call.id);
        assert_eq!(block.content["error"], true);
    }

    #[test]
    fn tool_results_role_tag() {
        let json = serde_json::to_value(Message::tool_results(vec![])).unwrap();
        assert_eq!(json["role"], "tool_results");
    }
}
