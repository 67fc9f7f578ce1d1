use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::errors::ModelError;
use switchboard_core::messages::{AssistantMessage, ToolCallBlock};
use switchboard_core::model::{ModelProvider, ModelRequest, ModelResponse};
use switchboard_core::tokens::TokenUsage;

/// One pre-programmed model turn.
#[derive(Clone, Debug)]
pub enum ScriptedReply {
    Respond(ModelResponse),
    Fail(ModelError),
    /// Wait, then yield the inner reply.
    Delay(Duration, Box<ScriptedReply>),
}

impl ScriptedReply {
    pub fn text(text: &str) -> Self {
        Self::Respond(ModelResponse::new(AssistantMessage::text(text)))
    }

    /// A turn requesting the given `(tool name, arguments)` calls, in order.
    pub fn tool_calls(calls: Vec<(&str, Value)>) -> Self {
        let blocks = calls
            .into_iter()
            .map(|(name, args)| ToolCallBlock::new(name, args))
            .collect();
        Self::Respond(ModelResponse::new(AssistantMessage::with_tool_calls(blocks)))
    }

    pub fn fail(error: ModelError) -> Self {
        Self::Fail(error)
    }

    pub fn delayed(delay: Duration, inner: ScriptedReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }

    pub fn with_usage(self, input_tokens: u32, output_tokens: u32) -> Self {
        match self {
            Self::Respond(mut response) => {
                response.usage = TokenUsage {
                    input_tokens,
                    output_tokens,
                };
                Self::Respond(response)
            }
            other => other,
        }
    }
}

/// Deterministic model that replays queued replies and records every
/// request it receives. Once the queue is empty it repeats the `always`
/// reply if one was set, otherwise it reports itself unavailable.
pub struct ScriptedModel {
    replies: Mutex<VecDeque<ScriptedReply>>,
    always: Option<ScriptedReply>,
    requests: Mutex<Vec<ModelRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<ScriptedReply>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            always: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn always(reply: ScriptedReply) -> Self {
        Self {
            always: Some(reply),
            ..Self::new(Vec::new())
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    fn model(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        self.requests.lock().push(request.clone());
        let next = self.replies.lock().pop_front().or_else(|| self.always.clone());
        let mut reply =
            next.ok_or_else(|| ModelError::Unavailable("scripted model has no more replies".into()))?;
        loop {
            match reply {
                ScriptedReply::Respond(response) => return Ok(response),
                ScriptedReply::Fail(error) => return Err(error),
                ScriptedReply::Delay(delay, inner) => {
                    tokio::time::sleep(delay).await;
                    reply = *inner;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn replays_in_order_then_runs_dry() {
        let model = ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("lookup", json!({ "id": 1 }))]),
            ScriptedReply::text("done"),
        ]);
        let request = ModelRequest::default();

        let first = model.generate(&request).await.unwrap();
        assert_eq!(first.message.tool_calls()[0].name, "lookup");
        let second = model.generate(&request).await.unwrap();
        assert_eq!(second.message.text_content(), "done");
        assert!(matches!(
            model.generate(&request).await,
            Err(ModelError::Unavailable(_))
        ));
        assert_eq!(model.call_count(), 3);
    }

    #[tokio::test]
    async fn always_repeats() {
        let model = ScriptedModel::always(ScriptedReply::text("again"));
        for _ in 0..3 {
            let response = model.generate(&ModelRequest::default()).await.unwrap();
            assert_eq!(response.message.text_content(), "again");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_reply() {
        let model = ScriptedModel::new(vec![ScriptedReply::delayed(
            Duration::from_secs(5),
            ScriptedReply::text("late"),
        )]);
        let started = tokio::time::Instant::now();
        let response = model.generate(&ModelRequest::default()).await.unwrap();
        assert_eq!(response.message.text_content(), "late");
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
