use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, instrument};

use switchboard_core::errors::ModelError;
use switchboard_core::messages::{AssistantContent, AssistantMessage, Message, ToolCallBlock};
use switchboard_core::model::{FunctionDeclaration, ModelProvider, ModelRequest, ModelResponse};
use switchboard_core::tokens::TokenUsage;

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);

/// Schema keywords `functionDeclarations` rejects.
const UNSUPPORTED_SCHEMA_KEYS: &[&str] = &["default", "pattern"];

/// Google Gemini `generateContent` provider.
pub struct GeminiProvider {
    client: Client,
    api_key: SecretString,
    model: String,
    base_url: String,
    timeout: Duration,
}

impl GeminiProvider {
    pub fn new(api_key: SecretString, model: impl Into<String>) -> Result<Self, ModelError> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ModelError::InvalidRequest(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key,
            model: model.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout: REQUEST_TIMEOUT,
        })
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url, self.model
        )
    }
}

#[async_trait]
impl ModelProvider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn model(&self) -> &str {
        &self.model
    }

    #[instrument(skip_all, fields(model = %self.model, messages = request.messages.len()))]
    async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse, ModelError> {
        let body = build_request_body(request);

        let resp = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", self.api_key.expose_secret())
            .header("content-type", "application/json")
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ModelError::Timeout(self.timeout)
                } else {
                    ModelError::Unavailable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(ModelError::from_status(status, body));
        }

        let parsed: GenerateContentResponse = resp
            .json()
            .await
            .map_err(|e| ModelError::InvalidResponse(e.to_string()))?;
        let response = parse_response(parsed)?;
        debug!(
            tool_calls = response.message.tool_calls().len(),
            input_tokens = response.usage.input_tokens,
            output_tokens = response.usage.output_tokens,
            "model responded"
        );
        Ok(response)
    }
}

/// Convert a model request into the `generateContent` body.
pub fn build_request_body(request: &ModelRequest) -> Value {
    let mut body = json!({ "contents": convert_messages(&request.messages) });

    if let Some(prompt) = request.system_prompt.as_deref().filter(|p| !p.is_empty()) {
        body["systemInstruction"] = json!({ "parts": [{ "text": prompt }] });
    }

    if !request.tools.is_empty() {
        let declarations: Vec<Value> = request.tools.iter().map(convert_declaration).collect();
        body["tools"] = json!([{ "functionDeclarations": declarations }]);
    }

    body
}

fn convert_declaration(decl: &FunctionDeclaration) -> Value {
    json!({
        "name": decl.name,
        "description": decl.description,
        "parameters": sanitize_schema(&decl.parameters),
    })
}

/// Drop keywords Gemini does not accept, recursively.
fn sanitize_schema(schema: &Value) -> Value {
    match schema {
        Value::Object(map) => {
            let cleaned: Map<String, Value> = map
                .iter()
                .filter(|(k, _)| !UNSUPPORTED_SCHEMA_KEYS.contains(&k.as_str()))
                .map(|(k, v)| {
                    // property names under "properties" are user-chosen, not keywords
                    if k == "properties" {
                        (k.clone(), sanitize_properties(v))
                    } else {
                        (k.clone(), sanitize_schema(v))
                    }
                })
                .collect();
            Value::Object(cleaned)
        }
        Value::Array(items) => Value::Array(items.iter().map(sanitize_schema).collect()),
        other => other.clone(),
    }
}

fn sanitize_properties(properties: &Value) -> Value {
    match properties {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), sanitize_schema(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

fn convert_messages(messages: &[Message]) -> Vec<Value> {
    messages
        .iter()
        .filter_map(|message| match message {
            Message::User(user) => Some(json!({
                "role": "user",
                "parts": [{ "text": user.text }],
            })),
            Message::Assistant(assistant) => {
                let parts: Vec<Value> = assistant
                    .content
                    .iter()
                    .filter_map(|content| match content {
                        AssistantContent::Text { text } if text.is_empty() => None,
                        AssistantContent::Text { text } => Some(json!({ "text": text })),
                        AssistantContent::ToolCall(call) => Some(json!({
                            "functionCall": { "name": call.name, "args": call.arguments },
                        })),
                    })
                    .collect();
                if parts.is_empty() {
                    None
                } else {
                    Some(json!({ "role": "model", "parts": parts }))
                }
            }
            Message::ToolResults(results) => {
                let parts: Vec<Value> = results
                    .results
                    .iter()
                    .map(|result| {
                        json!({
                            "functionResponse": {
                                "name": result.name,
                                "response": response_object(&result.content),
                            }
                        })
                    })
                    .collect();
                Some(json!({ "role": "user", "parts": parts }))
            }
        })
        .collect()
}

/// `functionResponse.response` must be an object.
fn response_object(content: &Value) -> Value {
    if content.is_object() {
        content.clone()
    } else {
        json!({ "result": content })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Part {
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    function_call: Option<FunctionCall>,
}

#[derive(Debug, Deserialize)]
struct FunctionCall {
    name: String,
    #[serde(default)]
    args: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
}

fn parse_response(resp: GenerateContentResponse) -> Result<ModelResponse, ModelError> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ModelError::InvalidResponse("response has no candidates".into()))?;

    let parts = match candidate.content {
        Some(content) => content.parts,
        None => {
            let reason = candidate.finish_reason.unwrap_or_else(|| "unknown".into());
            return Err(ModelError::InvalidResponse(format!(
                "candidate has no content (finish reason: {reason})"
            )));
        }
    };

    let mut content = Vec::with_capacity(parts.len());
    for part in parts {
        if let Some(call) = part.function_call {
            let args = if call.args.is_null() { json!({}) } else { call.args };
            content.push(AssistantContent::ToolCall(ToolCallBlock::new(call.name, args)));
        } else if let Some(text) = part.text {
            content.push(AssistantContent::Text { text });
        }
    }

    let usage = resp
        .usage_metadata
        .map(|u| TokenUsage {
            input_tokens: u.prompt_token_count,
            output_tokens: u.candidates_token_count,
        })
        .unwrap_or_default();

    Ok(ModelResponse {
        message: AssistantMessage {
            content,
            usage: Some(usage.clone()),
        },
        usage,
    })
}
