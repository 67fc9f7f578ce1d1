use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;
use switchboard_core::gateway::ToolGateway;
use switchboard_core::ids::RunId;
use switchboard_core::invocation::{FailureKind, ToolFailure, ToolInvocationResult};
use switchboard_core::messages::{Message, ToolCallBlock, ToolResultBlock};
use switchboard_core::model::{FunctionDeclaration, ModelProvider, ModelRequest};
use switchboard_core::tokens::AccumulatedTokens;
use tracing::{debug, error, info, instrument, warn};

use crate::declarations::declarations;
use crate::error::AgentError;

pub const DEFAULT_MAX_ITERATIONS: u32 = 5;

/// Configuration for the agent runner.
#[derive(Clone, Debug)]
pub struct RunnerConfig {
    /// Ceiling on model round-trips per run. Must be at least 1.
    pub max_iterations: u32,
    pub system_prompt: Option<String>,
    /// Final message when the ceiling is hit before an answer.
    pub limit_message: String,
    /// Final message when the model cannot be reached.
    pub unavailable_message: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_iterations: DEFAULT_MAX_ITERATIONS,
            system_prompt: None,
            limit_message: "I wasn't able to finish within the allowed number of steps. \
                            Here is what I gathered so far."
                .to_string(),
            unavailable_message: "The assistant is temporarily unavailable. Please try again shortly."
                .to_string(),
        }
    }
}

impl RunnerConfig {
    pub fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }
}

/// Where a run is in its lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    AwaitingModel,
    ExecutingTools,
    Responding,
    Done,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    LimitExceeded,
    ModelUnavailable,
}

/// One executed tool call, as reported to the caller.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallRecord {
    pub name: String,
    pub input: Value,
    /// The payload, or `{error: true, kind, message}`.
    pub result: Value,
    pub duration_ms: u64,
    pub is_error: bool,
}

impl ToolCallRecord {
    fn new(call: &ToolCallBlock, result: &ToolInvocationResult) -> Self {
        Self {
            name: call.name.clone(),
            input: call.arguments.clone(),
            result: result.to_model_value(),
            duration_ms: result.duration.as_millis() as u64,
            is_error: result.is_error(),
        }
    }
}

/// What every run returns, on every path.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunOutcome {
    pub run_id: RunId,
    pub message: String,
    pub tool_calls: Vec<ToolCallRecord>,
    pub iterations: u32,
    pub status: RunStatus,
    pub usage: AccumulatedTokens,
}

/// Per-run conversation state. Never shared between runs.
#[derive(Debug, Default)]
pub struct ConversationState {
    pub messages: Vec<Message>,
    pub iterations: u32,
    pub tokens: AccumulatedTokens,
    pub tool_calls: Vec<ToolCallRecord>,
}

impl ConversationState {
    pub fn new(history: Vec<Message>) -> Self {
        Self {
            messages: history,
            ..Self::default()
        }
    }

    fn finish(self, run_id: RunId, status: RunStatus, message: String) -> RunOutcome {
        RunOutcome {
            run_id,
            message,
            tool_calls: self.tool_calls,
            iterations: self.iterations,
            status,
            usage: self.tokens,
        }
    }
}

/// Drives the bounded model ⇄ tools loop.
pub struct AgentRunner {
    model: Arc<dyn ModelProvider>,
    gateway: Arc<dyn ToolGateway>,
    config: RunnerConfig,
}

impl AgentRunner {
    pub fn new(
        model: Arc<dyn ModelProvider>,
        gateway: Arc<dyn ToolGateway>,
        config: RunnerConfig,
    ) -> Result<Self, AgentError> {
        if config.max_iterations == 0 {
            return Err(AgentError::InvalidConfig(
                "max_iterations must be at least 1".into(),
            ));
        }
        Ok(Self {
            model,
            gateway,
            config,
        })
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Run one user prompt to completion.
    pub async fn run(&self, prompt: &str) -> RunOutcome {
        self.run_conversation(vec![Message::user_text(prompt)]).await
    }

    /// Continue from an existing history. Never fails; see [`RunStatus`].
    #[instrument(skip_all, fields(run_id, model = self.model.model()))]
    pub async fn run_conversation(&self, history: Vec<Message>) -> RunOutcome {
        let run_id = RunId::new();
        tracing::Span::current().record("run_id", tracing::field::display(&run_id));

        let tools = self.discover_tools().await;
        let mut state = ConversationState::new(history);
        debug!(phase = ?LoopState::Idle, tools = tools.len(), "run started");

        loop {
            state.iterations += 1;
            debug!(phase = ?LoopState::AwaitingModel, iteration = state.iterations, "awaiting model");
            let request = ModelRequest {
                system_prompt: self.config.system_prompt.clone(),
                messages: state.messages.clone(),
                tools: tools.clone(),
            };

            let response = match self.model.generate(&request).await {
                Ok(response) => response,
                Err(e) => {
                    error!(
                        iteration = state.iterations,
                        error = %e,
                        kind = e.error_kind(),
                        "model unavailable; ending run"
                    );
                    let message = self.config.unavailable_message.clone();
                    return state.finish(run_id, RunStatus::ModelUnavailable, message);
                }
            };
            state.tokens.accumulate(&response.usage);

            let calls: Vec<ToolCallBlock> = response.message.tool_calls().into_iter().cloned().collect();
            let text = response.message.text_content();
            state.messages.push(Message::Assistant(response.message));

            if calls.is_empty() {
                debug!(phase = ?LoopState::Responding, iteration = state.iterations, "final answer");
                let outcome = state.finish(run_id, RunStatus::Completed, text);
                info!(
                    phase = ?LoopState::Done,
                    iterations = outcome.iterations,
                    tool_calls = outcome.tool_calls.len(),
                    "run completed"
                );
                return outcome;
            }

            if state.iterations >= self.config.max_iterations {
                warn!(
                    max_iterations = self.config.max_iterations,
                    unexecuted_calls = calls.len(),
                    "iteration ceiling reached"
                );
                let message = self.config.limit_message.clone();
                return state.finish(run_id, RunStatus::LimitExceeded, message);
            }

            debug!(
                phase = ?LoopState::ExecutingTools,
                iteration = state.iterations,
                calls = calls.len(),
                "executing tools"
            );
            let results = self.execute_tools(&calls).await;

            let mut blocks = Vec::with_capacity(calls.len());
            for (call, result) in calls.iter().zip(&results) {
                state.tool_calls.push(ToolCallRecord::new(call, result));
                blocks.push(ToolResultBlock::from_result(call, result));
            }
            state.messages.push(Message::tool_results(blocks));
        }
    }

    async fn discover_tools(&self) -> Vec<FunctionDeclaration> {
        match self.gateway.list_tools().await {
            Ok(tools) => declarations(&tools),
            Err(e) => {
                warn!(error = %e, "tool discovery failed; continuing without tools");
                Vec::new()
            }
        }
    }

    /// Run every call of one turn concurrently. Results come back in call
    /// order regardless of completion order.
    async fn execute_tools(&self, calls: &[ToolCallBlock]) -> Vec<ToolInvocationResult> {
        let handles: Vec<_> = calls
            .iter()
            .map(|call| {
                let gateway = Arc::clone(&self.gateway);
                let name = call.name.clone();
                let arguments = call.arguments.clone();
                tokio::spawn(async move {
                    AssertUnwindSafe(gateway.call_tool(&name, arguments))
                        .catch_unwind()
                        .await
                })
            })
            .collect();

        let mut results = Vec::with_capacity(calls.len());
        for (call, handle) in calls.iter().zip(handles) {
            let result = match handle.await {
                Ok(Ok(result)) => result,
                Ok(Err(panic)) => {
                    let message = panic_message(&*panic);
                    error!(tool = %call.name, panic = %message, "tool call panicked");
                    failed_call(call, format!("tool call panicked: {message}"))
                }
                Err(join_err) => {
                    error!(tool = %call.name, error = %join_err, "tool call task failed");
                    failed_call(call, format!("tool call task failed: {join_err}"))
                }
            };
            results.push(result);
        }
        results
    }
}

fn failed_call(call: &ToolCallBlock, message: String) -> ToolInvocationResult {
    ToolInvocationResult::failure(
        call.id.clone(),
        call.name.clone(),
        ToolFailure {
            kind: FailureKind::Execution,
            tool: call.name.clone(),
            message,
            field: None,
        },
        Duration::ZERO,
    )
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{ScriptedModel, ScriptedReply};
    use async_trait::async_trait;
    use serde_json::json;
    use switchboard_core::errors::{ModelError, TransportError};
    use switchboard_core::ids::CorrelationId;
    use switchboard_core::messages::AssistantMessage;
    use switchboard_core::schema::{ParamSpec, ToolDescriptor};

    /// In-process gateway with fixed per-tool delays and behaviours.
    struct FakeGateway {
        discovery_fails: bool,
    }

    impl FakeGateway {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                discovery_fails: false,
            })
        }
    }

    #[async_trait]
    impl ToolGateway for FakeGateway {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
            if self.discovery_fails {
                return Err(TransportError::Network("connection refused".into()));
            }
            Ok(vec![
                ToolDescriptor::new("lookup", "Look something up")
                    .param(ParamSpec::string("key").required()),
                ToolDescriptor::new("slow", "Takes a while"),
                ToolDescriptor::new("fast", "Returns at once"),
            ])
        }

        async fn call_tool(&self, name: &str, arguments: Value) -> ToolInvocationResult {
            let id = CorrelationId::new();
            match name {
                "slow" => {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    ToolInvocationResult::success(id, name, json!({ "who": "slow" }), Duration::from_millis(200))
                }
                "fast" => ToolInvocationResult::success(id, name, json!({ "who": "fast" }), Duration::ZERO),
                "explode" => panic!("handler blew up"),
                "broken" => ToolInvocationResult::failure(
                    id,
                    name,
                    ToolFailure {
                        kind: FailureKind::Execution,
                        tool: name.into(),
                        message: "broken failed: backend failure: db down".into(),
                        field: None,
                    },
                    Duration::ZERO,
                ),
                _ => ToolInvocationResult::success(id, name, json!({ "args": arguments }), Duration::ZERO),
            }
        }
    }

    fn runner(model: Arc<ScriptedModel>, gateway: Arc<dyn ToolGateway>, max: u32) -> AgentRunner {
        AgentRunner::new(model, gateway, RunnerConfig::default().with_max_iterations(max)).unwrap()
    }

    #[test]
    fn zero_iterations_is_a_config_error() {
        let model = Arc::new(ScriptedModel::new(vec![]));
        let result = AgentRunner::new(model, FakeGateway::new(), RunnerConfig::default().with_max_iterations(0));
        assert!(matches!(result, Err(AgentError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn direct_answer_takes_one_iteration() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::text("Hello!")]));
        let outcome = runner(model.clone(), FakeGateway::new(), 5).run("hi").await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.message, "Hello!");
        assert_eq!(outcome.iterations, 1);
        assert!(outcome.tool_calls.is_empty());

        let request = &model.requests()[0];
        let names: Vec<_> = request.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["lookup", "slow", "fast"]);
    }

    #[tokio::test]
    async fn tool_turn_then_answer() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("lookup", json!({ "key": "k1" }))]).with_usage(10, 5),
            ScriptedReply::text("Found it.").with_usage(20, 7),
        ]));
        let outcome = runner(model.clone(), FakeGateway::new(), 5).run("find k1").await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.message, "Found it.");
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.tool_calls[0].name, "lookup");
        assert_eq!(outcome.tool_calls[0].input, json!({ "key": "k1" }));
        assert_eq!(outcome.usage.total_input_tokens, 30);
        assert_eq!(outcome.usage.total_output_tokens, 12);

        // second request carries the assistant turn and its results
        let second = &model.requests()[1];
        assert_eq!(second.messages.len(), 3);
        assert!(matches!(second.messages[1], Message::Assistant(_)));
        match &second.messages[2] {
            Message::ToolResults(m) => {
                assert_eq!(m.results.len(), 1);
                assert_eq!(m.results[0].content, json!({ "args": { "key": "k1" } }));
            }
            other => panic!("expected tool results, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn limit_exceeded_after_max_iterations() {
        let model = Arc::new(ScriptedModel::always(ScriptedReply::tool_calls(vec![(
            "lookup",
            json!({ "key": "again" }),
        )])));
        let outcome = runner(model.clone(), FakeGateway::new(), 3).run("loop forever").await;

        assert_eq!(outcome.status, RunStatus::LimitExceeded);
        assert_eq!(outcome.iterations, 3);
        assert_eq!(model.call_count(), 3);
        assert_eq!(outcome.tool_calls.len(), 2);
        assert_eq!(outcome.message, RunnerConfig::default().limit_message);
    }

    #[tokio::test]
    async fn results_keep_request_order() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("slow", json!({})), ("fast", json!({}))]),
            ScriptedReply::text("ok"),
        ]));
        let outcome = runner(model.clone(), FakeGateway::new(), 5).run("both").await;

        let names: Vec<_> = outcome.tool_calls.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["slow", "fast"]);

        let Message::ToolResults(fed_back) = &model.requests()[1].messages[2] else {
            panic!("expected tool results");
        };
        let who: Vec<_> = fed_back.results.iter().map(|r| r.content["who"].clone()).collect();
        assert_eq!(who, vec![json!("slow"), json!("fast")]);
    }

    #[tokio::test(start_paused = true)]
    async fn calls_run_concurrently() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("slow", json!({})), ("slow", json!({})), ("slow", json!({}))]),
            ScriptedReply::text("ok"),
        ]));
        let started = tokio::time::Instant::now();
        let outcome = runner(model, FakeGateway::new(), 5).run("three").await;
        assert_eq!(outcome.tool_calls.len(), 3);
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test]
    async fn panicking_tool_becomes_error_record() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("explode", json!({})), ("fast", json!({}))]),
            ScriptedReply::text("Sorry, one lookup failed."),
        ]));
        let outcome = runner(model, FakeGateway::new(), 5).run("go").await;

        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.iterations, 2);
        let record = &outcome.tool_calls[0];
        assert_eq!(record.name, "explode");
        assert!(record.is_error);
        assert_eq!(record.result["error"], true);
        assert!(record.result["message"].as_str().unwrap().contains("handler blew up"));
        assert!(!outcome.tool_calls[1].is_error);
    }

    #[tokio::test]
    async fn tool_error_is_fed_back_not_fatal() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("broken", json!({}))]),
            ScriptedReply::text("The database is down."),
        ]));
        let outcome = runner(model.clone(), FakeGateway::new(), 5).run("go").await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert_eq!(outcome.tool_calls[0].result["kind"], "execution");

        let Message::ToolResults(fed_back) = &model.requests()[1].messages[2] else {
            panic!("expected tool results");
        };
        assert!(fed_back.results[0].is_error);
    }

    #[tokio::test]
    async fn model_failure_keeps_accumulated_records() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("fast", json!({}))]),
            ScriptedReply::fail(ModelError::RateLimited),
        ]));
        let outcome = runner(model, FakeGateway::new(), 5).run("go").await;

        assert_eq!(outcome.status, RunStatus::ModelUnavailable);
        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.tool_calls.len(), 1);
        assert_eq!(outcome.message, RunnerConfig::default().unavailable_message);
    }

    #[tokio::test]
    async fn discovery_failure_runs_without_tools() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::text("no tools needed")]));
        let gateway = Arc::new(FakeGateway {
            discovery_fails: true,
        });
        let outcome = runner(model.clone(), gateway, 5).run("hi").await;
        assert_eq!(outcome.status, RunStatus::Completed);
        assert!(model.requests()[0].tools.is_empty());
    }

    #[tokio::test]
    async fn outcome_serializes_camel_case() {
        let model = Arc::new(ScriptedModel::new(vec![
            ScriptedReply::tool_calls(vec![("fast", json!({}))]),
            ScriptedReply::text("done"),
        ]));
        let outcome = runner(model, FakeGateway::new(), 5).run("go").await;
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "completed");
        assert_eq!(json["iterations"], 2);
        assert_eq!(json["toolCalls"][0]["name"], "fast");
        assert!(json["toolCalls"][0].get("durationMs").is_some());
        assert_eq!(json["toolCalls"][0]["isError"], false);
    }

    #[tokio::test]
    async fn system_prompt_and_history_are_sent() {
        let model = Arc::new(ScriptedModel::new(vec![ScriptedReply::text("sure")]));
        let config = RunnerConfig::default().with_system_prompt("Be brief.");
        let runner = AgentRunner::new(model.clone(), FakeGateway::new(), config).unwrap();

        let history = vec![
            Message::user_text("earlier question"),
            Message::Assistant(AssistantMessage::text("earlier answer")),
            Message::user_text("follow-up"),
        ];
        runner.run_conversation(history).await;
        let request = &model.requests()[0];
        assert_eq!(request.system_prompt.as_deref(), Some("Be brief."));
        assert_eq!(request.messages.len(), 3);
    }
}
