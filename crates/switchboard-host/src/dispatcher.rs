use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use switchboard_core::ids::{CorrelationId, SessionId};
use switchboard_core::invocation::{ToolInvocationRequest, ToolInvocationResult};
use switchboard_core::tools::{ToolContext, ToolError};
use switchboard_telemetry::MetricsRecorder;
use tokio_util::task::AbortOnDropHandle;
use tracing::{debug, warn};

use crate::registry::ToolRegistry;
use crate::validate::validate_args;

pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(30);

/// Runs registered handlers with validated arguments.
///
/// Every call gets its own task and its own [`ToolContext`]. A handler that
/// errors, panics or overruns the timeout produces a [`ToolError`]; nothing
/// unwinds past the dispatcher.
pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self {
            registry,
            timeout: DEFAULT_TOOL_TIMEOUT,
            metrics: Arc::new(MetricsRecorder::new()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn registry(&self) -> &Arc<ToolRegistry> {
        &self.registry
    }

    pub fn metrics(&self) -> &Arc<MetricsRecorder> {
        &self.metrics
    }

    /// Look up, validate and run `name` with `args`.
    pub async fn execute(&self, name: &str, args: Value) -> Result<Value, ToolError> {
        self.run(name, args, ToolContext::new(CorrelationId::new(), None))
            .await
    }

    /// Run a correlated request and package the outcome as its single result.
    pub async fn invoke(
        &self,
        request: ToolInvocationRequest,
        session_id: Option<SessionId>,
    ) -> ToolInvocationResult {
        let started = Instant::now();
        let ToolInvocationRequest {
            correlation_id,
            tool_name,
            arguments,
            ..
        } = request;

        let ctx = ToolContext::new(correlation_id.clone(), session_id);
        let outcome = self.run(&tool_name, arguments, ctx).await;
        let duration = started.elapsed();

        let status = match &outcome {
            Ok(_) => "success",
            Err(e) => e.kind().as_str(),
        };
        self.metrics
            .counter_inc("tool_calls_total", &[("tool", tool_name.as_str()), ("status", status)], 1);
        self.metrics.histogram_observe(
            "tool_duration_ms",
            &[("tool", tool_name.as_str())],
            duration.as_secs_f64() * 1000.0,
        );

        match outcome {
            Ok(payload) => {
                debug!(tool = %tool_name, correlation_id = %correlation_id, duration_ms = duration.as_millis() as u64, "tool call succeeded");
                ToolInvocationResult::success(correlation_id, tool_name, payload, duration)
            }
            Err(error) => {
                warn!(tool = %tool_name, correlation_id = %correlation_id, status, error = %error, "tool call failed");
                ToolInvocationResult::failure(correlation_id, tool_name, error.to_failure(), duration)
            }
        }
    }

    async fn run(&self, name: &str, args: Value, ctx: ToolContext) -> Result<Value, ToolError> {
        let tool = self
            .registry
            .lookup(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        let args = validate_args(tool, args)?;

        let handler = tool.handler();
        let cancel = ctx.cancel.clone();
        // Aborted if this future is dropped, e.g. when the session closes mid-call.
        let mut task = AbortOnDropHandle::new(tokio::spawn(async move { handler.call(args, ctx).await }));

        match tokio::time::timeout(self.timeout, &mut task).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(ToolError::Execution {
                tool: name.to_string(),
                message: e.to_string(),
            }),
            Ok(Err(join_err)) => {
                let message = if join_err.is_panic() {
                    format!("handler panicked: {}", panic_message(&join_err.into_panic()))
                } else {
                    "handler task was cancelled".to_string()
                };
                Err(ToolError::Execution {
                    tool: name.to_string(),
                    message,
                })
            }
            Err(_) => {
                cancel.cancel();
                task.abort();
                Err(ToolError::Timeout {
                    tool: name.to_string(),
                    after: self.timeout,
                })
            }
        }
    }
}

fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    panic
        .downcast_ref::<String>()
        .map(|s| s.as_str())
        .or_else(|| panic.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic")
        .to_string()
}
