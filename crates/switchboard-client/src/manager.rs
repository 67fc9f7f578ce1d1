use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde_json::Value;
use switchboard_core::errors::TransportError;
use switchboard_core::gateway::ToolGateway;
use switchboard_core::ids::CorrelationId;
use switchboard_core::invocation::{FailureKind, ToolFailure, ToolInvocationRequest, ToolInvocationResult};
use switchboard_core::schema::ToolDescriptor;
use tracing::{info, instrument, warn};

use crate::connection::{ClientConfig, Connection};

type ConnectAttempt = Shared<BoxFuture<'static, Result<Arc<Connection>, TransportError>>>;

enum Slot {
    Empty,
    Connecting(ConnectAttempt),
    Ready(Arc<Connection>),
}

/// The process-wide connection to the tool host.
///
/// Constructed once and shared by reference. The first caller starts the
/// connect attempt; callers arriving while it runs await that same attempt
/// and get its outcome, success or failure. A failed attempt is not cached,
/// and a connection whose stream has ended is replaced on the next call.
pub struct ConnectionManager {
    config: Arc<ClientConfig>,
    slot: Mutex<Slot>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config: Arc::new(config),
            slot: Mutex::new(Slot::Empty),
        }
    }

    pub async fn get_connection(&self) -> Result<Arc<Connection>, TransportError> {
        let attempt = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Ready(conn) if conn.is_alive() => return Ok(Arc::clone(conn)),
                Slot::Connecting(attempt) => attempt.clone(),
                Slot::Ready(_) | Slot::Empty => {
                    if matches!(*slot, Slot::Ready(_)) {
                        info!("replacing dead connection");
                    }
                    let config = Arc::clone(&self.config);
                    let attempt = async move { Connection::open(config).await.map(Arc::new) }
                        .boxed()
                        .shared();
                    *slot = Slot::Connecting(attempt.clone());
                    attempt
                }
            }
        };

        let outcome = attempt.clone().await;

        let mut slot = self.slot.lock();
        // Only the attempt still in the slot settles it; a close() or a
        // newer attempt may have replaced it meanwhile.
        if matches!(&*slot, Slot::Connecting(current) if current.ptr_eq(&attempt)) {
            *slot = match &outcome {
                Ok(conn) => Slot::Ready(Arc::clone(conn)),
                Err(_) => Slot::Empty,
            };
        }
        outcome
    }

    /// Tool descriptors as the host currently reports them.
    #[instrument(skip(self))]
    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        self.get_connection().await?.list_tools().await
    }

    /// Run a tool. Never fails: transport problems come back as a result
    /// with a `transport` error outcome.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolInvocationResult {
        self.invoke(ToolInvocationRequest::new(name, arguments)).await
    }

    /// Like [`call_tool`](Self::call_tool), for a prepared request. The
    /// result always carries the request's correlation id.
    pub async fn invoke(&self, request: ToolInvocationRequest) -> ToolInvocationResult {
        let started = Instant::now();
        let correlation_id = request.correlation_id.clone();
        let name = request.tool_name.clone();
        let outcome = match self.get_connection().await {
            Ok(conn) => conn.invoke(request).await,
            Err(e) => Err(e),
        };
        match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = %name, correlation_id = %correlation_id, error = %e, kind = e.error_kind(), "tool call failed in transport");
                transport_failure(correlation_id, &name, &e, started.elapsed())
            }
        }
    }

    /// Release the connection. Idempotent; a later call reconnects.
    pub async fn close(&self) {
        let previous = std::mem::replace(&mut *self.slot.lock(), Slot::Empty);
        if let Slot::Ready(conn) = previous {
            conn.close();
            info!(session_id = %conn.session_id(), "connection closed");
        }
    }
}

fn transport_failure(
    correlation_id: CorrelationId,
    name: &str,
    error: &TransportError,
    elapsed: Duration,
) -> ToolInvocationResult {
    ToolInvocationResult::failure(
        correlation_id,
        name,
        ToolFailure {
            kind: FailureKind::Transport,
            tool: name.to_string(),
            message: error.to_string(),
            field: None,
        },
        elapsed,
    )
}

#[async_trait]
impl ToolGateway for ConnectionManager {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        ConnectionManager::list_tools(self).await
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> ToolInvocationResult {
        ConnectionManager::call_tool(self, name, arguments).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;
    use serde_json::json;
    use switchboard_core::schema::ParamSpec;
    use switchboard_core::tools::{handler_fn, HandlerError, ToolArgs};
    use switchboard_host::{start, Dispatcher, ServerConfig, ServerHandle, ToolRegistry, TransportConfig};

    const SECRET: &str = "manager-test";

    async fn host() -> ServerHandle {
        let mut registry = ToolRegistry::new();
        registry
            .register(
                ToolDescriptor::new("echo", "Echo").param(ParamSpec::string("text").required()),
                handler_fn(|args: ToolArgs, _ctx| async move {
                    Ok::<_, HandlerError>(json!({ "echo": args["text"] }))
                }),
            )
            .unwrap();
        let config = ServerConfig {
            port: 0,
            ..ServerConfig::new(TransportConfig::new(SECRET))
        };
        start(config, Arc::new(Dispatcher::new(Arc::new(registry))))
            .await
            .unwrap()
    }

    fn manager(base_url: String, key: &str) -> ConnectionManager {
        ConnectionManager::new(ClientConfig::new(base_url, SecretString::from(key.to_string())))
    }

    #[tokio::test]
    async fn concurrent_first_callers_share_one_connection() {
        let handle = host().await;
        let manager = Arc::new(manager(handle.base_url(), SECRET));

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move { manager.get_connection().await.unwrap() }));
        }
        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.unwrap().session_id().clone());
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(handle.transport().session_count(), 1);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_failed_attempt() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Accepts TCP but never answers, so every attempt runs into the timeout.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accepted = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&accepted);
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                counter.fetch_add(1, Ordering::SeqCst);
                held.push(socket);
            }
        });

        let mut config = ClientConfig::new(
            format!("http://127.0.0.1:{port}"),
            SecretString::from(SECRET.to_string()),
        );
        config.connect_timeout = Duration::from_millis(200);
        let manager = Arc::new(ConnectionManager::new(config));

        let started = Instant::now();
        let mut tasks = Vec::new();
        for _ in 0..5 {
            let manager = Arc::clone(&manager);
            tasks.push(tokio::spawn(async move { manager.get_connection().await }));
        }
        for task in tasks {
            let err = task.await.unwrap().err().unwrap();
            assert_eq!(err, TransportError::Timeout(Duration::from_millis(200)));
        }
        assert!(started.elapsed() < Duration::from_millis(800), "took {:?}", started.elapsed());
        assert_eq!(accepted.load(Ordering::SeqCst), 1);

        // the failure is not cached: the next caller tries again
        assert!(manager.get_connection().await.is_err());
        assert_eq!(accepted.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn transport_failure_keeps_the_request_correlation_id() {
        let handle = host().await;
        let manager = manager(handle.base_url(), "wrong");
        let request = ToolInvocationRequest::new("echo", json!({ "text": "x" }));
        let id = request.correlation_id.clone();

        let result = manager.invoke(request).await;
        assert_eq!(result.correlation_id, id);
        assert_eq!(result.error().unwrap().kind, FailureKind::Transport);
    }

    #[tokio::test]
    async fn lists_and_calls_through_gateway() {
        let handle = host().await;
        let manager = manager(handle.base_url(), SECRET);
        let gateway: &dyn ToolGateway = &manager;

        let tools = gateway.list_tools().await.unwrap();
        assert_eq!(tools[0].name, "echo");

        let result = gateway.call_tool("echo", json!({ "text": "yo" })).await;
        assert!(!result.is_error());
        assert_eq!(result.to_model_value(), json!({ "echo": "yo" }));
    }

    #[tokio::test]
    async fn transport_failure_becomes_error_result() {
        let handle = host().await;
        let manager = manager(handle.base_url(), "wrong");
        let result = manager.call_tool("echo", json!({ "text": "x" })).await;
        let error = result.error().unwrap();
        assert_eq!(error.kind, FailureKind::Transport);
        assert_eq!(error.tool, "echo");
        assert!(manager.list_tools().await.is_err());
    }

    #[tokio::test]
    async fn unreachable_host_becomes_error_result() {
        // Bind then drop to get a port nobody listens on.
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let manager = manager(format!("http://127.0.0.1:{port}"), SECRET);
        let result = manager.call_tool("echo", json!({})).await;
        assert_eq!(result.error().unwrap().kind, FailureKind::Transport);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_reconnects_lazily() {
        let handle = host().await;
        let manager = manager(handle.base_url(), SECRET);

        let first = manager.get_connection().await.unwrap();
        manager.close().await;
        manager.close().await;
        assert!(!first.is_alive());

        let second = manager.get_connection().await.unwrap();
        assert_ne!(first.session_id(), second.session_id());
        assert!(!manager.call_tool("echo", json!({ "text": "again" })).await.is_error());
    }

    #[tokio::test]
    async fn dead_connection_is_replaced() {
        let handle = host().await;
        let manager = manager(handle.base_url(), SECRET);

        let first = manager.get_connection().await.unwrap();
        handle.transport().close(first.session_id());
        for _ in 0..50 {
            if !first.is_alive() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let second = manager.get_connection().await.unwrap();
        assert_ne!(first.session_id(), second.session_id());
    }
}
