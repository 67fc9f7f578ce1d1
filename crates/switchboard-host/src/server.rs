use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};
use switchboard_core::ids::SessionId;
use switchboard_core::invocation::ToolInvocationRequest;
use switchboard_core::wire::{
    is_valid_frame_id, Frame, InboundMessage, AUTH_HEADER, MESSAGES_PATH, SSE_PATH,
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api::{self, ApiError};
use crate::dispatcher::Dispatcher;
use crate::transport::{SessionTransport, TransportConfig};

/// Server configuration.
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Mount `GET /tools` and `POST /tools/{name}`. Off in production.
    pub dev_routes: bool,
    /// SSE keep-alive comment interval.
    pub heartbeat: Duration,
    pub transport: TransportConfig,
}

impl ServerConfig {
    pub fn new(transport: TransportConfig) -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            dev_routes: false,
            heartbeat: Duration::from_secs(15),
            transport,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub transport: Arc<SessionTransport>,
    pub heartbeat: Duration,
}

/// Build the Axum router. Dev routes are only present when asked for.
pub fn build_router(state: AppState, dev_routes: bool) -> Router {
    let mut router = Router::new()
        .route(SSE_PATH, get(sse_handler))
        .route(MESSAGES_PATH, post(messages_handler))
        .route("/health", get(health_handler));
    if dev_routes {
        router = router
            .route("/tools", get(list_tools_handler))
            .route("/tools/{name}", post(call_tool_handler));
    }
    router
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind and start serving. Returns a handle to shut it down.
pub async fn start(config: ServerConfig, dispatcher: Arc<Dispatcher>) -> Result<ServerHandle, std::io::Error> {
    let transport = Arc::new(SessionTransport::new(config.transport, dispatcher));
    let state = AppState {
        transport: Arc::clone(&transport),
        heartbeat: config.heartbeat,
    };
    let router = build_router(state, config.dev_routes);

    let addr = format!("{}:{}", config.bind, config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(
        addr = %local_addr,
        dev_routes = config.dev_routes,
        tools = transport.dispatcher().registry().count(),
        "switchboard host started"
    );

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    let server = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { signal.cancelled().await })
            .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "server exited with error");
        }
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        transport,
        shutdown,
        server,
    })
}

/// Handle returned by `start()`.
pub struct ServerHandle {
    pub port: u16,
    transport: Arc<SessionTransport>,
    shutdown: CancellationToken,
    server: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    pub fn transport(&self) -> &Arc<SessionTransport> {
        &self.transport
    }

    pub fn base_url(&self) -> String {
        format!("http://127.0.0.1:{}", self.port)
    }

    /// Close every session and stop accepting connections.
    pub fn shutdown(&self) {
        self.transport.shutdown();
        self.shutdown.cancel();
    }

    /// Shut down and wait for the server task to finish.
    pub async fn stop(self) {
        self.shutdown();
        let _ = self.server.await;
    }
}

fn credential(headers: &HeaderMap) -> Option<&str> {
    headers.get(AUTH_HEADER).and_then(|v| v.to_str().ok())
}

fn to_event(frame: Frame) -> Event {
    let event = Event::default()
        .event(frame.event.as_str())
        .data(frame.data.to_string());
    match frame.id.filter(|id| is_valid_frame_id(id)) {
        Some(id) => event.id(id),
        None => event,
    }
}

async fn sse_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<Response, ApiError> {
    let opened = state.transport.open(credential(&headers))?;
    let events = opened.frames.map(|frame| Ok::<_, Infallible>(to_event(frame)));
    let sse = Sse::new(events).keep_alive(KeepAlive::new().interval(state.heartbeat));
    Ok(sse.into_response())
}

#[derive(Debug, Deserialize)]
struct MessagesQuery {
    session_id: String,
}

async fn messages_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<MessagesQuery>,
    body: Bytes,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    state.transport.authenticate(credential(&headers))?;
    let session_id = SessionId::from_raw(query.session_id);

    let message: InboundMessage = match serde_json::from_slice(&body) {
        Ok(message) => message,
        Err(e) => {
            let message = format!("malformed message: {e}");
            state
                .transport
                .report_protocol_error(&session_id, message.clone())
                .await?;
            return Err(ApiError::bad_request(message));
        }
    };

    let correlation_id = message.correlation_id().clone();
    if !is_valid_frame_id(correlation_id.as_str()) {
        let message = "correlationId must be non-empty and contain no line breaks or NUL".to_string();
        state
            .transport
            .report_protocol_error(&session_id, message.clone())
            .await?;
        return Err(ApiError::bad_request(message));
    }
    state.transport.submit(&session_id, message).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "accepted": true, "correlationId": correlation_id })),
    ))
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "sessions": state.transport.session_count(),
        "tools": state.transport.dispatcher().registry().count(),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_tools_handler(State(state): State<AppState>, headers: HeaderMap) -> Result<impl IntoResponse, ApiError> {
    state.transport.authenticate(credential(&headers))?;
    Ok(Json(state.transport.dispatcher().registry().list()))
}

async fn call_tool_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    state.transport.authenticate(credential(&headers))?;
    let arguments = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).map_err(|e| ApiError::bad_request(format!("malformed arguments: {e}")))?
    };

    let result = state
        .transport
        .dispatcher()
        .invoke(ToolInvocationRequest::new(name, arguments), None)
        .await;
    Ok((api::status_for_result(&result), Json(result)))
}
