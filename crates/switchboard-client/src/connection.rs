//! One live session with the tool host.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use switchboard_core::errors::TransportError;
use switchboard_core::ids::{CorrelationId, SessionId};
use switchboard_core::invocation::{ToolInvocationRequest, ToolInvocationResult};
use switchboard_core::schema::ToolDescriptor;
use switchboard_core::wire::{
    ConnectedPayload, EventKind, Frame, InboundMessage, ResourceQuery, AUTH_HEADER, SSE_PATH,
};
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn, Instrument};

use crate::sse::FrameReader;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug)]
pub struct ClientConfig {
    pub base_url: String,
    pub api_key: SecretString,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, api_key: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

type Pending = DashMap<CorrelationId, oneshot::Sender<Result<Frame, TransportError>>>;

/// Removes a pending entry however the waiting request ends.
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: CorrelationId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.id);
    }
}

/// An open stream plus the out-of-band submission endpoint.
///
/// A reader task owns the stream and routes reply frames to waiting
/// requests by correlation id. Once the stream ends, for whatever reason,
/// every waiting request fails with a [`TransportError`] and the connection
/// is dead for good.
pub struct Connection {
    session_id: SessionId,
    messages_url: String,
    http: reqwest::Client,
    config: Arc<ClientConfig>,
    pending: Arc<Pending>,
    closed: CancellationToken,
    _reader: DropGuard,
}

impl Connection {
    /// Open the stream and wait for the `connected` frame.
    pub async fn open(config: Arc<ClientConfig>) -> Result<Self, TransportError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| TransportError::Network(e.to_string()))?;

        let request = http
            .get(format!("{}{SSE_PATH}", config.base_url))
            .header(AUTH_HEADER, config.api_key.expose_secret())
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send();
        let resp = tokio::time::timeout(config.connect_timeout, request)
            .await
            .map_err(|_| TransportError::Timeout(config.connect_timeout))?
            .map_err(|e| TransportError::Network(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(TransportError::from_status(status, body));
        }

        let mut reader = FrameReader::new(resp.bytes_stream());
        let first = tokio::time::timeout(config.connect_timeout, reader.next_frame())
            .await
            .map_err(|_| TransportError::Timeout(config.connect_timeout))?
            .ok_or_else(|| TransportError::Protocol("stream ended before connected".into()))??;
        if first.event != EventKind::Connected {
            return Err(TransportError::Protocol(format!(
                "expected connected, got {}",
                first.event.as_str()
            )));
        }
        let connected: ConnectedPayload = serde_json::from_value(first.data)
            .map_err(|e| TransportError::Protocol(format!("invalid connected payload: {e}")))?;

        let pending = Arc::new(Pending::new());
        let closed = CancellationToken::new();
        let span = tracing::info_span!("connection", session_id = %connected.session_id);
        tokio::spawn(
            read_frames(reader, Arc::clone(&pending), closed.clone()).instrument(span),
        );

        info!(session_id = %connected.session_id, server = %connected.server, "connected to tool host");
        Ok(Self {
            session_id: connected.session_id,
            messages_url: format!("{}{}", config.base_url, connected.messages_path),
            http,
            config,
            pending,
            _reader: closed.clone().drop_guard(),
            closed,
        })
    }

    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// False once the stream has ended or `close` was called.
    pub fn is_alive(&self) -> bool {
        !self.closed.is_cancelled()
    }

    /// Drop the stream. Waiting requests fail; later calls are rejected.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolInvocationResult, TransportError> {
        self.invoke(ToolInvocationRequest::new(name, arguments)).await
    }

    pub async fn invoke(&self, request: ToolInvocationRequest) -> Result<ToolInvocationResult, TransportError> {
        self.request(InboundMessage::ToolCall(request))
            .await?
            .into_tool_result()
    }

    pub async fn list_tools(&self) -> Result<Vec<ToolDescriptor>, TransportError> {
        let data = self.resource("tools").await?;
        serde_json::from_value(data).map_err(|e| TransportError::Protocol(format!("invalid tool list: {e}")))
    }

    pub async fn resource(&self, resource: &str) -> Result<Value, TransportError> {
        self.request(InboundMessage::ResourceQuery(ResourceQuery::new(resource)))
            .await?
            .into_resource_data()
    }

    /// Submit a message and wait for the frame carrying its correlation id.
    async fn request(&self, message: InboundMessage) -> Result<Frame, TransportError> {
        let id = message.correlation_id().clone();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(id.clone(), tx);
        let _guard = PendingGuard {
            pending: &self.pending,
            id: id.clone(),
        };
        // The reader cancels before draining, so an entry inserted after
        // the drain is caught here.
        if self.closed.is_cancelled() {
            return Err(TransportError::SessionClosed);
        }

        self.submit(&message).await?;

        match tokio::time::timeout(self.config.request_timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(TransportError::SessionClosed),
            Err(_) => {
                warn!(correlation_id = %id, "request timed out");
                Err(TransportError::Timeout(self.config.request_timeout))
            }
        }
    }

    async fn submit(&self, message: &InboundMessage) -> Result<(), TransportError> {
        let resp = self
            .http
            .post(&self.messages_url)
            .header(AUTH_HEADER, self.config.api_key.expose_secret())
            .json(message)
            .timeout(self.config.request_timeout)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.to_string()))?;
        if resp.status().is_success() {
            return Ok(());
        }
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Err(TransportError::from_status(status, body))
    }
}

async fn read_frames(mut reader: FrameReader, pending: Arc<Pending>, closed: CancellationToken) {
    let reason = loop {
        let next = tokio::select! {
            _ = closed.cancelled() => break TransportError::SessionClosed,
            next = reader.next_frame() => next,
        };
        let frame = match next {
            None => break TransportError::SessionClosed,
            Some(Err(TransportError::Network(message))) => break TransportError::Network(message),
            Some(Err(e)) => {
                warn!(error = %e, "skipping undecodable frame");
                continue;
            }
            Some(Ok(frame)) => frame,
        };

        if frame.event == EventKind::Timeout {
            info!("host closed idle session");
            break TransportError::SessionClosed;
        }
        match frame.correlation_id() {
            Some(id) => match pending.remove(&id) {
                Some((_, waiter)) => {
                    let _ = waiter.send(Ok(frame));
                }
                None => debug!(correlation_id = %id, "reply for unknown request"),
            },
            None => warn!(event = frame.event.as_str(), data = %frame.data, "uncorrelated frame"),
        }
    };

    closed.cancel();
    let waiting: Vec<CorrelationId> = pending.iter().map(|e| e.key().clone()).collect();
    for id in waiting {
        if let Some((_, waiter)) = pending.remove(&id) {
            let _ = waiter.send(Err(reason.clone()));
        }
    }
    debug!(reason = %reason, "connection reader stopped");
}
