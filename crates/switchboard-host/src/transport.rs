//! Session transport: one task per open stream.
//!
//! A session task owns its [`Session`] record and the sending half of the
//! outbound frame queue. Inbound messages reach it through a command
//! channel; tool calls run concurrently on a `JoinSet` so a slow tool never
//! blocks resource queries or other calls on the same session. Sessions
//! share nothing but the dispatcher (and through it the read-only registry).

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use dashmap::DashMap;
use futures::{FutureExt, Stream};
use pin_project_lite::pin_project;
use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};
use switchboard_core::errors::TransportError;
use switchboard_core::ids::{CorrelationId, SessionId};
use switchboard_core::invocation::ToolInvocationRequest;
use switchboard_core::wire::{ConnectedPayload, Frame, InboundMessage, ResourceQuery, MESSAGES_PATH};
use tokio::sync::{mpsc, watch};
use tokio::task::{self, JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn, Instrument};

use crate::dispatcher::Dispatcher;
use crate::session::{CloseReason, Session, SessionState};

/// Default idle budget: thirty minutes without a completed exchange.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// How long a final `timeout` frame may wait for queue space.
const FAREWELL_SEND_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Clone, Debug)]
pub struct TransportConfig {
    pub shared_secret: SecretString,
    pub idle_timeout: Duration,
    /// Outbound queue depth per session.
    pub send_queue: usize,
    pub server_name: String,
}

impl TransportConfig {
    pub fn new(shared_secret: impl Into<String>) -> Self {
        Self {
            shared_secret: SecretString::from(shared_secret.into()),
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            send_queue: 64,
            server_name: "switchboard".to_string(),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn with_send_queue(mut self, send_queue: usize) -> Self {
        self.send_queue = send_queue.max(1);
        self
    }
}

enum SessionCommand {
    Message(InboundMessage),
    ProtocolError(String),
}

/// Cheap, cloneable reference to a live session.
#[derive(Clone)]
pub struct SessionHandle {
    id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
    cancel: CancellationToken,
    state: watch::Receiver<SessionState>,
}

impl SessionHandle {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Request closure. Idempotent; safe from any task at any time.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// Resolve once the session has reached `Closed`.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        // An Err means the session task is gone, which only happens after Closed.
        let _ = state.wait_for(|s| s.is_terminal()).await;
    }
}

pin_project! {
    /// Outbound frames of one session. Dropping the stream counts as a
    /// client disconnect and closes the session.
    pub struct FrameStream {
        #[pin]
        inner: ReceiverStream<Frame>,
        _guard: DropGuard,
    }
}

impl Stream for FrameStream {
    type Item = Frame;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.project().inner.poll_next(cx)
    }
}

/// A freshly authenticated session and its outbound stream. The first frame
/// on the stream is always `connected`.
pub struct OpenedSession {
    pub session: SessionHandle,
    pub frames: FrameStream,
}

pub struct SessionTransport {
    config: TransportConfig,
    secret_digest: Vec<u8>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
    shutdown: CancellationToken,
}

impl SessionTransport {
    pub fn new(config: TransportConfig, dispatcher: Arc<Dispatcher>) -> Self {
        let secret_digest = Sha256::digest(config.shared_secret.expose_secret().as_bytes()).to_vec();
        Self {
            config,
            secret_digest,
            dispatcher,
            sessions: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Check a presented credential. Returns a short fingerprint of it for
    /// logging; the credential itself is never stored.
    pub fn authenticate(&self, credential: Option<&str>) -> Result<String, TransportError> {
        let credential = credential.filter(|c| !c.is_empty()).ok_or(TransportError::Unauthorized)?;
        // Comparing digests keeps the comparison length-independent.
        let digest = Sha256::digest(credential.as_bytes());
        if digest.as_slice() != self.secret_digest.as_slice() {
            return Err(TransportError::Unauthorized);
        }
        Ok(digest[..6].iter().map(|b| format!("{b:02x}")).collect())
    }

    /// Authenticate and start a session. Nothing is allocated on failure.
    pub fn open(&self, credential: Option<&str>) -> Result<OpenedSession, TransportError> {
        let fingerprint = match self.authenticate(credential) {
            Ok(fp) => fp,
            Err(e) => {
                self.dispatcher.metrics().counter_inc("sessions_rejected_total", &[], 1);
                warn!("rejected session: bad or missing credential");
                return Err(e);
            }
        };

        let id = SessionId::new();
        let (mut session, state_rx) = Session::new(id.clone(), fingerprint, self.config.idle_timeout);
        session.transition(SessionState::Authenticated);

        let (frame_tx, frame_rx) = mpsc::channel(self.config.send_queue.max(1));
        let (command_tx, command_rx) = mpsc::channel(self.config.send_queue.max(1));
        let cancel = self.shutdown.child_token();

        let connected = Frame::connected(&ConnectedPayload {
            session_id: id.clone(),
            messages_path: format!("{MESSAGES_PATH}?session_id={id}"),
            server: self.config.server_name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        });
        // Fresh channel with capacity >= 1: cannot be full.
        frame_tx
            .try_send(connected)
            .map_err(|_| TransportError::SessionClosed)?;
        session.transition(SessionState::Streaming);

        let handle = SessionHandle {
            id: id.clone(),
            commands: command_tx,
            cancel: cancel.clone(),
            state: state_rx,
        };
        self.sessions.insert(id.clone(), handle.clone());

        let metrics = self.dispatcher.metrics();
        metrics.counter_inc("sessions_opened_total", &[], 1);
        metrics.gauge_inc("sessions_active", &[], 1.0);
        info!(session_id = %id, "session opened");

        let task = SessionTask {
            session,
            commands: command_rx,
            frames: frame_tx,
            cancel: cancel.clone(),
            in_flight: JoinSet::new(),
            in_flight_ids: HashMap::new(),
            dispatcher: Arc::clone(&self.dispatcher),
            sessions: Arc::clone(&self.sessions),
        };
        let span = tracing::info_span!("session", session_id = %id);
        tokio::spawn(task.run().instrument(span));

        Ok(OpenedSession {
            session: handle,
            frames: FrameStream {
                inner: ReceiverStream::new(frame_rx),
                _guard: cancel.drop_guard(),
            },
        })
    }

    /// Hand an inbound message to its session.
    pub async fn submit(&self, session_id: &SessionId, message: InboundMessage) -> Result<(), TransportError> {
        self.send_command(session_id, SessionCommand::Message(message)).await
    }

    /// Report a malformed inbound message on the session's stream.
    pub async fn report_protocol_error(
        &self,
        session_id: &SessionId,
        message: impl Into<String>,
    ) -> Result<(), TransportError> {
        self.send_command(session_id, SessionCommand::ProtocolError(message.into()))
            .await
    }

    async fn send_command(&self, session_id: &SessionId, command: SessionCommand) -> Result<(), TransportError> {
        // Clone out of the map so no shard lock is held across the await.
        let handle = self
            .sessions
            .get(session_id)
            .map(|h| h.value().clone())
            .ok_or_else(|| TransportError::SessionNotFound(session_id.to_string()))?;
        if !handle.state().is_open() || handle.cancel.is_cancelled() {
            return Err(TransportError::SessionClosed);
        }
        handle
            .commands
            .send(command)
            .await
            .map_err(|_| TransportError::SessionClosed)
    }

    /// Close a session. Unknown or already-closed sessions are a no-op.
    pub fn close(&self, session_id: &SessionId) {
        if let Some(handle) = self.sessions.get(session_id) {
            handle.close();
        }
    }

    /// Close every session.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn session(&self, session_id: &SessionId) -> Option<SessionHandle> {
        self.sessions.get(session_id).map(|h| h.value().clone())
    }

    pub fn state(&self, session_id: &SessionId) -> Option<SessionState> {
        self.sessions.get(session_id).map(|h| h.state())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

struct SessionTask {
    session: Session,
    commands: mpsc::Receiver<SessionCommand>,
    frames: mpsc::Sender<Frame>,
    cancel: CancellationToken,
    in_flight: JoinSet<Frame>,
    /// Correlation ids of the calls in `in_flight`, by task.
    in_flight_ids: HashMap<task::Id, CorrelationId>,
    dispatcher: Arc<Dispatcher>,
    sessions: Arc<DashMap<SessionId, SessionHandle>>,
}

impl SessionTask {
    async fn run(mut self) {
        let reason = self.serve().await;
        self.finish(reason).await;
    }

    async fn serve(&mut self) -> CloseReason {
        loop {
            let idle = tokio::time::sleep_until(self.session.idle_deadline());

            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    return if self.frames.is_closed() {
                        CloseReason::ClientDisconnected
                    } else {
                        CloseReason::Closed
                    };
                }

                Some(joined) = self.in_flight.join_next_with_id(), if !self.in_flight.is_empty() => {
                    let frame = match joined {
                        Ok((task_id, frame)) => {
                            self.in_flight_ids.remove(&task_id);
                            frame
                        }
                        Err(e) => {
                            self.in_flight_ids.remove(&e.id());
                            warn!(error = %e, "dispatch task ended without a result");
                            if self.in_flight.is_empty() {
                                self.session.transition(SessionState::Streaming);
                            }
                            continue;
                        }
                    };
                    self.session.touch();
                    if self.in_flight.is_empty() {
                        self.session.transition(SessionState::Streaming);
                    }
                    if !self.send(frame).await {
                        return CloseReason::ClientDisconnected;
                    }
                }

                command = self.commands.recv() => match command {
                    Some(SessionCommand::Message(message)) if self.is_in_flight(message.correlation_id()) => {
                        let id = message.correlation_id().clone();
                        warn!(correlation_id = %id, "correlation id already in flight");
                        let frame = Frame::protocol_error(
                            Some(&id),
                            format!("correlation id {id} is already in flight"),
                        );
                        if !self.send(frame).await {
                            return CloseReason::ClientDisconnected;
                        }
                    }
                    Some(SessionCommand::Message(InboundMessage::ToolCall(request))) => {
                        self.session.touch();
                        self.session.transition(SessionState::ToolDispatch);
                        self.spawn_dispatch(request);
                    }
                    Some(SessionCommand::Message(InboundMessage::ResourceQuery(query))) => {
                        self.session.touch();
                        let frame = self.resolve_resource(&query);
                        if !self.send(frame).await {
                            return CloseReason::ClientDisconnected;
                        }
                    }
                    Some(SessionCommand::ProtocolError(message)) => {
                        warn!(%message, "malformed inbound message");
                        if !self.send(Frame::protocol_error(None, message)).await {
                            return CloseReason::ClientDisconnected;
                        }
                    }
                    None => return CloseReason::Closed,
                },

                // The idle budget only runs while nothing is in flight.
                _ = idle, if self.in_flight.is_empty() => {
                    return CloseReason::IdleTimeout;
                }
            }
        }
    }

    fn spawn_dispatch(&mut self, request: ToolInvocationRequest) {
        let dispatcher = Arc::clone(&self.dispatcher);
        let session_id = self.session.id().clone();
        let correlation_id = request.correlation_id.clone();
        debug!(tool = %request.tool_name, correlation_id = %correlation_id, "dispatching tool call");

        let task_correlation_id = correlation_id.clone();
        let handle = self.in_flight.spawn(async move {
            let invocation = dispatcher.invoke(request, Some(session_id));
            match AssertUnwindSafe(invocation).catch_unwind().await {
                Ok(result) => Frame::from_result(&result),
                Err(_) => Frame::protocol_error(Some(&task_correlation_id), "tool dispatch failed"),
            }
        });
        self.in_flight_ids.insert(handle.id(), correlation_id);
    }

    fn is_in_flight(&self, correlation_id: &CorrelationId) -> bool {
        self.in_flight_ids.values().any(|id| id == correlation_id)
    }

    fn resolve_resource(&self, query: &ResourceQuery) -> Frame {
        let registry = self.dispatcher.registry();
        let data = match query.resource.as_str() {
            "tools" => serde_json::to_value(registry.list()).ok(),
            "session" => serde_json::to_value(self.session.info()).ok(),
            other => other
                .strip_prefix("tools/")
                .and_then(|name| registry.lookup(name))
                .and_then(|tool| serde_json::to_value(tool.descriptor()).ok()),
        };
        match data {
            Some(data) => Frame::resource(&query.correlation_id, &query.resource, data),
            None => Frame::protocol_error(
                Some(&query.correlation_id),
                format!("unknown resource: {}", query.resource),
            ),
        }
    }

    /// Queue a frame. False once the client is gone or the session is closing.
    async fn send(&self, frame: Frame) -> bool {
        tokio::select! {
            sent = self.frames.send(frame) => sent.is_ok(),
            _ = self.cancel.cancelled() => false,
        }
    }

    async fn finish(mut self, reason: CloseReason) {
        let id = self.session.id().clone();
        self.session.transition(SessionState::Closing);

        if reason == CloseReason::IdleTimeout {
            let farewell = Frame::timeout(&id, self.session.idle_timeout());
            let _ = tokio::time::timeout(FAREWELL_SEND_TIMEOUT, self.frames.send(farewell)).await;
        }

        // In-flight calls on a closing session never report back; the
        // client sees its pending requests fail when the stream ends.
        let abandoned = self.in_flight.len();
        self.in_flight_ids.clear();
        self.in_flight.abort_all();
        while self.in_flight.join_next().await.is_some() {}
        self.commands.close();

        self.sessions.remove(&id);
        self.session.transition(SessionState::Closed);

        let metrics = self.dispatcher.metrics();
        metrics.gauge_inc("sessions_active", &[], -1.0);
        metrics.counter_inc("sessions_closed_total", &[("reason", reason.as_str())], 1);
        info!(reason = reason.as_str(), abandoned, "session closed");
        // Dropping `self.frames` here ends the outbound stream.
    }
}
