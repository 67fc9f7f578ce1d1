use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use switchboard_core::ids::SessionId;
use tokio::sync::watch;
use tokio::time::Instant;

/// Lifecycle of one streaming session.
///
/// `Connecting → Authenticated → Streaming ⇄ ToolDispatch → Closing → Closed`
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Authenticated,
    Streaming,
    ToolDispatch,
    Closing,
    Closed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Authenticated => "authenticated",
            Self::Streaming => "streaming",
            Self::ToolDispatch => "tool_dispatch",
            Self::Closing => "closing",
            Self::Closed => "closed",
        }
    }

    pub fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Connecting, Authenticated)
                | (Authenticated, Streaming)
                | (Authenticated, Closing)
                | (Streaming, ToolDispatch)
                | (ToolDispatch, Streaming)
                | (Streaming, Closing)
                | (ToolDispatch, Closing)
                | (Closing, Closed)
        )
    }

    /// Accepting inbound messages.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Streaming | Self::ToolDispatch)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// Why a session left the streaming states.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CloseReason {
    /// Explicit `close()` or transport shutdown.
    Closed,
    ClientDisconnected,
    IdleTimeout,
}

impl CloseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Closed => "closed",
            Self::ClientDisconnected => "client_disconnected",
            Self::IdleTimeout => "idle_timeout",
        }
    }
}

/// Snapshot served for the `session` resource query.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub idle_timeout_secs: u64,
    pub credential: String,
}

/// Per-session record, owned by the session's task.
pub struct Session {
    id: SessionId,
    credential_fingerprint: String,
    created_at: DateTime<Utc>,
    last_activity: Instant,
    idle_timeout: Duration,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(
        id: SessionId,
        credential_fingerprint: String,
        idle_timeout: Duration,
    ) -> (Self, watch::Receiver<SessionState>) {
        let (state, state_rx) = watch::channel(SessionState::Connecting);
        let session = Self {
            id,
            credential_fingerprint,
            created_at: Utc::now(),
            last_activity: Instant::now(),
            idle_timeout,
            state,
        };
        (session, state_rx)
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Move to `next` if the lifecycle allows it. Returns whether it moved.
    pub fn transition(&mut self, next: SessionState) -> bool {
        let current = self.state();
        if current == next {
            return true;
        }
        if !current.can_transition_to(next) {
            tracing::warn!(
                session_id = %self.id,
                from = current.as_str(),
                to = next.as_str(),
                "rejected session state transition"
            );
            return false;
        }
        self.state.send_replace(next);
        tracing::trace!(session_id = %self.id, from = current.as_str(), to = next.as_str(), "session state");
        true
    }

    /// Mark the end of a message exchange; the idle budget restarts here.
    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn idle_deadline(&self) -> Instant {
        self.last_activity + self.idle_timeout
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.id.clone(),
            state: self.state(),
            created_at: self.created_at,
            idle_timeout_secs: self.idle_timeout.as_secs(),
            credential: self.credential_fingerprint.clone(),
        }
    }
}
