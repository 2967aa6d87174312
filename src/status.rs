use tokio::sync::broadcast;
use tracing::debug;

const STATUS_CAPACITY: usize = 256;

/// User-facing notifications emitted by the orchestrators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    HostingStarted { room_id: String },
    HostingStopped,
    RosterChanged(Vec<String>),
    Joining { room_id: String },
    SessionConnected { session_id: String },
    ConnectionProblem { session_id: String },
    SessionClosed { session_id: String },
    NegotiationFailed { session_id: String, message: String },
    NegotiationTimedOut { session_id: String },
    StreamAttached { session_id: String },
    /// Viewer side; recover with a manual retry
    PlaybackFailed { message: String },
    HostStopped,
    HostDisconnected,
    /// Server `error-message`, verbatim
    ServerError(String),
    /// Local failure outside any session, e.g. capture
    Error(String),
}

/// Fan-out of [`StatusEvent`]s; sending never blocks and never fails the
/// caller when nobody listens.
#[derive(Debug, Clone)]
pub struct StatusEmitter {
    tx: broadcast::Sender<StatusEvent>,
}

impl Default for StatusEmitter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusEmitter {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(STATUS_CAPACITY);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.tx.subscribe()
    }

    pub fn emit(&self, event: StatusEvent) {
        debug!("status: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn emit_connected(&self, session_id: &str) {
        self.emit(StatusEvent::SessionConnected {
            session_id: session_id.to_string(),
        });
    }

    pub fn emit_connection_problem(&self, session_id: &str) {
        self.emit(StatusEvent::ConnectionProblem {
            session_id: session_id.to_string(),
        });
    }

    pub fn emit_closed(&self, session_id: &str) {
        self.emit(StatusEvent::SessionClosed {
            session_id: session_id.to_string(),
        });
    }

    pub fn emit_negotiation_failed(&self, session_id: &str, message: impl Into<String>) {
        self.emit(StatusEvent::NegotiationFailed {
            session_id: session_id.to_string(),
            message: message.into(),
        });
    }

    pub fn emit_roster(&self, roster: Vec<String>) {
        self.emit(StatusEvent::RosterChanged(roster));
    }
}
