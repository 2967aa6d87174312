use crate::capture::CaptureError;
use crate::peer::state::NegotiationState;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error type.
///
/// Variants follow the failure classes the broadcast core distinguishes:
/// capture failures abort start-sharing, negotiation-state failures drop the
/// offending message, routing failures are dropped silently by callers,
/// and transport/playback failures are surfaced for a manual retry.
#[derive(Debug, Error)]
pub enum Error {
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),

    #[error("cannot {action} while {state}")]
    NegotiationState {
        action: &'static str,
        state: NegotiationState,
    },

    #[error("no session for {0}")]
    UnknownSession(String),

    #[error("session {0} is closed")]
    SessionClosed(String),

    #[error("invalid session descriptor: {0}")]
    Descriptor(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error(transparent)]
    WebRtc(#[from] webrtc::Error),

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("signaling error: {0}")]
    Signaling(String),

    #[error("room error: {0}")]
    Room(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Routing errors are expected when a peer leaves mid-negotiation.
    pub fn is_routing(&self) -> bool {
        matches!(self, Error::UnknownSession(_) | Error::SessionClosed(_))
    }
}
