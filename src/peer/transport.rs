//! Seam between the negotiation state machine and the peer connection that
//! actually carries media. `WebRtcTransport` is the production implementation;
//! tests plug in the doubles from `testing`.

use crate::config::SessionConfig;
use crate::error::Result;
use crate::peer::types::{CandidatePayload, MediaKind, OutboundTrack, RemoteTrack, SessionDescriptor};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Connectivity as reported by the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

/// Callbacks from the transport, delivered in order to the owning session.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Locally gathered candidate to trickle to the remote peer
    LocalCandidate(CandidatePayload),
    GatheringComplete,
    StateChanged(TransportState),
    TrackArrived(RemoteTrack),
}

pub type TransportEvents = mpsc::UnboundedReceiver<TransportEvent>;

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn add_track(&self, track: &OutboundTrack) -> Result<()>;

    async fn create_offer(&self) -> Result<String>;

    async fn create_answer(&self) -> Result<String>;

    async fn set_local_description(&self, descriptor: &SessionDescriptor) -> Result<()>;

    async fn set_remote_description(&self, descriptor: &SessionDescriptor) -> Result<()>;

    async fn add_ice_candidate(&self, candidate: &CandidatePayload) -> Result<()>;

    /// Caps the sender of `kind`. `Ok(false)` when no such sender exists.
    async fn set_max_bitrate(&self, kind: MediaKind, bps: u64) -> Result<bool>;

    async fn close(&self) -> Result<()>;
}

/// Creates one transport per session together with its event stream.
#[async_trait]
pub trait TransportFactory: Send + Sync {
    async fn create(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)>;
}
