pub mod connection;
pub mod ice;
pub mod sdp;
pub mod state;
pub mod transport;
pub mod types;

pub use connection::{WebRtcFactory, WebRtcTransport};
pub use ice::{CandidateBuffer, CandidateDisposition, FlushReport};
pub use sdp::CodecFilter;
pub use state::NegotiationState;
pub use transport::{PeerTransport, TransportEvent, TransportFactory, TransportState};
pub use types::{
    Candidate, CandidatePayload, MediaKind, OutboundTrack, RemoteTrack, Role, SdpKind,
    SdpPayload, SessionDescriptor,
};
