use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Identity the viewer uses for its single session with the host.
pub const HOST_SESSION_ID: &str = "host";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Outbound side, one session per viewer
    Host,
    /// Inbound side, one session total
    Viewer,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Viewer => f.write_str("viewer"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SdpKind {
    Offer,
    Answer,
}

/// SDP как он ходит по сигнальному каналу: `{sdp, type}`
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct SdpPayload {
    pub sdp: String,
    #[serde(rename = "type")]
    pub kind: SdpKind,
}

/// Session descriptor bound to the session it is exchanged for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionDescriptor {
    pub kind: SdpKind,
    pub sdp: String,
    pub target: String,
}

impl SessionDescriptor {
    pub fn offer(sdp: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Offer,
            sdp: sdp.into(),
            target: target.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            kind: SdpKind::Answer,
            sdp: sdp.into(),
            target: target.into(),
        }
    }

    pub fn from_payload(payload: SdpPayload, target: impl Into<String>) -> Self {
        Self {
            kind: payload.kind,
            sdp: payload.sdp,
            target: target.into(),
        }
    }

    pub fn to_payload(&self) -> SdpPayload {
        SdpPayload {
            sdp: self.sdp.clone(),
            kind: self.kind,
        }
    }
}

/// ICE кандидат в JSON-форме RTCIceCandidateInit
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CandidatePayload {
    pub candidate: String,
    #[serde(default)]
    pub sdp_mid: Option<String>,
    #[serde(default, rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
    #[serde(default)]
    pub username_fragment: Option<String>,
}

impl CandidatePayload {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: Some("0".into()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }
}

/// Remote candidate queued for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub payload: CandidatePayload,
    pub target: String,
    pub received_at: DateTime<Utc>,
}

impl Candidate {
    pub fn received(payload: CandidatePayload, target: impl Into<String>) -> Self {
        Self {
            payload,
            target: target.into(),
            received_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Audio,
    Video,
}

impl From<RTPCodecType> for MediaKind {
    fn from(kind: RTPCodecType) -> Self {
        match kind {
            RTPCodecType::Audio => MediaKind::Audio,
            _ => MediaKind::Video,
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaKind::Audio => f.write_str("audio"),
            MediaKind::Video => f.write_str("video"),
        }
    }
}

/// Encoding targets for the outbound stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncodingParameters {
    pub max_bitrate_bps: u64,
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub frame_rate: u32,
}

/// Outbound track handed to every host session.
///
/// The bitrate cap is shared: the session writes it once the video sender
/// exists, and whoever feeds `track` has to respect it. `SampleCapture::push`
/// drops frames over the cap; an external encoder should read
/// [`max_bitrate`](Self::max_bitrate) to choose its target rate.
#[derive(Clone)]
pub struct OutboundTrack {
    pub kind: MediaKind,
    pub track: Arc<TrackLocalStaticSample>,
    max_bitrate: Arc<AtomicU64>,
}

impl OutboundTrack {
    pub fn new(kind: MediaKind, track: Arc<TrackLocalStaticSample>) -> Self {
        Self {
            kind,
            track,
            max_bitrate: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn id(&self) -> &str {
        self.track.id()
    }

    pub fn stream_id(&self) -> &str {
        self.track.stream_id()
    }

    /// 0 until a cap is applied
    pub fn max_bitrate(&self) -> u64 {
        self.max_bitrate.load(Ordering::Relaxed)
    }

    pub fn set_max_bitrate(&self, bps: u64) {
        self.max_bitrate.store(bps, Ordering::Relaxed);
    }

    /// Whether a frame of `len` bytes played over `duration` stays within
    /// the cap. Always true while no cap is set.
    pub fn within_bitrate(&self, len: usize, duration: Duration) -> bool {
        let cap = self.max_bitrate();
        if cap == 0 || duration.is_zero() {
            return true;
        }
        let bps = len as u128 * 8 * 1_000_000_000 / duration.as_nanos();
        bps <= u128::from(cap)
    }
}

impl fmt::Debug for OutboundTrack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutboundTrack")
            .field("kind", &self.kind)
            .field("id", &self.id())
            .field("max_bitrate", &self.max_bitrate())
            .finish()
    }
}

/// Remote track announced by the transport on the viewer side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    pub id: String,
    pub stream_id: String,
    pub kind: MediaKind,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_payload_uses_browser_field_names() {
        let raw = r#"{"candidate":"candidate:1 1 udp 1 10.0.0.1 5000 typ host","sdpMid":"0","sdpMLineIndex":0}"#;
        let payload: CandidatePayload = serde_json::from_str(raw).unwrap();
        assert_eq!(payload.sdp_mid.as_deref(), Some("0"));
        assert_eq!(payload.sdp_mline_index, Some(0));
        assert!(payload.username_fragment.is_none());

        let back = serde_json::to_value(&payload).unwrap();
        assert_eq!(back["sdpMLineIndex"], 0);
    }

    fn video_track() -> OutboundTrack {
        OutboundTrack::new(
            MediaKind::Video,
            Arc::new(TrackLocalStaticSample::new(
                Default::default(),
                "video".to_owned(),
                "ssc-screen".to_owned(),
            )),
        )
    }

    #[test]
    fn frames_over_the_cap_are_refused() {
        let track = video_track();
        let frame = Duration::from_millis(40);
        // 25 kB per 40 ms is 5 Mbps
        assert!(track.within_bitrate(50_000, frame));

        track.set_max_bitrate(5_000_000);
        assert!(track.within_bitrate(25_000, frame));
        assert!(!track.within_bitrate(25_001, frame));
        assert!(track.within_bitrate(1, Duration::ZERO));
    }

    #[test]
    fn sdp_payload_type_field() {
        let payload: SdpPayload = serde_json::from_str(r#"{"sdp":"v=0","type":"answer"}"#).unwrap();
        assert_eq!(payload.kind, SdpKind::Answer);
        let desc = SessionDescriptor::from_payload(payload, "v1");
        assert_eq!(desc.target, "v1");
        assert_eq!(desc.to_payload().kind, SdpKind::Answer);
    }
}
