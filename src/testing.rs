//! In-memory doubles for the transport, capture and sink seams.

use crate::capture::{CaptureConstraints, CaptureError, MediaCapture, SampleCapture};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::peer::transport::{PeerTransport, TransportEvent, TransportEvents, TransportFactory};
use crate::peer::types::{
    CandidatePayload, MediaKind, OutboundTrack, RemoteTrack, SdpKind, SessionDescriptor,
};
use crate::viewer::MediaSink;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Offer shaped like a webrtc-rs default-codec offer.
pub const SAMPLE_OFFER: &str = "v=0\r\n\
o=- 8300867203154316152 2 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
a=group:BUNDLE 0 1\r\n\
m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:0\r\n\
a=rtpmap:111 opus/48000/2\r\n\
a=fmtp:111 minptime=10;useinbandfec=1\r\n\
a=sendonly\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97 98 99 102 103\r\n\
c=IN IP4 0.0.0.0\r\n\
a=mid:1\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtcp-fb:96 nack\r\n\
a=rtcp-fb:96 nack pli\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=rtpmap:98 VP9/90000\r\n\
a=fmtp:98 profile-id=0\r\n\
a=rtpmap:99 rtx/90000\r\n\
a=fmtp:99 apt=98\r\n\
a=rtpmap:102 H264/90000\r\n\
a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n\
a=rtpmap:103 rtx/90000\r\n\
a=fmtp:103 apt=102\r\n\
a=sendonly\r\n";

pub const SAMPLE_ANSWER: &str = "v=0\r\n\
o=- 1 2 IN IP4 0.0.0.0\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\n\
a=rtpmap:96 VP8/90000\r\n\
a=rtpmap:97 rtx/90000\r\n\
a=fmtp:97 apt=96\r\n\
a=recvonly\r\n";

#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    AddTrack(MediaKind),
    CreateOffer,
    CreateAnswer,
    SetLocal(SdpKind, String),
    SetRemote(SdpKind, String),
    AddIceCandidate(CandidatePayload),
    SetMaxBitrate(MediaKind, u64),
    Close,
}

#[derive(Default)]
struct FakeState {
    calls: Vec<TransportCall>,
    kinds: Vec<MediaKind>,
    failing_candidates: HashSet<String>,
    fail_remote: bool,
    fail_offer: bool,
    fail_answer: bool,
    offer_delay: Option<Duration>,
}

/// Records every call in order; fails only where told to.
#[derive(Default, Clone)]
pub struct FakeTransport {
    state: Arc<Mutex<FakeState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<TransportCall> {
        self.state.lock().calls.clone()
    }

    pub fn fail_candidate(&self, candidate: &str) {
        self.state.lock().failing_candidates.insert(candidate.to_string());
    }

    pub fn fail_remote_description(&self) {
        self.state.lock().fail_remote = true;
    }

    pub fn fail_offer(&self) {
        self.state.lock().fail_offer = true;
    }

    pub fn fail_answer(&self) {
        self.state.lock().fail_answer = true;
    }

    /// Makes `create_offer` suspend, leaving room for a close to race it.
    pub fn delay_offer(&self, delay: Duration) {
        self.state.lock().offer_delay = Some(delay);
    }

    pub fn applied_candidates(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                TransportCall::AddIceCandidate(c) => Some(c.candidate),
                _ => None,
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.calls().contains(&TransportCall::Close)
    }

    fn record(&self, call: TransportCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl PeerTransport for FakeTransport {
    async fn add_track(&self, track: &OutboundTrack) -> Result<()> {
        let mut state = self.state.lock();
        state.kinds.push(track.kind);
        state.calls.push(TransportCall::AddTrack(track.kind));
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        self.record(TransportCall::CreateOffer);
        let (fail, delay) = {
            let state = self.state.lock();
            (state.fail_offer, state.offer_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(Error::Transport("offer generation failed".into()));
        }
        Ok(SAMPLE_OFFER.to_string())
    }

    async fn create_answer(&self) -> Result<String> {
        self.record(TransportCall::CreateAnswer);
        if self.state.lock().fail_answer {
            return Err(Error::Transport("answer generation failed".into()));
        }
        Ok(SAMPLE_ANSWER.to_string())
    }

    async fn set_local_description(&self, descriptor: &SessionDescriptor) -> Result<()> {
        self.record(TransportCall::SetLocal(descriptor.kind, descriptor.sdp.clone()));
        Ok(())
    }

    async fn set_remote_description(&self, descriptor: &SessionDescriptor) -> Result<()> {
        if self.state.lock().fail_remote {
            return Err(Error::Descriptor("malformed session description".into()));
        }
        self.record(TransportCall::SetRemote(descriptor.kind, descriptor.sdp.clone()));
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &CandidatePayload) -> Result<()> {
        let fails = self.state.lock().failing_candidates.contains(&candidate.candidate);
        if fails {
            return Err(Error::Transport(format!("rejected {}", candidate.candidate)));
        }
        self.record(TransportCall::AddIceCandidate(candidate.clone()));
        Ok(())
    }

    async fn set_max_bitrate(&self, kind: MediaKind, bps: u64) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.kinds.contains(&kind) {
            return Ok(false);
        }
        state.calls.push(TransportCall::SetMaxBitrate(kind, bps));
        Ok(true)
    }

    async fn close(&self) -> Result<()> {
        self.record(TransportCall::Close);
        Ok(())
    }
}

/// A transport created by [`FakeFactory`], with the sender side of its
/// event stream so tests can inject candidates and state changes.
#[derive(Clone)]
pub struct CreatedTransport {
    pub session_id: String,
    pub transport: FakeTransport,
    pub events: mpsc::UnboundedSender<TransportEvent>,
}

#[derive(Default, Clone)]
pub struct FakeFactory {
    created: Arc<Mutex<Vec<CreatedTransport>>>,
    offer_delay: Arc<Mutex<Option<Duration>>>,
    fail_creation: Arc<Mutex<bool>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn created(&self) -> Vec<CreatedTransport> {
        self.created.lock().clone()
    }

    pub fn for_session(&self, session_id: &str) -> Vec<CreatedTransport> {
        self.created
            .lock()
            .iter()
            .filter(|c| c.session_id == session_id)
            .cloned()
            .collect()
    }

    /// Most recent transport created for `session_id`.
    pub fn latest(&self, session_id: &str) -> Option<CreatedTransport> {
        self.for_session(session_id).pop()
    }

    pub fn delay_offers(&self, delay: Duration) {
        *self.offer_delay.lock() = Some(delay);
    }

    pub fn fail_creation(&self) {
        *self.fail_creation.lock() = true;
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn create(
        &self,
        session_id: &str,
        _config: &SessionConfig,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        if *self.fail_creation.lock() {
            return Err(Error::Transport("peer connection unavailable".into()));
        }

        let transport = FakeTransport::new();
        if let Some(delay) = *self.offer_delay.lock() {
            transport.delay_offer(delay);
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.created.lock().push(CreatedTransport {
            session_id: session_id.to_string(),
            transport: transport.clone(),
            events: tx,
        });
        Ok((Arc::new(transport), rx))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkCall {
    Attach(RemoteTrack),
    Detach,
}

/// Media sink that records attach/detach calls.
#[derive(Default, Clone)]
pub struct RecordingSink {
    calls: Arc<Mutex<Vec<SinkCall>>>,
    fail: Arc<Mutex<bool>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<SinkCall> {
        self.calls.lock().clone()
    }

    pub fn fail_playback(&self) {
        *self.fail.lock() = true;
    }
}

impl MediaSink for RecordingSink {
    fn attach(&self, track: &RemoteTrack) -> Result<()> {
        if *self.fail.lock() {
            return Err(Error::Playback("video playback failed".into()));
        }
        self.calls.lock().push(SinkCall::Attach(track.clone()));
        Ok(())
    }

    fn detach(&self) {
        self.calls.lock().push(SinkCall::Detach);
    }
}

/// Capture that hands out sample tracks, or fails on demand.
#[derive(Default, Clone)]
pub struct FakeCapture {
    fail: Arc<Mutex<Option<CaptureError>>>,
    requests: Arc<Mutex<Vec<CaptureConstraints>>>,
    releases: Arc<Mutex<usize>>,
}

impl FakeCapture {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing(err: CaptureError) -> Self {
        let capture = Self::default();
        *capture.fail.lock() = Some(err);
        capture
    }

    pub fn requests(&self) -> Vec<CaptureConstraints> {
        self.requests.lock().clone()
    }

    pub fn releases(&self) -> usize {
        *self.releases.lock()
    }
}

#[async_trait]
impl MediaCapture for FakeCapture {
    async fn capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> std::result::Result<Vec<OutboundTrack>, CaptureError> {
        self.requests.lock().push(*constraints);
        if let Some(err) = self.fail.lock().clone() {
            return Err(err);
        }
        Ok(SampleCapture::new().tracks(constraints))
    }

    fn release(&self) {
        *self.releases.lock() += 1;
    }
}
