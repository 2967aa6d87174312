use crate::error::{Error, Result};
use crate::peer::ice::{CandidateBuffer, CandidateDisposition, FlushReport};
use crate::peer::sdp::CodecFilter;
use crate::peer::state::NegotiationState;
use crate::peer::transport::PeerTransport;
use crate::peer::types::{
    Candidate, EncodingParameters, MediaKind, OutboundTrack, Role, SessionDescriptor,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One offer/answer negotiation over one peer transport.
///
/// Every method runs one transition to completion. State only advances after
/// the step that justifies it succeeded, so a failed step leaves the session
/// at the last step that was committed. For `accept_offer` that can be
/// `offer-received` when the answer cannot be created. `cancelled` is flipped from outside when a close is queued;
/// steps re-check it after each suspension point and drop their results.
pub struct ConnectionSession {
    id: String,
    role: Role,
    state: NegotiationState,
    local: Option<SessionDescriptor>,
    remote: Option<SessionDescriptor>,
    /// Peer the viewer negotiates with, learned from the offer
    remote_peer: Option<String>,
    candidates: CandidateBuffer,
    tracks: Vec<OutboundTrack>,
    encoding: EncodingParameters,
    filter: CodecFilter,
    transport: Arc<dyn PeerTransport>,
    cancelled: Arc<AtomicBool>,
}

impl ConnectionSession {
    pub fn new(
        id: impl Into<String>,
        role: Role,
        transport: Arc<dyn PeerTransport>,
        filter: CodecFilter,
        encoding: EncodingParameters,
        cancelled: Arc<AtomicBool>,
    ) -> Self {
        Self {
            id: id.into(),
            role,
            state: NegotiationState::Idle,
            local: None,
            remote: None,
            remote_peer: None,
            candidates: CandidateBuffer::new(),
            tracks: Vec::new(),
            encoding,
            filter,
            transport,
            cancelled,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> NegotiationState {
        self.state
    }

    pub fn local_description(&self) -> Option<&SessionDescriptor> {
        self.local.as_ref()
    }

    pub fn remote_description(&self) -> Option<&SessionDescriptor> {
        self.remote.as_ref()
    }

    pub fn remote_peer(&self) -> Option<&str> {
        self.remote_peer.as_deref()
    }

    pub fn buffered_candidates(&self) -> usize {
        self.candidates.len()
    }

    pub fn tracks(&self) -> &[OutboundTrack] {
        &self.tracks
    }

    pub fn encoding(&self) -> EncodingParameters {
        self.encoding
    }

    fn ensure_live(&self) -> Result<()> {
        if self.state.is_closed() || self.cancelled.load(Ordering::SeqCst) {
            return Err(Error::SessionClosed(self.id.clone()));
        }
        Ok(())
    }

    fn require(&self, action: &'static str, role: Role, state: NegotiationState) -> Result<()> {
        self.ensure_live()?;
        if self.role != role || self.state != state {
            return Err(Error::NegotiationState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }

    /// Host `idle → offer-sent`. Returns the filtered offer to transmit; the
    /// caller sends it and then calls [`cap_video_bitrate`](Self::cap_video_bitrate).
    pub async fn start_offer(&mut self, tracks: Vec<OutboundTrack>) -> Result<SessionDescriptor> {
        self.require("create an offer", Role::Host, NegotiationState::Idle)?;

        for track in &tracks {
            self.transport.add_track(track).await?;
        }
        self.tracks = tracks;

        let raw = self.transport.create_offer().await?;
        self.ensure_live()?;

        let offer = SessionDescriptor::offer(self.filter.apply(&raw), self.id.clone());
        self.transport.set_local_description(&offer).await?;
        self.ensure_live()?;

        self.local = Some(offer.clone());
        self.state = NegotiationState::OfferSent;
        info!(session = %self.id, "offer created");
        Ok(offer)
    }

    /// Applies the configured ceiling to the outbound video sender.
    /// Returns `false` when there is no video sender.
    pub async fn cap_video_bitrate(&self) -> Result<bool> {
        self.ensure_live()?;
        let bps = self.encoding.max_bitrate_bps;
        let capped = self.transport.set_max_bitrate(MediaKind::Video, bps).await?;
        if !capped {
            debug!(session = %self.id, "no video sender, bitrate cap skipped");
        }
        Ok(capped)
    }

    /// Viewer `idle → offer-received → answer-pending`. Returns the answer to
    /// send back to `from`.
    pub async fn accept_offer(
        &mut self,
        from: &str,
        offer: SessionDescriptor,
    ) -> Result<SessionDescriptor> {
        self.require("accept an offer", Role::Viewer, NegotiationState::Idle)?;

        self.transport.set_remote_description(&offer).await?;
        self.ensure_live()?;
        self.remote = Some(offer);
        self.remote_peer = Some(from.to_string());
        self.state = NegotiationState::OfferReceived;

        // queued before the offer, so the sender was never checked
        self.candidates.retain_from(from);
        let report = self.flush_candidates().await;
        self.report_flush(&report);

        let raw = self.transport.create_answer().await?;
        self.ensure_live()?;
        let answer = SessionDescriptor::answer(raw, from);
        self.transport.set_local_description(&answer).await?;
        self.ensure_live()?;

        self.local = Some(answer.clone());
        self.state = NegotiationState::AnswerPending;
        info!(session = %self.id, peer = from, "answer created");
        Ok(answer)
    }

    /// Host side: applies the viewer's answer and flushes buffered candidates.
    pub async fn accept_answer(&mut self, answer: SessionDescriptor) -> Result<FlushReport> {
        self.require("accept an answer", Role::Host, NegotiationState::OfferSent)?;
        if self.remote.is_some() {
            return Err(Error::NegotiationState {
                action: "accept a second answer",
                state: self.state,
            });
        }

        self.transport.set_remote_description(&answer).await?;
        self.ensure_live()?;
        self.remote = Some(answer);

        let report = self.flush_candidates().await;
        self.report_flush(&report);
        info!(session = %self.id, "answer applied");
        Ok(report)
    }

    async fn flush_candidates(&mut self) -> FlushReport {
        self.candidates.flush(self.transport.as_ref()).await
    }

    fn report_flush(&self, report: &FlushReport) {
        if report.applied > 0 || !report.failed.is_empty() {
            debug!(
                session = %self.id,
                applied = report.applied,
                failed = report.failed.len(),
                "flushed buffered candidates"
            );
        }
    }

    /// Routes a remote candidate through the buffer. `from` is checked
    /// against the peer learned from the offer, so candidates meant for an
    /// earlier negotiation never reach this transport.
    pub async fn add_remote_candidate(
        &mut self,
        from: &str,
        candidate: Candidate,
    ) -> Result<CandidateDisposition> {
        self.ensure_live()?;
        if let Some(peer) = &self.remote_peer {
            if peer != from {
                debug!(session = %self.id, from, "candidate from a different peer dropped");
                return Ok(CandidateDisposition::Dropped);
            }
        }
        self.candidates
            .offer(candidate, self.transport.as_ref())
            .await
    }

    /// Transport readiness; purely observational.
    pub fn mark_connected(&mut self) -> bool {
        if self.state.is_closed() || self.state == NegotiationState::Connected {
            return false;
        }
        self.state = NegotiationState::Connected;
        info!(session = %self.id, "connected");
        true
    }

    /// Idempotent. Releases the transport first, then the candidate buffer.
    pub async fn close(&mut self) {
        if self.state.is_closed() {
            return;
        }
        self.cancelled.store(true, Ordering::SeqCst);
        self.state = NegotiationState::Closed;

        if let Err(e) = self.transport.close().await {
            warn!(session = %self.id, "transport close failed: {e}");
        }
        self.candidates.clear();
        info!(session = %self.id, "closed");
    }
}
