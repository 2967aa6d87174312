use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::logger::{dump_candidate, dump_selected_pair};
use crate::peer::ice::ice_servers;
use crate::peer::transport::{
    PeerTransport, TransportEvent, TransportEvents, TransportFactory, TransportState,
};
use crate::peer::types::{
    CandidatePayload, MediaKind, OutboundTrack, RemoteTrack, SdpKind, SessionDescriptor,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::{RTCIceCandidate, RTCIceCandidateInit};
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::policy::bundle_policy::RTCBundlePolicy;
use webrtc::peer_connection::policy::rtcp_mux_policy::RTCRtcpMuxPolicy;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_receiver::RTCRtpReceiver;
use webrtc::rtp_transceiver::RTCRtpTransceiver;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

/// Peer transport backed by a webrtc-rs `RTCPeerConnection`.
pub struct WebRtcTransport {
    session_id: String,
    pc: Arc<RTCPeerConnection>,
    tracks: Mutex<Vec<OutboundTrack>>,
}

impl WebRtcTransport {
    /// создаём Peer и подписываемся на его события
    pub async fn new(session_id: &str, config: &SessionConfig) -> Result<(Self, TransportEvents)> {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs()?;

        let mut registry = Registry::new();
        registry = register_default_interceptors(registry, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let pc = Arc::new(api.new_peer_connection(rtc_config(config)).await?);
        let (tx, rx) = mpsc::unbounded_channel();

        attach_handlers(&pc, session_id, tx);

        Ok((
            Self {
                session_id: session_id.to_string(),
                pc,
                tracks: Mutex::new(Vec::new()),
            },
            rx,
        ))
    }
}

/// Создает конфигурацию для peer connection
fn rtc_config(config: &SessionConfig) -> RTCConfiguration {
    RTCConfiguration {
        ice_servers: ice_servers(&config.ice_servers),
        ice_candidate_pool_size: 10,
        bundle_policy: RTCBundlePolicy::MaxBundle,
        rtcp_mux_policy: RTCRtcpMuxPolicy::Require,
        ..Default::default()
    }
}

fn attach_handlers(
    pc: &Arc<RTCPeerConnection>,
    session_id: &str,
    tx: mpsc::UnboundedSender<TransportEvent>,
) {
    let candidate_tx = tx.clone();
    let label = session_id.to_string();
    pc.on_ice_candidate(Box::new(move |cand: Option<RTCIceCandidate>| {
        match cand {
            Some(c) => {
                dump_candidate("LOCAL", &label, &c);
                if let Ok(init) = c.to_json() {
                    let _ = candidate_tx.send(TransportEvent::LocalCandidate(CandidatePayload {
                        candidate: init.candidate,
                        sdp_mid: init.sdp_mid,
                        sdp_mline_index: init.sdp_mline_index,
                        username_fragment: init.username_fragment,
                    }));
                }
            }
            // cand == None означает конец сбора
            None => {
                let _ = candidate_tx.send(TransportEvent::GatheringComplete);
            }
        }
        Box::pin(async {})
    }));

    let label = session_id.to_string();
    pc.on_ice_gathering_state_change(Box::new(move |state| {
        debug!(session = %label, "ICE gathering state changed to: {:?}", state);
        Box::pin(async {})
    }));

    let state_tx = tx.clone();
    let label = session_id.to_string();
    let pc_stats = Arc::downgrade(pc);
    pc.on_peer_connection_state_change(Box::new(move |st: RTCPeerConnectionState| {
        info!(session = %label, "peer connection state changed to: {:?}", st);

        let mapped = match st {
            RTCPeerConnectionState::Connected => Some(TransportState::Connected),
            RTCPeerConnectionState::Connecting => Some(TransportState::Connecting),
            RTCPeerConnectionState::Disconnected => Some(TransportState::Disconnected),
            RTCPeerConnectionState::Failed => Some(TransportState::Failed),
            RTCPeerConnectionState::Closed => Some(TransportState::Closed),
            _ => None,
        };

        if matches!(st, RTCPeerConnectionState::Failed | RTCPeerConnectionState::Connected) {
            if let Some(pc) = pc_stats.upgrade() {
                let label = label.clone();
                let moment = if st == RTCPeerConnectionState::Failed {
                    "BEFORE-FAIL"
                } else {
                    "CONNECTED"
                };
                tokio::spawn(async move {
                    dump_selected_pair(&pc, &label, moment).await;
                });
            }
        }

        if let Some(state) = mapped {
            let _ = state_tx.send(TransportEvent::StateChanged(state));
        }
        Box::pin(async {})
    }));

    let track_tx = tx;
    pc.on_track(Box::new(
        move |track: Arc<TrackRemote>,
              _receiver: Arc<RTCRtpReceiver>,
              _transceiver: Arc<RTCRtpTransceiver>| {
            let _ = track_tx.send(TransportEvent::TrackArrived(RemoteTrack {
                id: track.id(),
                stream_id: track.stream_id(),
                kind: MediaKind::from(track.kind()),
            }));
            Box::pin(async {})
        },
    ));
}

fn to_rtc(descriptor: &SessionDescriptor) -> Result<RTCSessionDescription> {
    let desc = match descriptor.kind {
        SdpKind::Offer => RTCSessionDescription::offer(descriptor.sdp.clone()),
        SdpKind::Answer => RTCSessionDescription::answer(descriptor.sdp.clone()),
    };
    desc.map_err(|e| Error::Descriptor(e.to_string()))
}

#[async_trait]
impl PeerTransport for WebRtcTransport {
    async fn add_track(&self, track: &OutboundTrack) -> Result<()> {
        let local: Arc<dyn TrackLocal + Send + Sync> = track.track.clone();
        self.pc.add_track(local).await?;
        self.tracks.lock().push(track.clone());
        Ok(())
    }

    async fn create_offer(&self) -> Result<String> {
        Ok(self.pc.create_offer(None).await?.sdp)
    }

    async fn create_answer(&self) -> Result<String> {
        Ok(self.pc.create_answer(None).await?.sdp)
    }

    async fn set_local_description(&self, descriptor: &SessionDescriptor) -> Result<()> {
        self.pc.set_local_description(to_rtc(descriptor)?).await?;
        Ok(())
    }

    async fn set_remote_description(&self, descriptor: &SessionDescriptor) -> Result<()> {
        self.pc.set_remote_description(to_rtc(descriptor)?).await?;
        Ok(())
    }

    async fn add_ice_candidate(&self, candidate: &CandidatePayload) -> Result<()> {
        let init = RTCIceCandidateInit {
            candidate: candidate.candidate.clone(),
            sdp_mid: candidate.sdp_mid.clone(),
            sdp_mline_index: candidate.sdp_mline_index,
            username_fragment: candidate.username_fragment.clone(),
        };
        self.pc.add_ice_candidate(init).await?;
        Ok(())
    }

    async fn set_max_bitrate(&self, kind: MediaKind, bps: u64) -> Result<bool> {
        let mut found = false;
        for sender in self.pc.get_senders().await {
            let Some(track) = sender.track().await else {
                continue;
            };
            if MediaKind::from(track.kind()) != kind {
                continue;
            }
            for outbound in self.tracks.lock().iter().filter(|t| t.id() == track.id()) {
                outbound.set_max_bitrate(bps);
                found = true;
            }
        }
        if found {
            debug!(session = %self.session_id, "{kind} sender capped at {bps} bps");
        }
        Ok(found)
    }

    async fn close(&self) -> Result<()> {
        self.pc.close().await?;
        Ok(())
    }
}

/// Builds a fresh `WebRtcTransport` for every session.
#[derive(Debug, Default, Clone, Copy)]
pub struct WebRtcFactory;

#[async_trait]
impl TransportFactory for WebRtcFactory {
    async fn create(
        &self,
        session_id: &str,
        config: &SessionConfig,
    ) -> Result<(Arc<dyn PeerTransport>, TransportEvents)> {
        let (transport, events) = WebRtcTransport::new(session_id, config).await?;
        Ok((Arc::new(transport), events))
    }
}
