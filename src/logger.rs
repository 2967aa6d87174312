use crate::config::LoggingConfig;
use crate::peer::types::CandidatePayload;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::peer_connection::RTCPeerConnection;

/// Installs the fmt subscriber. `RUST_LOG` wins over the configured filter.
/// Safe to call more than once; later calls are ignored.
pub fn init(config: &LoggingConfig) {
    if !config.enabled {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.filter.as_str()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, session: &str, cand: &RTCIceCandidate) {
    if let Ok(init) = cand.to_json() {
        debug!(
            session,
            "trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={:?}",
            init.candidate,
            init.sdp_mid,
            init.sdp_mline_index
        );
    }
}

/// Быстрый снимок getStats → выбранная пара
pub async fn dump_selected_pair(pc: &RTCPeerConnection, session: &str, moment: &str) {
    let stats = pc.get_stats().await;
    for (_, v) in stats.reports {
        if let webrtc::stats::StatsReportType::CandidatePair(pair) = v {
            if pair.nominated {
                info!(
                    session,
                    "stats {moment}: {}:{} bytes={}/{} state={:?}",
                    pair.local_candidate_id,
                    pair.remote_candidate_id,
                    pair.bytes_sent,
                    pair.bytes_received,
                    pair.state
                );
            }
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CandidateCensus {
    pub host: usize,
    pub srflx: usize,
    pub relay: usize,
}

pub fn analyze_candidates<'a>(
    session: &str,
    candidates: impl IntoIterator<Item = &'a CandidatePayload>,
) -> CandidateCensus {
    let mut census = CandidateCensus::default();

    for candidate in candidates {
        if candidate.candidate.contains("typ host") {
            census.host += 1;
        } else if candidate.candidate.contains("typ srflx") {
            census.srflx += 1;
        } else if candidate.candidate.contains("typ relay") {
            census.relay += 1;
        }
    }

    debug!(
        session,
        "candidate analysis: {} host, {} srflx, {} relay",
        census.host,
        census.srflx,
        census.relay
    );

    if census.relay == 0 {
        warn!(session, "no TURN relay candidates; connection through NAT may fail");
    }
    census
}
