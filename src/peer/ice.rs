use crate::config::ServerConfig;
use crate::error::Error;
use crate::peer::transport::PeerTransport;
use crate::peer::types::Candidate;
use crate::utils::add_ice_url_scheme;
use tracing::{debug, warn};
use webrtc::ice_transport::ice_server::RTCIceServer;

/// What happened to a candidate handed to [`CandidateBuffer::offer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateDisposition {
    /// Remote description not set yet
    Buffered,
    Applied,
    /// Addressed to a different peer than the session negotiates with
    Dropped,
}

#[derive(Debug, Default)]
pub struct FlushReport {
    pub applied: usize,
    pub failed: Vec<(Candidate, Error)>,
}

/// Кандидаты, полученные до установки remote description.
///
/// Holds remote candidates in arrival order until the remote description is
/// set, then replays them exactly once.
#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: Vec<Candidate>,
    remote_set: bool,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Drops queued candidates that came from anyone but `peer`. Returns how
    /// many were dropped.
    pub fn retain_from(&mut self, peer: &str) -> usize {
        let before = self.pending.len();
        self.pending.retain(|c| c.target == peer);
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(peer, dropped, "dropped candidates from another peer");
        }
        dropped
    }

    pub async fn offer(
        &mut self,
        candidate: Candidate,
        transport: &dyn PeerTransport,
    ) -> crate::error::Result<CandidateDisposition> {
        if !self.remote_set {
            debug!(
                session = %candidate.target,
                queued = self.pending.len() + 1,
                "remote description not set yet, queuing candidate"
            );
            self.pending.push(candidate);
            return Ok(CandidateDisposition::Buffered);
        }

        transport.add_ice_candidate(&candidate.payload).await?;
        Ok(CandidateDisposition::Applied)
    }

    /// Call right after the remote description is set. Only the first call
    /// applies anything; failures are collected, not fatal.
    pub async fn flush(&mut self, transport: &dyn PeerTransport) -> FlushReport {
        let mut report = FlushReport::default();
        if self.remote_set {
            return report;
        }
        self.remote_set = true;

        for candidate in std::mem::take(&mut self.pending) {
            debug!(session = %candidate.target, "applying pending candidate");
            match transport.add_ice_candidate(&candidate.payload).await {
                Ok(()) => report.applied += 1,
                Err(e) => {
                    warn!(session = %candidate.target, "failed to apply pending candidate: {e}");
                    report.failed.push((candidate, e));
                }
            }
        }
        report
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}

/// Конфигурация ICE серверов для peer connection
pub fn ice_servers(servers: &[ServerConfig]) -> Vec<RTCIceServer> {
    servers
        .iter()
        .map(|config| RTCIceServer {
            urls: vec![add_ice_url_scheme(config)],
            username: config.username.clone().unwrap_or_default(),
            credential: config.credential.clone().unwrap_or_default(),
            ..Default::default()
        })
        .collect()
}
