//! Media capture seam. Device selection lives outside this crate; the host
//! only asks for a stream matching [`CaptureConstraints`].

use crate::peer::types::{MediaKind, OutboundTrack};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use webrtc::api::media_engine::{MIME_TYPE_OPUS, MIME_TYPE_VP8};
use webrtc::media::Sample;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CaptureError {
    #[error("screen sharing is not supported on this platform")]
    UnsupportedPlatform,
    #[error("capture permission denied")]
    PermissionDenied,
    #[error("capture device unavailable: {0}")]
    Device(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Resolution {
    #[default]
    Hd720,
    Hd1080,
    Qhd1440,
    Uhd2160,
}

impl Resolution {
    pub fn dimensions(self) -> (u32, u32) {
        match self {
            Resolution::Hd720 => (1280, 720),
            Resolution::Hd1080 => (1920, 1080),
            Resolution::Qhd1440 => (2560, 1440),
            Resolution::Uhd2160 => (3840, 2160),
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Resolution::Hd720 => "720p",
            Resolution::Hd1080 => "1080p",
            Resolution::Qhd1440 => "2K",
            Resolution::Uhd2160 => "4K",
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (w, h) = self.dimensions();
        write!(f, "{w}x{h}")
    }
}

impl FromStr for Resolution {
    type Err = String;

    /// Accepts `WIDTHxHEIGHT` or a preset label.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let all = [
            Resolution::Hd720,
            Resolution::Hd1080,
            Resolution::Qhd1440,
            Resolution::Uhd2160,
        ];
        all.into_iter()
            .find(|r| r.to_string() == s || r.label().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown resolution {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureConstraints {
    pub ideal_width: u32,
    pub ideal_height: u32,
    pub frame_rate: u32,
    pub audio: bool,
}

impl CaptureConstraints {
    pub fn new(resolution: Resolution, frame_rate: u32) -> Self {
        let (ideal_width, ideal_height) = resolution.dimensions();
        Self {
            ideal_width,
            ideal_height,
            frame_rate,
            audio: true,
        }
    }
}

#[async_trait]
pub trait MediaCapture: Send + Sync {
    async fn capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Vec<OutboundTrack>, CaptureError>;

    /// Stops whatever the last `capture` started.
    fn release(&self) {}
}

/// Capture backed by sample-fed tracks: a VP8 video track plus an Opus
/// audio track when requested. Encoded frames are pushed by the caller.
#[derive(Default, Clone)]
pub struct SampleCapture {
    active: Arc<Mutex<Vec<OutboundTrack>>>,
}

impl SampleCapture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a fresh set of tracks without touching the active ones.
    pub fn tracks(&self, constraints: &CaptureConstraints) -> Vec<OutboundTrack> {
        let stream_id = "ssc-screen".to_string();
        let mut tracks = vec![OutboundTrack::new(
            MediaKind::Video,
            Arc::new(TrackLocalStaticSample::new(
                RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_owned(),
                    ..Default::default()
                },
                "video".to_owned(),
                stream_id.clone(),
            )),
        )];

        if constraints.audio {
            tracks.push(OutboundTrack::new(
                MediaKind::Audio,
                Arc::new(TrackLocalStaticSample::new(
                    RTCRtpCodecCapability {
                        mime_type: MIME_TYPE_OPUS.to_owned(),
                        ..Default::default()
                    },
                    "audio".to_owned(),
                    stream_id,
                )),
            ));
        }
        tracks
    }

    pub fn active(&self) -> Vec<OutboundTrack> {
        self.active.lock().clone()
    }

    /// Writes one encoded frame to every active track of `kind`. Tracks whose
    /// bitrate cap the frame would exceed skip it. Returns how many tracks
    /// took the frame.
    pub async fn push(&self, kind: MediaKind, data: Bytes, duration: Duration) -> crate::error::Result<usize> {
        let tracks: Vec<OutboundTrack> = self
            .active
            .lock()
            .iter()
            .filter(|t| t.kind == kind)
            .cloned()
            .collect();

        let mut written = 0;
        for track in tracks {
            if !track.within_bitrate(data.len(), duration) {
                debug!(
                    track = track.id(),
                    cap = track.max_bitrate(),
                    "frame of {} bytes over the bitrate cap, dropped",
                    data.len()
                );
                continue;
            }
            track
                .track
                .write_sample(&Sample {
                    data: data.clone(),
                    duration,
                    ..Default::default()
                })
                .await?;
            written += 1;
        }
        Ok(written)
    }

    pub fn stop(&self) {
        self.active.lock().clear();
    }
}

#[async_trait]
impl MediaCapture for SampleCapture {
    async fn capture(
        &self,
        constraints: &CaptureConstraints,
    ) -> Result<Vec<OutboundTrack>, CaptureError> {
        if cfg!(any(target_os = "android", target_os = "ios")) {
            return Err(CaptureError::UnsupportedPlatform);
        }
        let tracks = self.tracks(constraints);
        *self.active.lock() = tracks.clone();
        Ok(tracks)
    }

    fn release(&self) {
        self.stop();
    }
}
