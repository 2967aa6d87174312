//! Loopback demo: one host and a few viewers over the in-process relay.
//!
//! `ssc-demo [viewers] [resolution]`, config from `SSC_CONFIG` if set.

use ssc_broadcast::capture::{Resolution, SampleCapture};
use ssc_broadcast::peer::{RemoteTrack, WebRtcFactory};
use ssc_broadcast::signaling::LocalRelay;
use ssc_broadcast::{
    logger, BroadcastCoordinator, MediaSink, Result, SessionConfig, StatusEmitter, StatusEvent,
    ViewerSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ROOM: &str = "demo";
const CONNECT_WAIT: Duration = Duration::from_secs(15);

struct LogSink(String);

impl MediaSink for LogSink {
    fn attach(&self, track: &RemoteTrack) -> Result<()> {
        info!(viewer = %self.0, "playing {} track {}", track.kind, track.id);
        Ok(())
    }

    fn detach(&self) {
        info!(viewer = %self.0, "sink detached");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = SessionConfig::from_env()?;
    config.validate()?;
    logger::init(&config.logging);

    let mut args = std::env::args().skip(1);
    let viewers: usize = args.next().and_then(|n| n.parse().ok()).unwrap_or(2);
    let resolution: Resolution = match args.next() {
        Some(raw) => raw.parse().map_err(ssc_broadcast::Error::Config)?,
        None => Resolution::default(),
    };

    let config = Arc::new(config);
    let relay = LocalRelay::new();
    let status = StatusEmitter::new();
    let mut events = status.subscribe();

    let host = BroadcastCoordinator::new(
        config.clone(),
        Arc::new(relay.connect_as("host-demo")),
        Arc::new(WebRtcFactory),
        Arc::new(SampleCapture::new()),
        status.clone(),
    );
    host.start_sharing(ROOM, None, resolution).await?;

    let mut managers = Vec::with_capacity(viewers);
    for n in 0..viewers {
        let id = format!("viewer-{n}");
        let viewer = ViewerSessionManager::new(
            config.clone(),
            Arc::new(relay.connect_as(id.clone())),
            Arc::new(WebRtcFactory),
            Arc::new(LogSink(id)),
            status.clone(),
        );
        viewer.join_room(ROOM, None).await?;
        managers.push(viewer);
    }

    // host + viewer side of every pair
    let expected = viewers * 2;
    let mut connected = 0;
    let waited = tokio::time::timeout(CONNECT_WAIT, async {
        while connected < expected {
            match events.recv().await {
                Ok(StatusEvent::SessionConnected { session_id }) => {
                    connected += 1;
                    info!("connected: {session_id} ({connected}/{expected})");
                }
                Ok(StatusEvent::RosterChanged(roster)) => info!("roster: {roster:?}"),
                Ok(other) => info!("status: {other:?}"),
                Err(e) => {
                    warn!("status stream: {e}");
                    break;
                }
            }
        }
    })
    .await;
    if waited.is_err() {
        warn!("only {connected}/{expected} sessions connected in {CONNECT_WAIT:?}");
    }

    host.stop_sharing().await;
    for viewer in &managers {
        info!("viewer status: {:?}", viewer.status());
        viewer.leave().await;
    }
    Ok(())
}
