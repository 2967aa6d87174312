#![allow(dead_code)]

use ssc_broadcast::capture::Resolution;
use ssc_broadcast::signaling::{Incoming, LocalRelay, Subscription};
use ssc_broadcast::testing::{FakeCapture, FakeFactory};
use ssc_broadcast::{BroadcastCoordinator, SessionConfig, StatusEmitter};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

pub const HOST_ID: &str = "host-1";
pub const ROOM: &str = "room-1";

pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(3);
    while !check() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub async fn next_event(sub: &mut Subscription) -> Incoming {
    tokio::time::timeout(Duration::from_secs(3), sub.recv())
        .await
        .expect("timed out waiting for a signaling event")
        .expect("subscription closed")
}

/// Skips events until one matches.
pub async fn wait_for_event(sub: &mut Subscription, mut matches: impl FnMut(&Incoming) -> bool) -> Incoming {
    loop {
        let event = next_event(sub).await;
        if matches(&event) {
            return event;
        }
    }
}

pub struct HostFixture {
    pub relay: LocalRelay,
    pub factory: FakeFactory,
    pub capture: FakeCapture,
    pub host: BroadcastCoordinator,
}

pub async fn sharing_host(config: SessionConfig) -> HostFixture {
    let relay = LocalRelay::new();
    let factory = FakeFactory::new();
    let capture = FakeCapture::new();
    let host = BroadcastCoordinator::new(
        Arc::new(config),
        Arc::new(relay.connect_as(HOST_ID)),
        Arc::new(factory.clone()),
        Arc::new(capture.clone()),
        StatusEmitter::new(),
    );
    host.start_sharing(ROOM, None, Resolution::Hd720)
        .await
        .expect("start sharing");
    HostFixture {
        relay,
        factory,
        capture,
        host,
    }
}
