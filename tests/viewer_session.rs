mod common;

use common::{eventually, next_event, wait_for_event, HOST_ID, ROOM};
use ssc_broadcast::peer::{
    CandidatePayload, MediaKind, NegotiationState, RemoteTrack, SdpKind, SdpPayload,
    TransportEvent, TransportState,
};
use ssc_broadcast::signaling::{Incoming, LocalRelay, Outgoing, RelayClient, RoomRequest, SignalingChannel, Subscription};
use ssc_broadcast::testing::{FakeFactory, RecordingSink, SinkCall, TransportCall, SAMPLE_OFFER};
use ssc_broadcast::{SessionConfig, StatusEmitter, StatusEvent, ViewerSessionManager, ViewerStatus};
use std::sync::Arc;
use std::time::Duration;

const VIEWER_ID: &str = "viewer-1";

struct Fixture {
    relay: LocalRelay,
    host: RelayClient,
    host_events: Subscription,
    factory: FakeFactory,
    sink: RecordingSink,
    status: StatusEmitter,
    viewer: ViewerSessionManager,
}

async fn fixture() -> Fixture {
    let relay = LocalRelay::new();
    let host = relay.connect_as(HOST_ID);
    let mut host_events = host.subscribe();
    host.emit(Outgoing::CreateRoom(RoomRequest::new(ROOM, None)))
        .unwrap();
    assert_eq!(next_event(&mut host_events).await, Incoming::UpdateViewers(vec![]));

    let factory = FakeFactory::new();
    let sink = RecordingSink::new();
    let status = StatusEmitter::new();
    let viewer = ViewerSessionManager::new(
        Arc::new(SessionConfig::default()),
        Arc::new(relay.connect_as(VIEWER_ID)),
        Arc::new(factory.clone()),
        Arc::new(sink.clone()),
        status.clone(),
    );
    Fixture {
        relay,
        host,
        host_events,
        factory,
        sink,
        status,
        viewer,
    }
}

fn send_offer(host: &RelayClient) {
    host.emit(Outgoing::Offer {
        target_id: VIEWER_ID.into(),
        sdp: SdpPayload {
            sdp: SAMPLE_OFFER.into(),
            kind: SdpKind::Offer,
        },
    })
    .unwrap();
}

fn send_candidate(host: &RelayClient, c: &str) {
    host.emit(Outgoing::IceCandidate {
        target_id: VIEWER_ID.into(),
        candidate: CandidatePayload::new(c),
    })
    .unwrap();
}

#[tokio::test]
async fn offer_is_answered_to_its_sender() {
    let mut f = fixture().await;
    f.viewer.join_room(ROOM, None).await.unwrap();
    assert_eq!(
        next_event(&mut f.host_events).await,
        Incoming::ViewerJoined(VIEWER_ID.into())
    );

    send_offer(&f.host);
    let answer = wait_for_event(&mut f.host_events, |e| matches!(e, Incoming::Answer { .. })).await;
    let Incoming::Answer { from, sdp } = answer else {
        unreachable!();
    };
    assert_eq!(from, VIEWER_ID);
    assert_eq!(sdp.kind, SdpKind::Answer);

    let session = f.viewer.session().unwrap();
    session.wait_for(NegotiationState::AnswerPending).await.unwrap();
    assert!(!f.relay.room(ROOM).unwrap().viewers.is_empty());
}

#[tokio::test]
async fn early_candidates_apply_after_the_offer_in_arrival_order() {
    let mut f = fixture().await;
    f.viewer.join_room(ROOM, None).await.unwrap();
    next_event(&mut f.host_events).await;

    send_candidate(&f.host, "c1");
    send_candidate(&f.host, "c2");
    send_offer(&f.host);
    send_candidate(&f.host, "c3");

    eventually("transport", || f.factory.latest("host").is_some()).await;
    let transport = f.factory.latest("host").unwrap().transport;
    eventually("three candidates", || transport.applied_candidates().len() == 3).await;
    assert_eq!(transport.applied_candidates(), vec!["c1", "c2", "c3"]);

    let calls = transport.calls();
    let remote_at = calls
        .iter()
        .position(|c| matches!(c, TransportCall::SetRemote(SdpKind::Offer, _)))
        .unwrap();
    let answer_at = calls
        .iter()
        .position(|c| *c == TransportCall::CreateAnswer)
        .unwrap();
    let applied: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, TransportCall::AddIceCandidate(_)))
        .map(|(i, _)| i)
        .collect();
    assert!(remote_at < applied[0]);
    // buffered ones land before the answer is created
    assert!(applied[1] < answer_at);
}

#[tokio::test]
async fn rejoin_discards_traffic_meant_for_the_old_session() {
    let mut f = fixture().await;
    f.viewer.join_room(ROOM, None).await.unwrap();
    next_event(&mut f.host_events).await;
    send_offer(&f.host);
    let old = f.viewer.session().unwrap();
    old.wait_for(NegotiationState::AnswerPending).await.unwrap();

    send_candidate(&f.host, "late");
    f.viewer.join_room(ROOM, None).await.unwrap();

    let fresh = f.viewer.session().unwrap();
    assert_ne!(old.generation(), fresh.generation());
    assert!(old.is_closed());

    tokio::time::sleep(Duration::from_millis(50)).await;
    let created = f.factory.for_session("host");
    assert_eq!(created.len(), 2);
    assert!(created[0].transport.is_closed());
    for c in &created {
        assert!(!c.transport.applied_candidates().contains(&"late".to_string()));
    }
    assert_eq!(fresh.state(), NegotiationState::Idle);
}

#[tokio::test]
async fn candidates_from_another_peer_are_ignored() {
    let mut f = fixture().await;
    f.viewer.join_room(ROOM, None).await.unwrap();
    next_event(&mut f.host_events).await;
    send_offer(&f.host);
    f.viewer
        .session()
        .unwrap()
        .wait_for(NegotiationState::AnswerPending)
        .await
        .unwrap();

    let stranger = f.relay.connect_as("stranger");
    stranger
        .emit(Outgoing::IceCandidate {
            target_id: VIEWER_ID.into(),
            candidate: CandidatePayload::new("foreign"),
        })
        .unwrap();
    send_candidate(&f.host, "mine");

    let transport = f.factory.latest("host").unwrap().transport;
    eventually("own candidate", || !transport.applied_candidates().is_empty()).await;
    assert_eq!(transport.applied_candidates(), vec!["mine"]);
}

#[tokio::test]
async fn host_stop_closes_once_and_detaches_the_sink() {
    let f = fixture().await;
    let mut status = f.status.subscribe();
    f.viewer.join_room(ROOM, None).await.unwrap();
    send_offer(&f.host);
    let session = f.viewer.session().unwrap();
    session.wait_for(NegotiationState::AnswerPending).await.unwrap();

    f.host.emit(Outgoing::HostStopped).unwrap();
    session.wait_for(NegotiationState::Closed).await.unwrap();
    eventually("stopped", || f.viewer.status() == ViewerStatus::Stopped).await;

    assert_eq!(f.sink.calls(), vec![SinkCall::Detach]);
    assert!(f.factory.latest("host").unwrap().transport.is_closed());

    let mut stops = 0;
    while let Ok(event) = status.try_recv() {
        if event == StatusEvent::HostStopped {
            stops += 1;
        }
    }
    assert_eq!(stops, 1);
}

#[tokio::test]
async fn host_disconnect_is_an_error_and_retry_starts_fresh() {
    let f = fixture().await;
    f.viewer.join_room(ROOM, None).await.unwrap();
    let first = f.viewer.session().unwrap();

    f.host.disconnect();
    first.wait_for(NegotiationState::Closed).await.unwrap();
    eventually("error status", || {
        f.viewer.status() == ViewerStatus::Error("Host disconnected.".into())
    })
    .await;

    // room is gone, so the retry ends in a server error
    let mut status = f.status.subscribe();
    f.viewer.retry().await.unwrap();
    let second = f.viewer.session().unwrap();
    assert_ne!(first.generation(), second.generation());
    assert_eq!(
        status.recv().await.unwrap(),
        StatusEvent::Joining { room_id: ROOM.into() }
    );
    assert_eq!(
        status.recv().await.unwrap(),
        StatusEvent::ServerError("Room does not exist.".into())
    );
    assert!(!second.is_closed());
}

#[tokio::test]
async fn room_switch_ignores_candidates_from_the_previous_host() {
    let mut f = fixture().await;
    let other = f.relay.connect_as("host-2");
    other
        .emit(Outgoing::CreateRoom(RoomRequest::new("room-2", None)))
        .unwrap();

    f.viewer.join_room(ROOM, None).await.unwrap();
    next_event(&mut f.host_events).await;
    send_offer(&f.host);
    let first = f.viewer.session().unwrap();
    first.wait_for(NegotiationState::AnswerPending).await.unwrap();

    f.viewer.join_room("room-2", None).await.unwrap();
    let second = f.viewer.session().unwrap();
    // the old host is still trickling before it sees viewer-left
    send_candidate(&f.host, "stale-from-1");
    other
        .emit(Outgoing::IceCandidate {
            target_id: VIEWER_ID.into(),
            candidate: CandidatePayload::new("fresh-from-2"),
        })
        .unwrap();
    other
        .emit(Outgoing::Offer {
            target_id: VIEWER_ID.into(),
            sdp: SdpPayload {
                sdp: SAMPLE_OFFER.into(),
                kind: SdpKind::Offer,
            },
        })
        .unwrap();
    second.wait_for(NegotiationState::AnswerPending).await.unwrap();

    let created = f.factory.for_session("host");
    assert_eq!(created.len(), 2);
    assert_eq!(created[1].transport.applied_candidates(), vec!["fresh-from-2"]);
    assert!(created[0].transport.is_closed());
}

#[tokio::test]
async fn server_error_mid_session_keeps_the_session_open() {
    let f = fixture().await;
    let mut status = f.status.subscribe();
    f.viewer.join_room(ROOM, None).await.unwrap();
    send_offer(&f.host);
    let session = f.viewer.session().unwrap();
    session.wait_for(NegotiationState::AnswerPending).await.unwrap();

    // a second join attempt with a bad room id bounces off the relay
    f.relay
        .connect_as(VIEWER_ID)
        .emit(Outgoing::JoinRoom(RoomRequest::new("missing", None)))
        .unwrap();
    let message = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let StatusEvent::ServerError(message) = status.recv().await.unwrap() {
                return message;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(message, "Room does not exist.");
    assert_eq!(f.viewer.status(), ViewerStatus::Error(message));

    assert_eq!(session.state(), NegotiationState::AnswerPending);
    assert!(!f.factory.latest("host").unwrap().transport.is_closed());
    send_candidate(&f.host, "after-error");
    let transport = f.factory.latest("host").unwrap().transport;
    eventually("candidate after error", || {
        transport.applied_candidates() == vec!["after-error"]
    })
    .await;
}

#[tokio::test]
async fn wrong_password_is_reported() {
    let relay = LocalRelay::new();
    let host = relay.connect_as(HOST_ID);
    host.emit(Outgoing::CreateRoom(RoomRequest::new(ROOM, Some("secret".into()))))
        .unwrap();

    let viewer = ViewerSessionManager::new(
        Arc::new(SessionConfig::default()),
        Arc::new(relay.connect_as(VIEWER_ID)),
        Arc::new(FakeFactory::new()),
        Arc::new(RecordingSink::new()),
        StatusEmitter::new(),
    );
    viewer.join_room(ROOM, Some("guess".into())).await.unwrap();
    eventually("password error", || {
        viewer.status() == ViewerStatus::Error("Incorrect password.".into())
    })
    .await;
}

#[tokio::test]
async fn arriving_track_is_attached_and_connection_means_watching() {
    let f = fixture().await;
    let mut status = f.status.subscribe();
    f.viewer.join_room(ROOM, None).await.unwrap();
    send_offer(&f.host);
    let session = f.viewer.session().unwrap();
    session.wait_for(NegotiationState::AnswerPending).await.unwrap();

    let track = RemoteTrack {
        id: "video".into(),
        stream_id: "ssc-screen".into(),
        kind: MediaKind::Video,
    };
    let created = f.factory.latest("host").unwrap();
    created
        .events
        .send(TransportEvent::TrackArrived(track.clone()))
        .unwrap();
    created
        .events
        .send(TransportEvent::StateChanged(TransportState::Connected))
        .unwrap();

    session.wait_for(NegotiationState::Connected).await.unwrap();
    assert_eq!(f.sink.calls(), vec![SinkCall::Attach(track)]);
    assert_eq!(
        f.viewer.status(),
        ViewerStatus::Watching { room_id: ROOM.into() }
    );

    let mut attached = false;
    while let Ok(event) = status.try_recv() {
        attached |= matches!(event, StatusEvent::StreamAttached { .. });
    }
    assert!(attached);
}

#[tokio::test]
async fn playback_failure_is_surfaced() {
    let f = fixture().await;
    f.sink.fail_playback();
    let mut status = f.status.subscribe();
    f.viewer.join_room(ROOM, None).await.unwrap();
    send_offer(&f.host);
    let session = f.viewer.session().unwrap();
    session.wait_for(NegotiationState::AnswerPending).await.unwrap();

    f.factory
        .latest("host")
        .unwrap()
        .events
        .send(TransportEvent::TrackArrived(RemoteTrack {
            id: "video".into(),
            stream_id: "ssc-screen".into(),
            kind: MediaKind::Video,
        }))
        .unwrap();

    let failed = tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            if let StatusEvent::PlaybackFailed { message } = status.recv().await.unwrap() {
                return message;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(failed, "playback failed: video playback failed");
}
