//! Host side: one outbound session per viewer, driven by room events.

use crate::capture::{CaptureConstraints, MediaCapture, Resolution};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::peer::ice::CandidateDisposition;
use crate::peer::state::NegotiationState;
use crate::peer::transport::TransportFactory;
use crate::peer::types::{Candidate, EncodingParameters, OutboundTrack, Role, SessionDescriptor};
use crate::session::{Completion, SessionContext, SessionHandle, SessionRegistry};
use crate::signaling::relay::ERR_ROOM_REQUIRED;
use crate::signaling::{Incoming, Outgoing, RoomRequest, SignalingChannel, Subscription};
use crate::status::{StatusEmitter, StatusEvent};
use futures::future::{self, join_all, BoxFuture, FutureExt, TryFutureExt};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

struct Sharing {
    room_id: String,
    listening: Arc<AtomicBool>,
    listener: JoinHandle<()>,
}

struct Inner {
    config: Arc<SessionConfig>,
    signaling: Arc<dyn SignalingChannel>,
    factory: Arc<dyn TransportFactory>,
    capture: Arc<dyn MediaCapture>,
    status: StatusEmitter,
    registry: SessionRegistry,
    roster: Mutex<Vec<String>>,
    tracks: Mutex<Vec<OutboundTrack>>,
    encoding: Mutex<EncodingParameters>,
    sharing: Mutex<Option<Sharing>>,
}

/// Drives the session registry from room events while sharing.
#[derive(Clone)]
pub struct BroadcastCoordinator {
    inner: Arc<Inner>,
}

impl BroadcastCoordinator {
    pub fn new(
        config: Arc<SessionConfig>,
        signaling: Arc<dyn SignalingChannel>,
        factory: Arc<dyn TransportFactory>,
        capture: Arc<dyn MediaCapture>,
        status: StatusEmitter,
    ) -> Self {
        let (ideal_width, ideal_height) = Resolution::default().dimensions();
        let encoding = EncodingParameters {
            max_bitrate_bps: config.max_bitrate_bps,
            ideal_width,
            ideal_height,
            frame_rate: config.frame_rate,
        };
        Self {
            inner: Arc::new(Inner {
                config,
                signaling,
                factory,
                capture,
                status,
                registry: SessionRegistry::new(),
                roster: Mutex::new(Vec::new()),
                tracks: Mutex::new(Vec::new()),
                encoding: Mutex::new(encoding),
                sharing: Mutex::new(None),
            }),
        }
    }

    fn context(&self) -> SessionContext {
        SessionContext {
            config: self.inner.config.clone(),
            factory: self.inner.factory.clone(),
            signaling: self.inner.signaling.clone(),
            status: self.inner.status.clone(),
            sink: None,
            encoding: *self.inner.encoding.lock(),
        }
    }

    pub fn status(&self) -> &StatusEmitter {
        &self.inner.status
    }

    pub fn room_id(&self) -> Option<String> {
        self.inner.sharing.lock().as_ref().map(|s| s.room_id.clone())
    }

    pub fn is_sharing(&self) -> bool {
        self.inner.sharing.lock().is_some()
    }

    pub fn roster(&self) -> Vec<String> {
        self.inner.roster.lock().clone()
    }

    pub fn session(&self, viewer_id: &str) -> Option<SessionHandle> {
        self.inner.registry.get(viewer_id)
    }

    pub fn session_state(&self, viewer_id: &str) -> Option<NegotiationState> {
        self.session(viewer_id).map(|s| s.state())
    }

    pub fn session_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// Captures media, then opens the room. Nothing is created if capture
    /// fails; the capture error is returned as is.
    pub async fn start_sharing(
        &self,
        room_id: &str,
        password: Option<String>,
        resolution: Resolution,
    ) -> Result<()> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(Error::Room(ERR_ROOM_REQUIRED.into()));
        }
        if self.is_sharing() {
            self.stop_sharing().await;
        }

        let constraints = CaptureConstraints::new(resolution, self.inner.config.frame_rate);
        let tracks = match self.inner.capture.capture(&constraints).await {
            Ok(tracks) => tracks,
            Err(e) => {
                error!("capture failed: {e}");
                self.inner.status.emit(StatusEvent::Error(e.to_string()));
                return Err(e.into());
            }
        };
        info!(room = room_id, "captured {} track(s) at {}", tracks.len(), resolution);

        *self.inner.tracks.lock() = tracks;
        *self.inner.encoding.lock() = EncodingParameters {
            max_bitrate_bps: self.inner.config.max_bitrate_bps,
            ideal_width: constraints.ideal_width,
            ideal_height: constraints.ideal_height,
            frame_rate: constraints.frame_rate,
        };

        let subscription = self.inner.signaling.subscribe();
        let listening = Arc::new(AtomicBool::new(true));
        let listener = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            subscription,
            listening.clone(),
        ));
        *self.inner.sharing.lock() = Some(Sharing {
            room_id: room_id.to_string(),
            listening,
            listener,
        });

        self.inner
            .signaling
            .emit(Outgoing::CreateRoom(RoomRequest::new(room_id, password)))?;
        self.inner.status.emit(StatusEvent::HostingStarted {
            room_id: room_id.to_string(),
        });
        Ok(())
    }

    /// Stops listening, closes every session, tells viewers and releases the
    /// capture. No-op when not sharing.
    pub async fn stop_sharing(&self) {
        let Some(sharing) = self.inner.sharing.lock().take() else {
            return;
        };
        sharing.listening.store(false, Ordering::SeqCst);
        sharing.listener.abort();

        self.on_host_stop().await;
        self.inner.capture.release();
        self.inner.tracks.lock().clear();
        info!(room = %sharing.room_id, "sharing stopped");
        self.inner.status.emit(StatusEvent::HostingStopped);
    }

    /// Routes one signaling event. Registry updates and session commands are
    /// applied before this returns; the completion tracks the session work.
    pub fn dispatch(&self, event: Incoming) -> Completion<()> {
        match event {
            Incoming::ViewerJoined(viewer_id) => self.on_viewer_joined(&viewer_id),
            Incoming::ViewerLeft(viewer_id) => self.on_viewer_left(&viewer_id).map(Ok).boxed(),
            Incoming::Answer { from, sdp } => {
                let answer = SessionDescriptor::from_payload(sdp, from.clone());
                self.on_answer_received(&from, answer)
            }
            Incoming::IceCandidate { from, candidate } => {
                let candidate = Candidate::received(candidate, from.clone());
                self.on_candidate_received(&from, candidate)
                    .map_ok(|_| ())
                    .boxed()
            }
            Incoming::UpdateViewers(viewers) => {
                self.replace_roster(viewers);
                future::ready(Ok(())).boxed()
            }
            Incoming::ErrorMessage(message) => {
                warn!("server error: {message}");
                self.inner.status.emit(StatusEvent::ServerError(message));
                future::ready(Ok(())).boxed()
            }
            other => {
                debug!("{} ignored on host", other.name());
                future::ready(Ok(())).boxed()
            }
        }
    }

    /// Replaces any session for `viewer_id` with a fresh one and starts its
    /// offer.
    pub fn on_viewer_joined(&self, viewer_id: &str) -> Completion<()> {
        let tracks = self.inner.tracks.lock().clone();
        if tracks.is_empty() {
            warn!(viewer = viewer_id, "viewer joined while not sharing");
            return future::ready(Err(Error::Room("not sharing".into()))).boxed();
        }

        let session = SessionHandle::spawn(viewer_id, Role::Host, self.context());
        let displaced = self.inner.registry.replace(session.clone());
        tokio::spawn(forget_when_closed(Arc::downgrade(&self.inner), session.clone()));
        let closing = displaced.map(|old| {
            info!(viewer = viewer_id, "replacing existing session");
            old.close()
        });
        info!(viewer = viewer_id, "viewer joined");

        {
            let mut roster = self.inner.roster.lock();
            if !roster.iter().any(|v| v == viewer_id) {
                roster.push(viewer_id.to_string());
            }
        }
        self.publish_roster();

        let offer = session.start_offer(tracks);
        async move {
            if let Some(closing) = closing {
                closing.await;
            }
            offer.await
        }
        .boxed()
    }

    pub fn on_viewer_left(&self, viewer_id: &str) -> BoxFuture<'static, ()> {
        let removed = self.inner.registry.remove(viewer_id);
        self.inner.roster.lock().retain(|v| v != viewer_id);
        self.publish_roster();

        match removed {
            Some(session) => {
                info!(viewer = viewer_id, "viewer left");
                session.close()
            }
            None => {
                debug!(viewer = viewer_id, "viewer left without a session");
                future::ready(()).boxed()
            }
        }
    }

    /// Answers for viewers without a live session are dropped quietly.
    pub fn on_answer_received(&self, from: &str, answer: SessionDescriptor) -> Completion<()> {
        let Some(session) = self.inner.registry.get(from) else {
            debug!(viewer = from, "answer for unknown session dropped");
            return future::ready(Ok(())).boxed();
        };
        session
            .accept_answer(answer)
            .map_ok(|applied| debug!("answer applied with {applied} buffered candidate(s)"))
            .or_else(|e| future::ready(if e.is_routing() { Ok(()) } else { Err(e) }))
            .boxed()
    }

    pub fn on_candidate_received(
        &self,
        from: &str,
        candidate: Candidate,
    ) -> Completion<CandidateDisposition> {
        let Some(session) = self.inner.registry.get(from) else {
            debug!(viewer = from, "candidate for unknown session dropped");
            return future::ready(Ok(CandidateDisposition::Dropped)).boxed();
        };
        session.add_remote_candidate(from, candidate)
    }

    /// Closes and forgets every session, then tells viewers the host stopped.
    pub fn on_host_stop(&self) -> BoxFuture<'static, ()> {
        let sessions = self.inner.registry.drain();
        let closing: Vec<_> = sessions.iter().map(|s| s.close()).collect();
        info!("host stop: closing {} session(s)", closing.len());

        if let Err(e) = self.inner.signaling.emit(Outgoing::HostStopped) {
            warn!("failed to announce host stop: {e}");
        }
        self.inner.roster.lock().clear();
        self.publish_roster();

        async move {
            join_all(closing).await;
        }
        .boxed()
    }

    fn replace_roster(&self, viewers: Vec<String>) {
        *self.inner.roster.lock() = viewers;
        self.publish_roster();
    }

    fn publish_roster(&self) {
        let roster = self.roster();
        self.inner.status.emit_roster(roster);
    }
}

/// A session can close on its own (timeout, transport failure); drop it from
/// the registry unless something newer already took its slot.
async fn forget_when_closed(inner: Weak<Inner>, session: SessionHandle) {
    let (id, generation) = (session.id().to_string(), session.generation());
    let closed = session.closed();
    drop(session);
    closed.await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    if inner.registry.remove_generation(&id, generation).is_some() {
        debug!(viewer = %id, "closed session dropped from the registry");
    }
}

async fn listen(inner: Weak<Inner>, mut subscription: Subscription, listening: Arc<AtomicBool>) {
    while let Some(event) = subscription.recv().await {
        if !listening.load(Ordering::SeqCst) {
            break;
        }
        let Some(inner) = inner.upgrade() else {
            break;
        };
        let name = event.name();
        let done = BroadcastCoordinator { inner }.dispatch(event);
        tokio::spawn(async move {
            if let Err(e) = done.await {
                debug!("{name} handling ended with: {e}");
            }
        });
    }
    subscription.close();
}
