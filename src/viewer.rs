//! Viewer side: one inbound session toward the room host.

use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::peer::state::NegotiationState;
use crate::peer::transport::TransportFactory;
use crate::peer::types::{
    Candidate, EncodingParameters, RemoteTrack, Role, SessionDescriptor, HOST_SESSION_ID,
};
use crate::session::{SessionContext, SessionHandle};
use crate::signaling::relay::ERR_ROOM_REQUIRED;
use crate::signaling::{Incoming, Outgoing, RoomRequest, SignalingChannel, Subscription};
use crate::status::{StatusEmitter, StatusEvent};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const HOST_DISCONNECTED: &str = "Host disconnected.";

/// Where remote media ends up, e.g. a video element or a decoder.
pub trait MediaSink: Send + Sync {
    fn attach(&self, track: &RemoteTrack) -> Result<()>;
    fn detach(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerStatus {
    Idle,
    Joining { room_id: String },
    Watching { room_id: String },
    /// Host ended the broadcast
    Stopped,
    Error(String),
}

struct Listener {
    active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl Listener {
    fn stop(self) {
        self.active.store(false, Ordering::SeqCst);
        self.task.abort();
    }
}

struct Inner {
    ctx: SessionContext,
    session: Mutex<Option<SessionHandle>>,
    listener: Mutex<Option<Listener>>,
    status: Mutex<ViewerStatus>,
    last_room: Mutex<Option<RoomRequest>>,
}

impl Inner {
    fn set_status(&self, status: ViewerStatus) {
        *self.status.lock() = status;
    }
}

#[derive(Clone)]
pub struct ViewerSessionManager {
    inner: Arc<Inner>,
}

impl ViewerSessionManager {
    pub fn new(
        config: Arc<SessionConfig>,
        signaling: Arc<dyn SignalingChannel>,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn MediaSink>,
        status: StatusEmitter,
    ) -> Self {
        let encoding = EncodingParameters {
            max_bitrate_bps: config.max_bitrate_bps,
            ideal_width: 0,
            ideal_height: 0,
            frame_rate: config.frame_rate,
        };
        let ctx = SessionContext {
            config,
            factory,
            signaling,
            status,
            sink: Some(sink),
            encoding,
        };

        Self {
            inner: Arc::new(Inner {
                ctx,
                session: Mutex::new(None),
                listener: Mutex::new(None),
                status: Mutex::new(ViewerStatus::Idle),
                last_room: Mutex::new(None),
            }),
        }
    }

    pub fn session(&self) -> Option<SessionHandle> {
        self.inner.session.lock().clone()
    }

    pub fn status(&self) -> ViewerStatus {
        let status = self.inner.status.lock().clone();
        match status {
            ViewerStatus::Joining { room_id }
                if self.session().map(|s| s.state()) == Some(NegotiationState::Connected) =>
            {
                ViewerStatus::Watching { room_id }
            }
            other => other,
        }
    }

    /// Drops the current session and listener, then joins `room_id` with a
    /// fresh subscription and a fresh idle session.
    pub async fn join_room(&self, room_id: &str, password: Option<String>) -> Result<()> {
        let room_id = room_id.trim();
        if room_id.is_empty() {
            return Err(Error::Room(ERR_ROOM_REQUIRED.into()));
        }
        self.teardown().await;

        let request = RoomRequest::new(room_id, password);
        let subscription = self.inner.ctx.signaling.subscribe();
        self.inner
            .ctx
            .signaling
            .emit(Outgoing::JoinRoom(request.clone()))?;

        let session = SessionHandle::spawn(HOST_SESSION_ID, Role::Viewer, self.inner.ctx.clone());
        let active = Arc::new(AtomicBool::new(true));
        let task = tokio::spawn(listen(
            Arc::downgrade(&self.inner),
            subscription,
            session.clone(),
            active.clone(),
        ));

        *self.inner.session.lock() = Some(session);
        *self.inner.listener.lock() = Some(Listener { active, task });
        *self.inner.last_room.lock() = Some(request);
        self.inner.set_status(ViewerStatus::Joining {
            room_id: room_id.to_string(),
        });

        info!(room = room_id, "joining");
        self.inner.ctx.status.emit(StatusEvent::Joining {
            room_id: room_id.to_string(),
        });
        Ok(())
    }

    /// Closes the session and stops listening. The manager can join again.
    pub async fn leave(&self) {
        self.teardown().await;
        self.inner.set_status(ViewerStatus::Idle);
    }

    /// Joins the last room again with a brand new session.
    pub async fn retry(&self) -> Result<()> {
        let Some(request) = self.inner.last_room.lock().clone() else {
            return Err(Error::Room("nothing to retry".into()));
        };
        info!(room = %request.room_id, "retrying");
        self.join_room(&request.room_id, request.password).await
    }

    async fn teardown(&self) {
        if let Some(listener) = self.inner.listener.lock().take() {
            listener.stop();
        }
        let session = self.inner.session.lock().take();
        if let Some(session) = session {
            session.close().await;
        }
    }
}

enum Outcome {
    Stopped,
    Disconnected,
}

// Слушатель живет ровно одну сессию.
async fn listen(
    inner: Weak<Inner>,
    mut subscription: Subscription,
    session: SessionHandle,
    active: Arc<AtomicBool>,
) {
    let mut outcome = None;

    while let Some(event) = subscription.recv().await {
        if !active.load(Ordering::SeqCst) {
            break;
        }
        match event {
            Incoming::Offer { from, sdp } => {
                let offer = SessionDescriptor::from_payload(sdp, from.clone());
                tokio::spawn(session.accept_offer(from, offer));
            }
            Incoming::IceCandidate { from, candidate } => {
                let candidate = Candidate::received(candidate, from.clone());
                tokio::spawn(session.add_remote_candidate(from, candidate));
            }
            Incoming::HostStopped => {
                outcome = Some(Outcome::Stopped);
                break;
            }
            Incoming::HostDisconnected => {
                outcome = Some(Outcome::Disconnected);
                break;
            }
            // room errors are surfaced, the session stays as it is
            Incoming::ErrorMessage(message) => {
                warn!("server error: {message}");
                if let Some(inner) = inner.upgrade() {
                    inner.set_status(ViewerStatus::Error(message.clone()));
                    inner.ctx.status.emit(StatusEvent::ServerError(message));
                }
            }
            other => debug!("{} ignored on viewer", other.name()),
        }
    }
    subscription.close();

    let Some(outcome) = outcome else {
        return;
    };
    session.close().await;

    let Some(inner) = inner.upgrade() else {
        return;
    };
    if !active.swap(false, Ordering::SeqCst) {
        return;
    }
    match outcome {
        Outcome::Stopped => {
            info!("host stopped the broadcast");
            inner.set_status(ViewerStatus::Stopped);
            inner.ctx.status.emit(StatusEvent::HostStopped);
        }
        Outcome::Disconnected => {
            warn!("viewer session ended: {HOST_DISCONNECTED}");
            inner.ctx.status.emit(StatusEvent::HostDisconnected);
            inner.set_status(ViewerStatus::Error(HOST_DISCONNECTED.into()));
        }
    }
}
