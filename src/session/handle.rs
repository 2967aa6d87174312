use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::logger::analyze_candidates;
use crate::peer::ice::CandidateDisposition;
use crate::peer::sdp::CodecFilter;
use crate::peer::state::NegotiationState;
use crate::peer::transport::{TransportEvent, TransportEvents, TransportFactory, TransportState};
use crate::peer::types::{
    Candidate, CandidatePayload, EncodingParameters, OutboundTrack, Role, SdpKind,
    SessionDescriptor, HOST_SESSION_ID,
};
use crate::session::machine::ConnectionSession;
use crate::signaling::{Outgoing, SignalingChannel};
use crate::status::{StatusEmitter, StatusEvent};
use crate::viewer::MediaSink;
use futures::future::{self, BoxFuture, FutureExt};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

/// Result of a queued session command.
pub type Completion<T> = BoxFuture<'static, Result<T>>;

static GENERATION: AtomicU64 = AtomicU64::new(1);

/// Everything a session actor needs from its owner.
#[derive(Clone)]
pub struct SessionContext {
    pub config: Arc<SessionConfig>,
    pub factory: Arc<dyn TransportFactory>,
    pub signaling: Arc<dyn SignalingChannel>,
    pub status: StatusEmitter,
    pub sink: Option<Arc<dyn MediaSink>>,
    pub encoding: EncodingParameters,
}

enum Command {
    StartOffer {
        tracks: Vec<OutboundTrack>,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoteOffer {
        from: String,
        offer: SessionDescriptor,
        reply: oneshot::Sender<Result<()>>,
    },
    RemoteAnswer {
        answer: SessionDescriptor,
        reply: oneshot::Sender<Result<usize>>,
    },
    RemoteCandidate {
        from: String,
        candidate: Candidate,
        reply: oneshot::Sender<Result<CandidateDisposition>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

/// Handle to a running session actor.
///
/// Commands are queued in call order and each one runs to completion before
/// the next, so one session never interleaves two transitions. Handles are
/// cheap to clone; the owner decides when to close.
#[derive(Clone)]
pub struct SessionHandle {
    id: String,
    role: Role,
    generation: u64,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<NegotiationState>,
    cancelled: Arc<AtomicBool>,
}

impl SessionHandle {
    pub fn spawn(id: impl Into<String>, role: Role, ctx: SessionContext) -> Self {
        let id = id.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(NegotiationState::Idle);
        let cancelled = Arc::new(AtomicBool::new(false));

        let actor = SessionActor {
            id: id.clone(),
            role,
            ctx,
            state: state_tx,
            cancelled: cancelled.clone(),
            gathered: Vec::new(),
        };
        tokio::spawn(actor.run(rx));

        Self {
            id,
            role,
            generation: GENERATION.fetch_add(1, Ordering::Relaxed),
            commands: tx,
            state: state_rx,
            cancelled,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Distinguishes successive sessions for the same peer.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> NegotiationState {
        *self.state.borrow()
    }

    pub fn is_closed(&self) -> bool {
        self.state().is_closed()
    }

    /// Resolves when the session closes for any reason. Holds only the state
    /// receiver, so waiting does not keep the actor alive.
    pub fn closed(&self) -> BoxFuture<'static, ()> {
        let mut rx = self.state.clone();
        async move {
            let _ = rx.wait_for(|s| s.is_closed()).await;
        }
        .boxed()
    }

    /// Resolves once the session reaches `target`; errors if it closes first.
    pub async fn wait_for(&self, target: NegotiationState) -> Result<()> {
        let mut rx = self.state.clone();
        let reached = rx
            .wait_for(|s| *s == target || s.is_closed())
            .await
            .map(|s| *s == target)
            .unwrap_or(false);
        if reached || (target.is_closed() && self.is_closed()) {
            Ok(())
        } else {
            Err(Error::SessionClosed(self.id.clone()))
        }
    }

    fn request<T: Send + 'static>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> Command,
    ) -> Completion<T> {
        let (tx, rx) = oneshot::channel();
        let id = self.id.clone();
        if self.commands.send(make(tx)).is_err() {
            return future::ready(Err(Error::SessionClosed(id))).boxed();
        }
        async move { rx.await.unwrap_or(Err(Error::SessionClosed(id))) }.boxed()
    }

    pub fn start_offer(&self, tracks: Vec<OutboundTrack>) -> Completion<()> {
        self.request(|reply| Command::StartOffer { tracks, reply })
    }

    pub fn accept_offer(&self, from: impl Into<String>, offer: SessionDescriptor) -> Completion<()> {
        let from = from.into();
        self.request(|reply| Command::RemoteOffer { from, offer, reply })
    }

    /// Resolves to the number of buffered candidates applied.
    pub fn accept_answer(&self, answer: SessionDescriptor) -> Completion<usize> {
        self.request(|reply| Command::RemoteAnswer { answer, reply })
    }

    pub fn add_remote_candidate(
        &self,
        from: impl Into<String>,
        candidate: Candidate,
    ) -> Completion<CandidateDisposition> {
        let from = from.into();
        self.request(|reply| Command::RemoteCandidate {
            from,
            candidate,
            reply,
        })
    }

    /// Marks the session cancelled right away, so in-flight steps drop their
    /// side effects, then queues the close itself. Idempotent.
    pub fn close(&self) -> BoxFuture<'static, ()> {
        self.cancelled.store(true, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        let queued = self.commands.send(Command::Close { reply: tx }).is_ok();
        async move {
            if queued {
                let _ = rx.await;
            }
        }
        .boxed()
    }
}

struct SessionActor {
    id: String,
    role: Role,
    ctx: SessionContext,
    state: watch::Sender<NegotiationState>,
    cancelled: Arc<AtomicBool>,
    gathered: Vec<CandidatePayload>,
}

impl SessionActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        let (transport, mut events) = match self.ctx.factory.create(&self.id, &self.ctx.config).await
        {
            Ok(created) => created,
            Err(e) => {
                warn!(session = %self.id, "transport creation failed: {e}");
                self.ctx.status.emit_negotiation_failed(&self.id, e.to_string());
                self.state.send_replace(NegotiationState::Closed);
                return;
            }
        };

        let mut machine = ConnectionSession::new(
            self.id.clone(),
            self.role,
            transport,
            CodecFilter::new(self.ctx.config.allowed_payload_types.clone()),
            self.ctx.encoding,
            self.cancelled.clone(),
        );

        let timeout = self.ctx.config.negotiation_timeout();
        let mut deadline: Option<Instant> = None;
        let mut events_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else {
                        // every handle dropped without an explicit close
                        self.shutdown(&mut machine).await;
                        break;
                    };
                    if self.handle_command(&mut machine, command).await {
                        break;
                    }
                }
                event = events.recv(), if events_open => match event {
                    Some(event) => self.handle_transport(&mut machine, event),
                    None => events_open = false,
                },
                _ = wait_deadline(deadline) => {
                    warn!(session = %self.id, "negotiation timed out in {}", machine.state());
                    self.ctx.status.emit(StatusEvent::NegotiationTimedOut { session_id: self.id.clone() });
                    self.shutdown(&mut machine).await;
                    break;
                }
            }

            self.state.send_replace(machine.state());
            deadline = match (timeout, machine.state().is_negotiating()) {
                (Some(limit), true) => deadline.or_else(|| Some(Instant::now() + limit)),
                _ => None,
            };
        }
        drain(&mut events);
    }

    /// Returns `true` once the session is closed and the actor should stop.
    async fn handle_command(&mut self, machine: &mut ConnectionSession, command: Command) -> bool {
        match command {
            Command::StartOffer { tracks, reply } => {
                let result = self.start_offer(machine, tracks).await;
                self.report("offer", &result);
                let _ = reply.send(result);
            }
            Command::RemoteOffer { from, offer, reply } => {
                let result = self.answer_offer(machine, &from, offer).await;
                self.report("offer", &result);
                let _ = reply.send(result);
            }
            Command::RemoteAnswer { answer, reply } => {
                let result = machine.accept_answer(answer).await.map(|r| r.applied);
                self.report("answer", &result);
                let _ = reply.send(result);
            }
            Command::RemoteCandidate {
                from,
                candidate,
                reply,
            } => {
                let result = machine.add_remote_candidate(&from, candidate).await;
                self.report("candidate", &result);
                let _ = reply.send(result);
            }
            Command::Close { reply } => {
                self.shutdown(machine).await;
                let _ = reply.send(());
                return true;
            }
        }
        false
    }

    async fn start_offer(
        &self,
        machine: &mut ConnectionSession,
        tracks: Vec<OutboundTrack>,
    ) -> Result<()> {
        let offer = machine.start_offer(tracks).await?;
        self.ctx.signaling.emit(Outgoing::Offer {
            target_id: self.id.clone(),
            sdp: offer.to_payload(),
        })?;

        if let Err(e) = machine.cap_video_bitrate().await {
            warn!(session = %self.id, "bitrate cap failed: {e}");
        }
        Ok(())
    }

    async fn answer_offer(
        &self,
        machine: &mut ConnectionSession,
        from: &str,
        offer: SessionDescriptor,
    ) -> Result<()> {
        let answer = machine.accept_offer(from, offer).await?;
        self.ctx.signaling.emit(Outgoing::Answer {
            target_id: from.to_string(),
            sdp: answer.to_payload(),
            kind: SdpKind::Answer,
            from: self.ctx.signaling.local_id(),
        })
    }

    fn report<T>(&self, what: &str, result: &Result<T>) {
        let Err(e) = result else {
            return;
        };
        match e {
            e if e.is_routing() => debug!(session = %self.id, "{what} dropped: {e}"),
            Error::NegotiationState { .. } => {
                warn!(session = %self.id, "{what} rejected: {e}")
            }
            e => {
                warn!(session = %self.id, "{what} failed: {e}");
                self.ctx.status.emit_negotiation_failed(&self.id, e.to_string());
            }
        }
    }

    fn handle_transport(&mut self, machine: &mut ConnectionSession, event: TransportEvent) {
        if machine.state().is_closed() {
            return;
        }
        match event {
            TransportEvent::LocalCandidate(candidate) => {
                let target = match self.role {
                    Role::Host => self.id.clone(),
                    Role::Viewer => machine
                        .remote_peer()
                        .unwrap_or(HOST_SESSION_ID)
                        .to_string(),
                };
                self.gathered.push(candidate.clone());
                if let Err(e) = self.ctx.signaling.emit(Outgoing::IceCandidate {
                    target_id: target,
                    candidate,
                }) {
                    warn!(session = %self.id, "failed to send local candidate: {e}");
                }
            }
            TransportEvent::GatheringComplete => {
                analyze_candidates(&self.id, &self.gathered);
            }
            TransportEvent::StateChanged(TransportState::Connected) => {
                if machine.mark_connected() {
                    self.ctx.status.emit_connected(&self.id);
                }
            }
            TransportEvent::StateChanged(TransportState::Disconnected | TransportState::Failed) => {
                self.ctx.status.emit_connection_problem(&self.id);
            }
            TransportEvent::StateChanged(state) => {
                debug!(session = %self.id, "transport state {:?}", state);
            }
            TransportEvent::TrackArrived(track) => {
                let Some(sink) = self.ctx.sink.as_ref().filter(|_| self.role == Role::Viewer) else {
                    return;
                };
                info!(session = %self.id, "remote {} track {} arrived", track.kind, track.id);
                match sink.attach(&track) {
                    Ok(()) => self.ctx.status.emit(StatusEvent::StreamAttached {
                        session_id: self.id.clone(),
                    }),
                    Err(e) => {
                        warn!(session = %self.id, "media sink failed: {e}");
                        self.ctx.status.emit(StatusEvent::PlaybackFailed {
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn shutdown(&mut self, machine: &mut ConnectionSession) {
        if machine.state().is_closed() {
            return;
        }
        if let Some(sink) = self.ctx.sink.as_ref().filter(|_| self.role == Role::Viewer) {
            sink.detach();
        }
        machine.close().await;
        self.state.send_replace(NegotiationState::Closed);
        self.ctx.status.emit_closed(&self.id);
    }
}

async fn wait_deadline(deadline: Option<Instant>) {
    match deadline {
        Some(at) => sleep_until(at).await,
        None => future::pending::<()>().await,
    }
}

fn drain(events: &mut TransportEvents) {
    events.close();
    while events.try_recv().is_ok() {}
}
