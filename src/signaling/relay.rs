//! In-process coordinating server: rooms, password checks, and routing of
//! descriptors and candidates between a host and its viewers.

use crate::error::{Error, Result};
use crate::peer::types::HOST_SESSION_ID;
use crate::signaling::channel::{SignalingChannel, Subscription};
use crate::signaling::events::{Incoming, Outgoing, RoomRequest};
use crate::utils::random_id;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub const ERR_ROOM_REQUIRED: &str = "Room ID is required.";
pub const ERR_ROOM_NOT_FOUND: &str = "Room does not exist.";
pub const ERR_WRONG_PASSWORD: &str = "Incorrect password.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: String,
    pub password: Option<String>,
    pub host: String,
    /// Join order
    pub viewers: Vec<String>,
}

#[derive(Default)]
struct Client {
    subscribers: Vec<(u64, mpsc::UnboundedSender<Incoming>)>,
    room: Option<String>,
}

#[derive(Default)]
struct RelayState {
    rooms: HashMap<String, Room>,
    clients: HashMap<String, Client>,
    next_subscription: u64,
}

impl RelayState {
    fn deliver(&mut self, to: &str, event: Incoming) {
        let Some(client) = self.clients.get_mut(to) else {
            debug!("dropping {} for unknown client {to}", event.name());
            return;
        };
        client
            .subscribers
            .retain(|(_, tx)| tx.send(event.clone()).is_ok());
    }

    fn resolve_target(&self, from: &str, target: &str) -> Option<String> {
        if target != HOST_SESSION_ID {
            return Some(target.to_string());
        }
        let room = self.clients.get(from)?.room.as_ref()?;
        self.rooms.get(room).map(|r| r.host.clone())
    }

    /// Detaches `id` from whatever room it is in. A leaving host takes the
    /// room down with it.
    fn leave_current(&mut self, id: &str) {
        let Some(room_id) = self.clients.get_mut(id).and_then(|c| c.room.take()) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else {
            return;
        };

        if room.host == id {
            if let Some(room) = self.rooms.remove(&room_id) {
                info!("room {room_id} closed: host left");
                for viewer in &room.viewers {
                    if let Some(client) = self.clients.get_mut(viewer) {
                        client.room = None;
                    }
                    self.deliver(viewer, Incoming::HostDisconnected);
                }
            }
        } else {
            room.viewers.retain(|v| v != id);
            let host = room.host.clone();
            let roster = room.viewers.clone();
            self.deliver(&host, Incoming::ViewerLeft(id.to_string()));
            self.deliver(&host, Incoming::UpdateViewers(roster));
        }
    }

    fn create_room(&mut self, from: &str, request: RoomRequest) {
        if request.room_id.is_empty() {
            self.deliver(from, Incoming::ErrorMessage(ERR_ROOM_REQUIRED.into()));
            return;
        }
        self.leave_current(from);

        // last write wins
        if let Some(previous) = self.rooms.remove(&request.room_id) {
            if let Some(client) = self.clients.get_mut(&previous.host) {
                client.room = None;
            }
            for viewer in &previous.viewers {
                if let Some(client) = self.clients.get_mut(viewer) {
                    client.room = None;
                }
                self.deliver(viewer, Incoming::HostDisconnected);
            }
        }

        info!("room {} created by {from}", request.room_id);
        self.rooms.insert(
            request.room_id.clone(),
            Room {
                id: request.room_id.clone(),
                password: request.password,
                host: from.to_string(),
                viewers: Vec::new(),
            },
        );
        if let Some(client) = self.clients.get_mut(from) {
            client.room = Some(request.room_id);
        }
        self.deliver(from, Incoming::UpdateViewers(Vec::new()));
    }

    fn join_room(&mut self, from: &str, request: RoomRequest) {
        let error = match self.rooms.get(&request.room_id) {
            None => Some(ERR_ROOM_NOT_FOUND),
            Some(room) if room.password != request.password => Some(ERR_WRONG_PASSWORD),
            Some(_) => None,
        };
        if let Some(message) = error {
            self.deliver(from, Incoming::ErrorMessage(message.into()));
            return;
        }

        self.leave_current(from);
        let Some(room) = self.rooms.get_mut(&request.room_id) else {
            return;
        };
        room.viewers.push(from.to_string());
        let host = room.host.clone();
        let roster = room.viewers.clone();
        if let Some(client) = self.clients.get_mut(from) {
            client.room = Some(request.room_id.clone());
        }

        info!("{from} joined room {}", request.room_id);
        self.deliver(&host, Incoming::ViewerJoined(from.to_string()));
        self.deliver(&host, Incoming::UpdateViewers(roster));
    }

    fn host_stopped(&mut self, from: &str) {
        let Some(room_id) = self.clients.get(from).and_then(|c| c.room.clone()) else {
            return;
        };
        let is_host = self.rooms.get(&room_id).is_some_and(|r| r.host == from);
        if !is_host {
            return;
        }
        if let Some(room) = self.rooms.remove(&room_id) {
            info!("room {room_id} stopped by host");
            for viewer in &room.viewers {
                if let Some(client) = self.clients.get_mut(viewer) {
                    client.room = None;
                }
                self.deliver(viewer, Incoming::HostStopped);
            }
        }
        if let Some(client) = self.clients.get_mut(from) {
            client.room = None;
        }
    }

    fn route(&mut self, from: &str, target: &str, event: Incoming) {
        match self.resolve_target(from, target) {
            Some(to) => self.deliver(&to, event),
            None => debug!("no route from {from} to {target}"),
        }
    }

    fn handle(&mut self, from: &str, message: Outgoing) {
        match message {
            Outgoing::CreateRoom(request) => self.create_room(from, request),
            Outgoing::JoinRoom(request) => self.join_room(from, request),
            Outgoing::Offer { target_id, sdp } => {
                let event = Incoming::Offer {
                    from: from.to_string(),
                    sdp,
                };
                self.route(from, &target_id, event);
            }
            Outgoing::Answer { target_id, sdp, .. } => {
                let event = Incoming::Answer {
                    from: from.to_string(),
                    sdp,
                };
                self.route(from, &target_id, event);
            }
            Outgoing::IceCandidate { target_id, candidate } => {
                let event = Incoming::IceCandidate {
                    from: from.to_string(),
                    candidate,
                };
                self.route(from, &target_id, event);
            }
            Outgoing::HostStopped => self.host_stopped(from),
        }
    }
}

/// Shared relay; clone freely.
#[derive(Clone, Default)]
pub struct LocalRelay {
    state: Arc<Mutex<RelayState>>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self) -> RelayClient {
        self.connect_as(random_id())
    }

    pub fn connect_as(&self, id: impl Into<String>) -> RelayClient {
        let id = id.into();
        self.state.lock().clients.entry(id.clone()).or_default();
        RelayClient {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    pub fn room(&self, room_id: &str) -> Option<Room> {
        self.state.lock().rooms.get(room_id).cloned()
    }

    pub fn room_count(&self) -> usize {
        self.state.lock().rooms.len()
    }
}

/// One client's connection to a [`LocalRelay`].
#[derive(Clone)]
pub struct RelayClient {
    id: String,
    state: Weak<Mutex<RelayState>>,
}

impl RelayClient {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Drops the connection as if the socket went away.
    pub fn disconnect(&self) {
        if let Some(state) = self.state.upgrade() {
            let mut state = state.lock();
            state.leave_current(&self.id);
            state.clients.remove(&self.id);
        }
    }
}

impl SignalingChannel for RelayClient {
    fn local_id(&self) -> String {
        self.id.clone()
    }

    fn emit(&self, message: Outgoing) -> Result<()> {
        let state = self
            .state
            .upgrade()
            .ok_or_else(|| Error::Signaling("relay is gone".into()))?;
        let mut state = state.lock();
        if !state.clients.contains_key(&self.id) {
            return Err(Error::Signaling(format!("client {} is disconnected", self.id)));
        }
        state.handle(&self.id, message);
        Ok(())
    }

    fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let Some(state) = self.state.upgrade() else {
            return Subscription::new(rx, || {});
        };

        let sub_id = {
            let mut state = state.lock();
            state.next_subscription += 1;
            let sub_id = state.next_subscription;
            state
                .clients
                .entry(self.id.clone())
                .or_default()
                .subscribers
                .push((sub_id, tx));
            sub_id
        };

        let weak = self.state.clone();
        let client_id = self.id.clone();
        Subscription::new(rx, move || {
            if let Some(state) = weak.upgrade() {
                if let Some(client) = state.lock().clients.get_mut(&client_id) {
                    client.subscribers.retain(|(id, _)| *id != sub_id);
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(sub: &mut Subscription) -> Vec<Incoming> {
        std::iter::from_fn(|| sub.try_recv()).collect()
    }

    #[test]
    fn join_notifies_host_with_roster_in_join_order() {
        let relay = LocalRelay::new();
        let host = relay.connect_as("h");
        let mut host_events = host.subscribe();
        host.emit(Outgoing::CreateRoom(RoomRequest::new("r1", None))).unwrap();

        for id in ["a", "b"] {
            relay
                .connect_as(id)
                .emit(Outgoing::JoinRoom(RoomRequest::new("r1", None)))
                .unwrap();
        }

        assert_eq!(
            drain(&mut host_events),
            vec![
                Incoming::UpdateViewers(vec![]),
                Incoming::ViewerJoined("a".into()),
                Incoming::UpdateViewers(vec!["a".into()]),
                Incoming::ViewerJoined("b".into()),
                Incoming::UpdateViewers(vec!["a".into(), "b".into()]),
            ]
        );
    }

    #[test]
    fn password_mismatch_and_missing_room_are_reported() {
        let relay = LocalRelay::new();
        let host = relay.connect_as("h");
        host.emit(Outgoing::CreateRoom(RoomRequest::new("r1", Some("pw".into()))))
            .unwrap();

        let viewer = relay.connect_as("v");
        let mut events = viewer.subscribe();
        viewer
            .emit(Outgoing::JoinRoom(RoomRequest::new("r1", Some("nope".into()))))
            .unwrap();
        viewer
            .emit(Outgoing::JoinRoom(RoomRequest::new("missing", None)))
            .unwrap();

        assert_eq!(
            drain(&mut events),
            vec![
                Incoming::ErrorMessage(ERR_WRONG_PASSWORD.into()),
                Incoming::ErrorMessage(ERR_ROOM_NOT_FOUND.into()),
            ]
        );
        assert!(relay.room("r1").unwrap().viewers.is_empty());
    }

    #[test]
    fn host_target_resolves_to_room_host() {
        let relay = LocalRelay::new();
        let host = relay.connect_as("h");
        host.emit(Outgoing::CreateRoom(RoomRequest::new("r1", None))).unwrap();
        let mut host_events = host.subscribe();

        let viewer = relay.connect_as("v");
        viewer.emit(Outgoing::JoinRoom(RoomRequest::new("r1", None))).unwrap();
        drain(&mut host_events);

        viewer
            .emit(Outgoing::IceCandidate {
                target_id: HOST_SESSION_ID.into(),
                candidate: crate::peer::types::CandidatePayload::new("candidate:1"),
            })
            .unwrap();

        match drain(&mut host_events).as_slice() {
            [Incoming::IceCandidate { from, .. }] => assert_eq!(from, "v"),
            other => panic!("unexpected events {other:?}"),
        }
    }

    #[test]
    fn host_stop_fans_out_and_destroys_room() {
        let relay = LocalRelay::new();
        let host = relay.connect_as("h");
        host.emit(Outgoing::CreateRoom(RoomRequest::new("r1", None))).unwrap();
        let viewer = relay.connect_as("v");
        let mut events = viewer.subscribe();
        viewer.emit(Outgoing::JoinRoom(RoomRequest::new("r1", None))).unwrap();

        host.emit(Outgoing::HostStopped).unwrap();
        assert_eq!(drain(&mut events), vec![Incoming::HostStopped]);
        assert_eq!(relay.room_count(), 0);
    }

    #[test]
    fn host_disconnect_and_viewer_disconnect() {
        let relay = LocalRelay::new();
        let host = relay.connect_as("h");
        host.emit(Outgoing::CreateRoom(RoomRequest::new("r1", None))).unwrap();
        let mut host_events = host.subscribe();

        let a = relay.connect_as("a");
        let b = relay.connect_as("b");
        let mut b_events = b.subscribe();
        a.emit(Outgoing::JoinRoom(RoomRequest::new("r1", None))).unwrap();
        b.emit(Outgoing::JoinRoom(RoomRequest::new("r1", None))).unwrap();
        drain(&mut host_events);

        a.disconnect();
        assert_eq!(
            drain(&mut host_events),
            vec![
                Incoming::ViewerLeft("a".into()),
                Incoming::UpdateViewers(vec!["b".into()]),
            ]
        );

        host.disconnect();
        assert_eq!(drain(&mut b_events), vec![Incoming::HostDisconnected]);
        assert!(relay.room("r1").is_none());
    }

    #[test]
    fn closed_subscription_stops_receiving() {
        let relay = LocalRelay::new();
        let host = relay.connect_as("h");
        let mut first = host.subscribe();
        first.close();
        let mut second = host.subscribe();

        host.emit(Outgoing::CreateRoom(RoomRequest::new("r1", None))).unwrap();
        assert!(drain(&mut first).is_empty());
        assert_eq!(drain(&mut second), vec![Incoming::UpdateViewers(vec![])]);
    }
}
