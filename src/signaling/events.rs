//! Signaling events and their JSON wire form `{"event": ..., "data": ...}`.

use crate::error::Result;
use crate::peer::types::{CandidatePayload, SdpKind, SdpPayload};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct RoomRequest {
    pub room_id: String,
    #[serde(default)]
    pub password: Option<String>,
}

impl RoomRequest {
    pub fn new(room_id: impl Into<String>, password: Option<String>) -> Self {
        Self {
            room_id: room_id.into(),
            password: password.filter(|p| !p.is_empty()),
        }
    }
}

/// Client → server.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Outgoing {
    CreateRoom(RoomRequest),
    JoinRoom(RoomRequest),
    Offer {
        target_id: String,
        sdp: SdpPayload,
    },
    Answer {
        target_id: String,
        sdp: SdpPayload,
        #[serde(rename = "type")]
        kind: SdpKind,
        from: String,
    },
    IceCandidate {
        target_id: String,
        candidate: CandidatePayload,
    },
    HostStopped,
}

/// Server → client.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "kebab-case",
    rename_all_fields = "camelCase"
)]
pub enum Incoming {
    ViewerJoined(String),
    ViewerLeft(String),
    Offer {
        from: String,
        sdp: SdpPayload,
    },
    Answer {
        from: String,
        sdp: SdpPayload,
    },
    IceCandidate {
        from: String,
        candidate: CandidatePayload,
    },
    UpdateViewers(Vec<String>),
    HostStopped,
    HostDisconnected,
    ErrorMessage(String),
}

impl Incoming {
    pub fn name(&self) -> &'static str {
        match self {
            Incoming::ViewerJoined(_) => "viewer-joined",
            Incoming::ViewerLeft(_) => "viewer-left",
            Incoming::Offer { .. } => "offer",
            Incoming::Answer { .. } => "answer",
            Incoming::IceCandidate { .. } => "ice-candidate",
            Incoming::UpdateViewers(_) => "update-viewers",
            Incoming::HostStopped => "host-stopped",
            Incoming::HostDisconnected => "host-disconnected",
            Incoming::ErrorMessage(_) => "error-message",
        }
    }
}

pub fn to_frame<T: Serialize>(event: &T) -> Result<String> {
    Ok(serde_json::to_string(event)?)
}

pub fn from_frame<'a, T: Deserialize<'a>>(frame: &'a str) -> Result<T> {
    Ok(serde_json::from_str(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn offer_frame_matches_wire_shape() {
        let offer = Outgoing::Offer {
            target_id: "v1".into(),
            sdp: SdpPayload {
                sdp: "v=0".into(),
                kind: SdpKind::Offer,
            },
        };
        let value: serde_json::Value = serde_json::from_str(&to_frame(&offer).unwrap()).unwrap();
        assert_eq!(
            value,
            json!({"event": "offer", "data": {"targetId": "v1", "sdp": {"sdp": "v=0", "type": "offer"}}})
        );
    }

    #[test]
    fn answer_frame_carries_type_and_sender() {
        let answer = Outgoing::Answer {
            target_id: "h1".into(),
            sdp: SdpPayload {
                sdp: "v=0".into(),
                kind: SdpKind::Answer,
            },
            kind: SdpKind::Answer,
            from: "v1".into(),
        };
        let value = serde_json::to_value(&answer).unwrap();
        assert_eq!(value["event"], "answer");
        assert_eq!(value["data"]["type"], "answer");
        assert_eq!(value["data"]["from"], "v1");
    }

    #[test]
    fn server_events_decode() {
        let joined: Incoming = from_frame(r#"{"event":"viewer-joined","data":"abc"}"#).unwrap();
        assert_eq!(joined, Incoming::ViewerJoined("abc".into()));

        let stopped: Incoming = from_frame(r#"{"event":"host-stopped"}"#).unwrap();
        assert_eq!(stopped, Incoming::HostStopped);

        let roster: Incoming =
            from_frame(r#"{"event":"update-viewers","data":["a","b"]}"#).unwrap();
        assert_eq!(roster, Incoming::UpdateViewers(vec!["a".into(), "b".into()]));

        let cand: Incoming = from_frame(
            r#"{"event":"ice-candidate","data":{"from":"host-1","candidate":{"candidate":"candidate:1 1 udp 1 1.2.3.4 5 typ host","sdpMid":"0","sdpMLineIndex":0}}}"#,
        )
        .unwrap();
        assert_eq!(cand.name(), "ice-candidate");
    }

    #[test]
    fn room_request_drops_empty_password() {
        assert_eq!(RoomRequest::new("r", Some(String::new())).password, None);
        let frame = to_frame(&Outgoing::JoinRoom(RoomRequest::new("r", Some("pw".into())))).unwrap();
        assert_eq!(frame, r#"{"event":"join-room","data":{"roomId":"r","password":"pw"}}"#);
    }
}
