use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::types::{ClientId, PeerInfo, Role, SignalingError};

/// Messages sent from client to hub
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Announce this endpoint under a caller-chosen id
    #[serde(rename = "register")]
    Register {
        role: Role,
        #[serde(rename = "clientId")]
        client_id: ClientId,
    },

    #[serde(rename = "offer")]
    Offer(Relay),

    #[serde(rename = "answer")]
    Answer(Relay),

    #[serde(rename = "ice-candidate")]
    IceCandidate(Relay),
}

/// Messages sent from hub to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    /// Registration acknowledged
    #[serde(rename = "registered")]
    Registered,

    #[serde(rename = "peer-joined")]
    PeerJoined { peer: PeerInfo },

    #[serde(rename = "peer-left")]
    PeerLeft { peer: PeerInfo },

    #[serde(rename = "offer")]
    Offer(Relay),

    #[serde(rename = "answer")]
    Answer(Relay),

    #[serde(rename = "ice-candidate")]
    IceCandidate(Relay),
}

/// Body of a directed message. The hub only reads `to`; everything else is
/// forwarded untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Relay {
    #[serde(default)]
    pub payload: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<ClientId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<ClientId>,
}

impl Relay {
    pub fn new<T: Serialize>(payload: &T, to: &ClientId, from: &ClientId) -> Self {
        Self {
            payload: serde_json::to_value(payload).unwrap_or(Value::Null),
            to: Some(to.clone()),
            from: Some(from.clone()),
        }
    }

    /// Decode the payload and pair it with the sender id
    pub fn into_payload<T: DeserializeOwned>(self) -> Result<(T, ClientId), SignalingError> {
        let from = self.from.ok_or(SignalingError::MissingField("from"))?;
        let payload = serde_json::from_value(self.payload)?;
        Ok((payload, from))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SdpType {
    Offer,
    Answer,
    Pranswer,
    Rollback,
}

/// Session description in the browser's `RTCSessionDescriptionInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    #[serde(rename = "type")]
    pub kind: SdpType,
    pub sdp: String,
}

impl SessionDescription {
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Offer,
            sdp: sdp.into(),
        }
    }

    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: SdpType::Answer,
            sdp: sdp.into(),
        }
    }
}

/// ICE candidate in the browser's `RTCIceCandidateInit` shape
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceCandidate {
    pub candidate: String,
    #[serde(rename = "sdpMid", default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_m_line_index: Option<u16>,
    #[serde(
        rename = "usernameFragment",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub username_fragment: Option<String>,
}

impl IceCandidate {
    pub fn new(candidate: impl Into<String>) -> Self {
        Self {
            candidate: candidate.into(),
            sdp_mid: None,
            sdp_m_line_index: None,
            username_fragment: None,
        }
    }
}
