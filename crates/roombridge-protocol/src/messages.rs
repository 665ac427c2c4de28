use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::types::{IceCandidateData, ParticipantInfo, TrackInfo};

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Malformed signaling message: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Messages sent from the bridge to the room server via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Join the room the token grants access to
    Join { token: String },

    /// Leave the room
    Leave,

    /// Ping to keep connection alive
    Ping,

    /// SDP offer (sent when publishing a new track)
    Offer { sdp: String },

    /// SDP answer to a server offer
    Answer { sdp: String },

    /// Local ICE candidate
    IceCandidate { candidate: IceCandidateData },
}

/// Messages sent from the room server to the bridge via WebSocket
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Join accepted
    Joined {
        room: String,
        participant: ParticipantInfo,
    },

    /// Error message
    Error { message: String },

    /// Pong response to ping
    Pong,

    /// Server-initiated offer (new remote tracks to subscribe)
    Offer { sdp: String },

    /// Answer to an offer we sent
    Answer { sdp: String },

    /// Remote ICE candidate
    IceCandidate { candidate: IceCandidateData },

    /// Another participant joined the room
    ParticipantJoined { participant: ParticipantInfo },

    /// A participant left the room
    ParticipantLeft { participant_id: Uuid },

    /// A participant published a track
    TrackPublished { track: TrackInfo },
}

impl ClientMessage {
    /// Serialize for the wire
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

impl ServerMessage {
    /// Parse one text frame
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(text)?)
    }
}
