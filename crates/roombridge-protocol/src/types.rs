use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Participant as announced by the room server
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantInfo {
    pub id: Uuid,
    pub identity: String,
}

/// Kind of a published media track
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Audio,
    Video,
}

/// Track publication notice
///
/// `stream_id` matches the media stream id carried in the SDP, which lets a
/// subscriber map an incoming remote track back to its publisher.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TrackInfo {
    pub track_id: String,
    pub stream_id: String,
    pub participant_id: Uuid,
    pub kind: TrackKind,
    pub mime_type: String,
}

/// Trickled ICE candidate
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IceCandidateData {
    pub candidate: String,
    pub sdp_mid: Option<String>,
    pub sdp_mline_index: Option<u16>,
}
