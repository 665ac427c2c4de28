//! Room collaborator interfaces
//!
//! The bridge only talks to rooms through these traits. [`crate::rtc`] provides
//! the webrtc-rs implementation; tests plug in in-memory fakes.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use webrtc::rtp::packet::Packet;

use roombridge_media::{CodecCapability, Frame};

use crate::error::Result;

/// Which of the two bridged rooms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomSide {
    A,
    B,
}

impl RoomSide {
    /// The other side
    pub fn opposite(self) -> Self {
        match self {
            Self::A => Self::B,
            Self::B => Self::A,
        }
    }
}

impl fmt::Display for RoomSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::A => write!(f, "A"),
            Self::B => write!(f, "B"),
        }
    }
}

/// Opens sessions to rooms
#[async_trait]
pub trait RoomConnector: Send + Sync + 'static {
    async fn connect(&self, host: &str, token: &str) -> Result<RoomConnection>;
}

/// A freshly joined room: the session handle plus its event stream
pub struct RoomConnection {
    pub session: Arc<dyn RoomSession>,
    pub events: mpsc::UnboundedReceiver<RoomEvent>,
}

/// Events delivered by a room session
pub enum RoomEvent {
    /// A remote track was subscribed and is ready to read
    TrackSubscribed(TrackSubscribed),
    /// The session was closed by the remote end
    Disconnected,
}

/// Payload of a subscription event
#[derive(Clone)]
pub struct TrackSubscribed {
    pub track: Arc<dyn InboundTrack>,
    /// Asks the track's publisher for a keyframe
    pub keyframes: Arc<dyn KeyframeRequester>,
    /// Identity of the publishing participant
    pub participant: String,
}

/// One joined room
#[async_trait]
pub trait RoomSession: Send + Sync {
    /// Room name, for logging
    fn name(&self) -> &str;

    /// Create an outbound track with the given capability and publish it
    async fn publish_track(&self, capability: CodecCapability) -> Result<Arc<dyn OutboundTrack>>;

    async fn unpublish_track(&self, track: &Arc<dyn OutboundTrack>) -> Result<()>;

    /// Leave the room; inbound track reads fail afterwards
    async fn disconnect(&self);
}

/// A subscribed remote track
#[async_trait]
pub trait InboundTrack: Send + Sync {
    fn id(&self) -> String;

    fn ssrc(&self) -> u32;

    fn codec(&self) -> CodecCapability;

    /// Block until the next RTP packet arrives or the stream fails
    async fn read_packet(&self) -> Result<Packet>;
}

/// A locally published track
#[async_trait]
pub trait OutboundTrack: Send + Sync {
    fn id(&self) -> String;

    async fn write_frame(&self, frame: &Frame) -> Result<()>;
}

/// Sends keyframe requests to the original publisher of a track
pub trait KeyframeRequester: Send + Sync {
    fn request_keyframe(&self, ssrc: u32);
}

impl<F> KeyframeRequester for F
where
    F: Fn(u32) + Send + Sync,
{
    fn request_keyframe(&self, ssrc: u32) {
        self(ssrc)
    }
}
