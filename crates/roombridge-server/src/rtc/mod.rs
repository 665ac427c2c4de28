//! Room adapter on webrtc-rs
//!
//! One WebSocket signaling connection and one peer connection per joined room.
//! Remote tracks are received and relay tracks published on the same peer
//! connection.

mod session;
mod signaling;
mod tracks;

pub use session::WebRtcSession;
pub use signaling::{Joined, SignalingClient};
pub use tracks::{LocalTrack, PliWriter, RemoteTrack};

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::{mpsc, RwLock};
use uuid::Uuid;
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType};

use roombridge_media::{MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8};
use roombridge_protocol::{ClientMessage, IceCandidateData, ServerMessage};

use crate::error::BridgeError;
use crate::room::{
    KeyframeRequester, RoomConnection, RoomConnector, RoomEvent, RoomSession, TrackSubscribed,
};

/// Publisher lookup: participant identities and which stream belongs to whom
#[derive(Default)]
struct Roster {
    identities: HashMap<Uuid, String>,
    streams: HashMap<String, Uuid>,
}

impl Roster {
    fn publisher_of(&self, stream_id: &str) -> String {
        self.streams
            .get(stream_id)
            .and_then(|id| self.identities.get(id).cloned().or_else(|| Some(id.to_string())))
            .unwrap_or_else(|| stream_id.to_string())
    }
}

/// Joins rooms over WebSocket signaling and webrtc-rs
pub struct WebRtcConnector {
    api: API,
    ice_servers: Vec<RTCIceServer>,
}

impl WebRtcConnector {
    /// Build the webrtc API with VP8, H264 and Opus registered
    pub fn new(stun_servers: Vec<String>) -> Result<Self> {
        let mut media_engine = MediaEngine::default();

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_VP8.to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: String::new(),
                    rtcp_feedback: vec![],
                },
                payload_type: 96,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_H264.to_string(),
                    clock_rate: 90000,
                    channels: 0,
                    sdp_fmtp_line: "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42e01f"
                        .to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 102,
                ..Default::default()
            },
            RTPCodecType::Video,
        )?;

        media_engine.register_codec(
            RTCRtpCodecParameters {
                capability: RTCRtpCodecCapability {
                    mime_type: MIME_TYPE_OPUS.to_string(),
                    clock_rate: 48000,
                    channels: 2,
                    sdp_fmtp_line: "minptime=10;useinbandfec=1".to_string(),
                    rtcp_feedback: vec![],
                },
                payload_type: 111,
                ..Default::default()
            },
            RTPCodecType::Audio,
        )?;

        // NACK and RTCP reports keep the inbound streams healthy
        let registry = register_default_interceptors(Registry::new(), &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .build();

        let ice_servers = vec![RTCIceServer {
            urls: stun_servers,
            ..Default::default()
        }];

        Ok(Self { api, ice_servers })
    }

    async fn open(&self, host: &str, token: &str) -> Result<RoomConnection> {
        let url = format!("{}/rtc", host.trim_end_matches('/'));
        let (signaling, incoming, joined) = SignalingClient::connect(&url, token).await?;
        tracing::debug!(
            "Signaling joined room {} as {}",
            joined.room,
            joined.participant.identity
        );

        let config = RTCConfiguration {
            ice_servers: self.ice_servers.clone(),
            ..Default::default()
        };
        let peer_connection = Arc::new(self.api.new_peer_connection(config).await?);

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let roster = Arc::new(RwLock::new(Roster::default()));

        let ice_signaling = signaling.clone();
        peer_connection.on_ice_candidate(Box::new(move |candidate| {
            let signaling = ice_signaling.clone();
            Box::pin(async move {
                if let Some(candidate) = candidate {
                    if let Ok(json) = candidate.to_json() {
                        signaling.send(ClientMessage::IceCandidate {
                            candidate: IceCandidateData {
                                candidate: json.candidate,
                                sdp_mid: json.sdp_mid,
                                sdp_mline_index: json.sdp_mline_index,
                            },
                        });
                    }
                }
            })
        }));

        let keyframes: Arc<dyn KeyframeRequester> = Arc::new(PliWriter::new(&peer_connection));
        let track_events = events_tx.clone();
        let track_roster = roster.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            let roster = track_roster.clone();
            let keyframes = keyframes.clone();
            Box::pin(async move {
                let participant = roster.read().await.publisher_of(&track.stream_id());
                tracing::debug!(
                    "Remote track {} received (stream {}, from {})",
                    track.id(),
                    track.stream_id(),
                    participant
                );
                let _ = events.send(RoomEvent::TrackSubscribed(TrackSubscribed {
                    track: Arc::new(RemoteTrack::new(track)),
                    keyframes,
                    participant,
                }));
            })
        }));

        let state_events = events_tx.clone();
        let state_room = joined.room.clone();
        peer_connection.on_peer_connection_state_change(Box::new(move |state| {
            tracing::debug!("Peer connection state for room {} changed: {}", state_room, state);
            if state == RTCPeerConnectionState::Failed {
                let _ = state_events.send(RoomEvent::Disconnected);
            }
            Box::pin(async {})
        }));

        let session = Arc::new(WebRtcSession::new(joined.room, peer_connection, signaling));
        tokio::spawn(dispatch(session.clone(), incoming, roster, events_tx));

        Ok(RoomConnection {
            session,
            events: events_rx,
        })
    }
}

#[async_trait]
impl RoomConnector for WebRtcConnector {
    async fn connect(&self, host: &str, token: &str) -> crate::error::Result<RoomConnection> {
        self.open(host, token)
            .await
            .map_err(|e| BridgeError::connection(host, e))
    }
}

/// Apply signaling messages to the session until the connection ends
async fn dispatch(
    session: Arc<WebRtcSession>,
    mut incoming: mpsc::UnboundedReceiver<ServerMessage>,
    roster: Arc<RwLock<Roster>>,
    events: mpsc::UnboundedSender<RoomEvent>,
) {
    while let Some(msg) = incoming.recv().await {
        match msg {
            ServerMessage::Offer { sdp } => {
                if let Err(e) = session.handle_offer(sdp).await {
                    tracing::warn!("Failed to answer offer in room {}: {}", session.name(), e);
                }
            }
            ServerMessage::Answer { sdp } => {
                if let Err(e) = session.handle_answer(sdp).await {
                    tracing::warn!("Failed to apply answer in room {}: {}", session.name(), e);
                }
            }
            ServerMessage::IceCandidate { candidate } => {
                if let Err(e) = session.add_ice_candidate(candidate).await {
                    tracing::debug!("Failed to add ICE candidate in room {}: {}", session.name(), e);
                }
            }
            ServerMessage::ParticipantJoined { participant } => {
                tracing::info!("{} joined room {}", participant.identity, session.name());
                roster
                    .write()
                    .await
                    .identities
                    .insert(participant.id, participant.identity);
            }
            ServerMessage::ParticipantLeft { participant_id } => {
                let mut roster = roster.write().await;
                if let Some(identity) = roster.identities.remove(&participant_id) {
                    tracing::info!("{} left room {}", identity, session.name());
                }
                roster.streams.retain(|_, id| *id != participant_id);
            }
            ServerMessage::TrackPublished { track } => {
                tracing::debug!(
                    "Track {} ({:?}) published in room {}",
                    track.track_id,
                    track.kind,
                    session.name()
                );
                roster
                    .write()
                    .await
                    .streams
                    .insert(track.stream_id, track.participant_id);
            }
            ServerMessage::Error { message } => {
                tracing::warn!("Server error in room {}: {}", session.name(), message);
            }
            ServerMessage::Pong | ServerMessage::Joined { .. } => {}
        }
    }

    tracing::info!("Signaling connection for room {} ended", session.name());
    let _ = events.send(RoomEvent::Disconnected);
}
