use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;

use roombridge_media::CodecCapability;
use roombridge_protocol::{ClientMessage, IceCandidateData};

use super::signaling::SignalingClient;
use super::tracks::{to_rtc_capability, LocalTrack};
use crate::error::BridgeError;
use crate::room::{OutboundTrack, RoomSession};

const STREAM_ID: &str = "roombridge";

/// A joined room backed by one peer connection
pub struct WebRtcSession {
    room: String,
    peer_connection: Arc<RTCPeerConnection>,
    signaling: SignalingClient,
    senders: Mutex<HashMap<String, Arc<RTCRtpSender>>>,
    /// Serializes offer/answer exchanges
    negotiation: Mutex<()>,
}

impl WebRtcSession {
    /// Session over an already joined signaling connection
    pub fn new(room: String, peer_connection: Arc<RTCPeerConnection>, signaling: SignalingClient) -> Self {
        Self {
            room,
            peer_connection,
            signaling,
            senders: Mutex::new(HashMap::new()),
            negotiation: Mutex::new(()),
        }
    }

    /// Apply a server offer and reply with an answer
    pub async fn handle_offer(&self, sdp: String) -> Result<()> {
        let _guard = self.negotiation.lock().await;

        let offer = RTCSessionDescription::offer(sdp)?;
        self.peer_connection.set_remote_description(offer).await?;

        let answer = self.peer_connection.create_answer(None).await?;
        self.peer_connection
            .set_local_description(answer.clone())
            .await?;

        self.signaling.send(ClientMessage::Answer { sdp: answer.sdp });
        Ok(())
    }

    /// Apply the server's answer to our last offer
    pub async fn handle_answer(&self, sdp: String) -> Result<()> {
        let answer = RTCSessionDescription::answer(sdp)?;
        self.peer_connection.set_remote_description(answer).await?;
        Ok(())
    }

    /// Add a remote ICE candidate
    pub async fn add_ice_candidate(&self, candidate: IceCandidateData) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(RTCIceCandidateInit {
                candidate: candidate.candidate,
                sdp_mid: candidate.sdp_mid,
                sdp_mline_index: candidate.sdp_mline_index,
                username_fragment: None,
            })
            .await?;
        Ok(())
    }

    async fn renegotiate(&self) -> Result<()> {
        let _guard = self.negotiation.lock().await;

        let offer = self.peer_connection.create_offer(None).await?;
        self.peer_connection
            .set_local_description(offer.clone())
            .await?;

        if !self.signaling.send(ClientMessage::Offer { sdp: offer.sdp }) {
            anyhow::bail!("Signaling connection closed");
        }
        Ok(())
    }

    async fn publish(&self, capability: CodecCapability) -> Result<Arc<dyn OutboundTrack>> {
        let track_id = format!("relay-{}", Uuid::new_v4());
        let track = Arc::new(TrackLocalStaticRTP::new(
            to_rtc_capability(&capability),
            track_id.clone(),
            STREAM_ID.to_string(),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Incoming RTCP must be read for the interceptors to process it
        let rtcp_sender = sender.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1500];
            while rtcp_sender.read(&mut buf).await.is_ok() {}
        });

        self.senders
            .lock()
            .await
            .insert(track_id.clone(), Arc::clone(&sender));

        if let Err(e) = self.renegotiate().await {
            // Leave nothing attached behind a failed publish
            self.senders.lock().await.remove(&track_id);
            if let Err(remove_err) = self.peer_connection.remove_track(&sender).await {
                tracing::warn!(
                    "Failed to detach track {} from room {}: {}",
                    track_id,
                    self.room,
                    remove_err
                );
            }
            return Err(e);
        }

        tracing::info!(
            "Published track {} ({}) in room {}",
            track_id,
            capability.mime_type,
            self.room
        );
        Ok(Arc::new(LocalTrack::new(track)))
    }
}

#[async_trait]
impl RoomSession for WebRtcSession {
    fn name(&self) -> &str {
        &self.room
    }

    async fn publish_track(&self, capability: CodecCapability) -> crate::error::Result<Arc<dyn OutboundTrack>> {
        self.publish(capability)
            .await
            .map_err(|e| BridgeError::Publish(e.to_string()))
    }

    async fn unpublish_track(&self, track: &Arc<dyn OutboundTrack>) -> crate::error::Result<()> {
        let Some(sender) = self.senders.lock().await.remove(&track.id()) else {
            return Ok(());
        };

        self.peer_connection
            .remove_track(&sender)
            .await
            .map_err(|e| BridgeError::Publish(e.to_string()))?;
        self.renegotiate()
            .await
            .map_err(|e| BridgeError::Signaling(e.to_string()))?;

        tracing::info!("Unpublished track {} from room {}", track.id(), self.room);
        Ok(())
    }

    async fn disconnect(&self) {
        self.signaling.send(ClientMessage::Leave);
        self.signaling.close();

        if let Err(e) = self.peer_connection.close().await {
            tracing::warn!("Failed to close peer connection for room {}: {}", self.room, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtc::WebRtcConnector;
    use roombridge_media::MIME_TYPE_VP8;
    use webrtc::peer_connection::configuration::RTCConfiguration;

    #[tokio::test]
    async fn failed_publish_leaves_no_track_attached() {
        let connector = WebRtcConnector::new(vec![]).unwrap();
        let peer_connection = Arc::new(
            connector
                .api
                .new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );
        let session = WebRtcSession::new(
            "C".to_string(),
            peer_connection.clone(),
            SignalingClient::disconnected(),
        );

        let result = session
            .publish_track(CodecCapability::new(MIME_TYPE_VP8, 90000))
            .await;

        assert!(matches!(result, Err(BridgeError::Publish(_))));
        assert!(session.senders.lock().await.is_empty());
        for sender in peer_connection.get_senders().await {
            assert!(sender.track().await.is_none());
        }

        peer_connection.close().await.unwrap();
    }
}
