//! webrtc-rs implementations of the track interfaces

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::packet::Packet as RtcpPacket;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::rtp::packet::Packet;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::{TrackLocal, TrackLocalWriter};
use webrtc::track::track_remote::TrackRemote;

use roombridge_media::{CodecCapability, Frame};

use crate::error::{BridgeError, Result};
use crate::room::{InboundTrack, KeyframeRequester, OutboundTrack};

pub(crate) fn to_rtc_capability(capability: &CodecCapability) -> RTCRtpCodecCapability {
    RTCRtpCodecCapability {
        mime_type: capability.mime_type.clone(),
        clock_rate: capability.clock_rate,
        channels: capability.channels,
        sdp_fmtp_line: capability.sdp_fmtp_line.clone(),
        rtcp_feedback: vec![],
    }
}

fn from_rtc_capability(capability: RTCRtpCodecCapability) -> CodecCapability {
    CodecCapability {
        mime_type: capability.mime_type,
        clock_rate: capability.clock_rate,
        channels: capability.channels,
        sdp_fmtp_line: capability.sdp_fmtp_line,
    }
}

/// Subscribed remote track
pub struct RemoteTrack {
    track: Arc<TrackRemote>,
}

impl RemoteTrack {
    /// Wrap a track delivered by `on_track`
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl InboundTrack for RemoteTrack {
    fn id(&self) -> String {
        self.track.id()
    }

    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    fn codec(&self) -> CodecCapability {
        from_rtc_capability(self.track.codec().capability)
    }

    async fn read_packet(&self) -> Result<Packet> {
        let (packet, _attributes) = self.track.read_rtp().await.map_err(read_error)?;
        Ok(packet)
    }
}

/// Closed receivers and buffers end the stream; anything else is a failure
fn read_error(err: webrtc::Error) -> BridgeError {
    use webrtc::{interceptor, util};

    match err {
        webrtc::Error::ErrClosedPipe
        | webrtc::Error::Util(util::Error::ErrBufferClosed)
        | webrtc::Error::Interceptor(interceptor::Error::ErrIoEOF)
        | webrtc::Error::Interceptor(interceptor::Error::Util(util::Error::ErrBufferClosed)) => {
            BridgeError::EndOfStream
        }
        other => BridgeError::Read(other.to_string()),
    }
}

/// Published local track
///
/// Frames are forwarded packet by packet so the original packetization is
/// kept. The track rewrites SSRC and payload type for each binding.
pub struct LocalTrack {
    track: Arc<TrackLocalStaticRTP>,
}

impl LocalTrack {
    /// Wrap a track already added to a peer connection
    pub fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl OutboundTrack for LocalTrack {
    fn id(&self) -> String {
        self.track.id().to_string()
    }

    async fn write_frame(&self, frame: &Frame) -> Result<()> {
        for packet in &frame.packets {
            self.track
                .write_rtp(packet)
                .await
                .map_err(|e| BridgeError::Write(e.to_string()))?;
        }
        Ok(())
    }
}

/// Sends a Picture Loss Indication on the subscribing peer connection
pub struct PliWriter {
    // Weak: the peer connection's on_track handler owns this writer
    peer_connection: Weak<RTCPeerConnection>,
}

impl PliWriter {
    /// Writer for the peer connection receiving the tracks
    pub fn new(peer_connection: &Arc<RTCPeerConnection>) -> Self {
        Self {
            peer_connection: Arc::downgrade(peer_connection),
        }
    }
}

impl KeyframeRequester for PliWriter {
    fn request_keyframe(&self, ssrc: u32) {
        let Some(peer_connection) = self.peer_connection.upgrade() else {
            return;
        };

        tokio::spawn(async move {
            let packets: Vec<Box<dyn RtcpPacket + Send + Sync>> = vec![Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc: ssrc,
            })];
            match peer_connection.write_rtcp(&packets).await {
                Ok(_) => tracing::debug!("Sent PLI for SSRC {}", ssrc),
                Err(e) => tracing::debug!("Failed to send PLI for SSRC {}: {}", ssrc, e),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use webrtc::{interceptor, util};

    #[test]
    fn closed_streams_end_the_stream() {
        for err in [
            webrtc::Error::ErrClosedPipe,
            webrtc::Error::Util(util::Error::ErrBufferClosed),
            webrtc::Error::Interceptor(interceptor::Error::ErrIoEOF),
        ] {
            assert!(matches!(read_error(err), BridgeError::EndOfStream));
        }
    }

    #[test]
    fn other_read_errors_are_failures() {
        // The message text does not matter, only the error kind
        let err = read_error(webrtc::Error::new("socket closed by peer".to_string()));
        assert!(matches!(err, BridgeError::Read(reason) if reason.contains("closed")));
        assert!(matches!(
            read_error(webrtc::Error::ErrRTPTooShort),
            BridgeError::Read(_)
        ));
    }
}
