//! Codec framing rules
//!
//! Each supported codec gets its own [`FrameCodec`] variant. The variants reuse
//! the webrtc-rs depacketizers for payload extraction and only decide where a
//! frame starts and ends. Adding a codec means adding a variant and listing it
//! in [`supported_codecs`].

use std::fmt;

use bytes::{Bytes, BytesMut};
use webrtc::rtp::codecs::h264::H264Packet;
use webrtc::rtp::codecs::opus::OpusPacket;
use webrtc::rtp::codecs::vp8::Vp8Packet;
use webrtc::rtp::packet::Packet;
use webrtc::rtp::packetizer::Depacketizer;

use crate::error::MediaError;

pub const MIME_TYPE_VP8: &str = "video/VP8";
pub const MIME_TYPE_H264: &str = "video/H264";
pub const MIME_TYPE_OPUS: &str = "audio/opus";

/// Media kind of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MediaKind {
    Audio,
    Video,
}

impl MediaKind {
    /// Derive the kind from a mime type prefix ("audio/..." or "video/...")
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let (kind, _) = mime_type.split_once('/')?;
        if kind.eq_ignore_ascii_case("audio") {
            Some(Self::Audio)
        } else if kind.eq_ignore_ascii_case("video") {
            Some(Self::Video)
        } else {
            None
        }
    }
}

impl fmt::Display for MediaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Audio => write!(f, "audio"),
            Self::Video => write!(f, "video"),
        }
    }
}

/// Codec capability advertised by a track
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CodecCapability {
    pub mime_type: String,
    pub clock_rate: u32,
    pub channels: u16,
    pub sdp_fmtp_line: String,
}

impl CodecCapability {
    /// Capability with no channels or fmtp line
    pub fn new(mime_type: impl Into<String>, clock_rate: u32) -> Self {
        Self {
            mime_type: mime_type.into(),
            clock_rate,
            ..Default::default()
        }
    }

    /// Kind implied by the mime type prefix, if any
    pub fn kind(&self) -> Option<MediaKind> {
        MediaKind::from_mime_type(&self.mime_type)
    }
}

/// Codec-specific frame boundary detection and depacketization
///
/// The reassembler feeds packets of one frame in sequence order through
/// `consume` until `frame_complete` reports true, then takes the payload with
/// `emit_frame`.
pub trait FrameCodec: Send {
    /// Canonical mime type of this codec
    fn mime_type(&self) -> &'static str;

    fn kind(&self) -> MediaKind;

    /// Whether this codec handles the given mime type (case-insensitive)
    fn matches(&self, mime_type: &str) -> bool {
        self.mime_type().eq_ignore_ascii_case(mime_type)
    }

    /// Whether the packet begins a new frame
    fn is_frame_start(&self, packet: &Packet) -> bool;

    /// Add the next packet of the current frame
    fn consume(&mut self, packet: &Packet) -> Result<(), MediaError>;

    /// Whether the last consumed packet terminated the frame
    fn frame_complete(&self) -> bool;

    /// Take the assembled payload and start a new frame
    fn emit_frame(&mut self) -> Bytes;

    /// Discard a partially assembled frame
    fn reset(&mut self);
}

/// Look up the framing rules for a mime type
pub fn codec_for(mime_type: &str) -> Option<Box<dyn FrameCodec>> {
    supported_codecs()
        .into_iter()
        .find(|codec| codec.matches(mime_type))
}

/// One fresh instance of every supported codec
pub fn supported_codecs() -> Vec<Box<dyn FrameCodec>> {
    vec![
        Box::new(Vp8Codec::default()),
        Box::new(H264Codec::default()),
        Box::new(OpusCodec::default()),
    ]
}

/// Accumulates depacketized payload of the frame in progress
#[derive(Default)]
struct Accumulator<D> {
    depacketizer: D,
    data: BytesMut,
    complete: bool,
}

impl<D: Depacketizer + Default> Accumulator<D> {
    fn push(&mut self, mime_type: &str, packet: &Packet) -> Result<(), MediaError> {
        let payload = self
            .depacketizer
            .depacketize(&packet.payload)
            .map_err(|e| MediaError::Depacketize {
                mime_type: mime_type.to_string(),
                reason: e.to_string(),
            })?;
        self.data.extend_from_slice(&payload);
        self.complete = self
            .depacketizer
            .is_partition_tail(packet.header.marker, &packet.payload);
        Ok(())
    }

    fn is_head(&self, packet: &Packet) -> bool {
        self.depacketizer.is_partition_head(&packet.payload)
    }

    fn take(&mut self) -> Bytes {
        self.complete = false;
        self.data.split().freeze()
    }

    fn clear(&mut self) {
        self.depacketizer = D::default();
        self.data.clear();
        self.complete = false;
    }
}

/// VP8 (RFC 7741): a frame starts on a packet with the S bit set in the
/// payload descriptor and ends on the RTP marker bit
#[derive(Default)]
pub struct Vp8Codec {
    inner: Accumulator<Vp8Packet>,
}

impl FrameCodec for Vp8Codec {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_VP8
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn is_frame_start(&self, packet: &Packet) -> bool {
        self.inner.is_head(packet)
    }

    fn consume(&mut self, packet: &Packet) -> Result<(), MediaError> {
        self.inner.push(MIME_TYPE_VP8, packet)
    }

    fn frame_complete(&self) -> bool {
        self.inner.complete
    }

    fn emit_frame(&mut self) -> Bytes {
        self.inner.take()
    }

    fn reset(&mut self) {
        self.inner.clear();
    }
}

/// H.264 (RFC 6184): single NAL, STAP-A and the first FU-A fragment start a
/// frame, the RTP marker bit ends the access unit. Output is Annex B.
#[derive(Default)]
pub struct H264Codec {
    inner: Accumulator<H264Packet>,
}

impl FrameCodec for H264Codec {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_H264
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Video
    }

    fn is_frame_start(&self, packet: &Packet) -> bool {
        self.inner.is_head(packet)
    }

    fn consume(&mut self, packet: &Packet) -> Result<(), MediaError> {
        self.inner.push(MIME_TYPE_H264, packet)
    }

    fn frame_complete(&self) -> bool {
        self.inner.complete
    }

    fn emit_frame(&mut self) -> Bytes {
        self.inner.take()
    }

    fn reset(&mut self) {
        self.inner.clear();
    }
}

/// Opus (RFC 7587): every packet carries exactly one frame
#[derive(Default)]
pub struct OpusCodec {
    inner: Accumulator<OpusPacket>,
}

impl FrameCodec for OpusCodec {
    fn mime_type(&self) -> &'static str {
        MIME_TYPE_OPUS
    }

    fn kind(&self) -> MediaKind {
        MediaKind::Audio
    }

    fn is_frame_start(&self, packet: &Packet) -> bool {
        !packet.payload.is_empty()
    }

    fn consume(&mut self, packet: &Packet) -> Result<(), MediaError> {
        self.inner.push(MIME_TYPE_OPUS, packet)?;
        self.inner.complete = true;
        Ok(())
    }

    fn frame_complete(&self) -> bool {
        self.inner.complete
    }

    fn emit_frame(&mut self) -> Bytes {
        self.inner.take()
    }

    fn reset(&mut self) {
        self.inner.clear();
    }
}
