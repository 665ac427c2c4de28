//! Media utilities for roombridge
//!
//! This crate turns a stream of RTP packets into complete media frames:
//! - Codec framing rules (VP8, H.264, Opus) behind the [`FrameCodec`] trait
//! - A bounded reordering buffer ([`FrameReassembler`]) with loss reporting
//! - Lateness presets for conservative and low-latency relaying

pub mod codec;
pub mod config;
pub mod error;
pub mod frame;
pub mod reassembler;

pub use codec::{
    codec_for, supported_codecs, CodecCapability, FrameCodec, H264Codec, MediaKind, OpusCodec,
    Vp8Codec, MIME_TYPE_H264, MIME_TYPE_OPUS, MIME_TYPE_VP8,
};
pub use config::{LatencyProfile, ReassemblerConfig};
pub use error::MediaError;
pub use frame::Frame;
pub use reassembler::{FrameReassembler, Pop};
