//! Reassembler lateness configuration

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::codec::{codec_for, FrameCodec, MediaKind};
use crate::error::MediaError;
use crate::reassembler::FrameReassembler;

/// Preset lateness windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LatencyProfile {
    /// Video 1000 packets (~2s at 1080p), audio 200 packets (~4s)
    #[default]
    Conservative,
    /// Video 100 packets (~0.2s), audio 5 packets (~0.1s)
    LowLatency,
}

/// Maximum lateness, in packets, tolerated per track kind
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReassemblerConfig {
    pub max_video_late: u16,
    pub max_audio_late: u16,
    /// Per mime type overrides (lowercase keys)
    overrides: HashMap<String, u16>,
}

impl ReassemblerConfig {
    /// Explicit windows with no overrides
    pub fn new(max_video_late: u16, max_audio_late: u16) -> Self {
        Self {
            max_video_late,
            max_audio_late,
            overrides: HashMap::new(),
        }
    }

    /// Windows of a preset profile
    pub fn from_profile(profile: LatencyProfile) -> Self {
        match profile {
            LatencyProfile::Conservative => Self::new(1000, 200),
            LatencyProfile::LowLatency => Self::new(100, 5),
        }
    }

    /// Use a dedicated window for one codec
    pub fn with_override(mut self, mime_type: &str, max_late: u16) -> Self {
        self.overrides
            .insert(mime_type.to_ascii_lowercase(), max_late);
        self
    }

    /// Window for a codec: its override, else its kind's window
    pub fn max_late_for(&self, codec: &dyn FrameCodec) -> u16 {
        if let Some(max_late) = self.overrides.get(&codec.mime_type().to_ascii_lowercase()) {
            return *max_late;
        }
        match codec.kind() {
            MediaKind::Video => self.max_video_late,
            MediaKind::Audio => self.max_audio_late,
        }
    }

    /// Build a reassembler for the given mime type
    pub fn build(&self, mime_type: &str) -> Result<FrameReassembler, MediaError> {
        let codec =
            codec_for(mime_type).ok_or_else(|| MediaError::UnsupportedCodec(mime_type.to_string()))?;
        let max_late = self.max_late_for(codec.as_ref());
        Ok(FrameReassembler::new(codec, max_late))
    }
}

impl Default for ReassemblerConfig {
    fn default() -> Self {
        Self::from_profile(LatencyProfile::default())
    }
}
