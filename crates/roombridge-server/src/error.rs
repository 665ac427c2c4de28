use thiserror::Error;

use roombridge_media::MediaError;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Failed to connect to room {room}: {reason}")]
    Connection { room: String, reason: String },

    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Failed to publish track: {0}")]
    Publish(String),

    #[error("Inbound track ended")]
    EndOfStream,

    #[error("Inbound track read failed: {0}")]
    Read(String),

    #[error("Outbound track write failed: {0}")]
    Write(String),

    #[error("Signaling error: {0}")]
    Signaling(String),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Token error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),
}

impl BridgeError {
    /// Connection failure for `room`
    pub fn connection(room: impl Into<String>, reason: impl ToString) -> Self {
        Self::Connection {
            room: room.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<MediaError> for BridgeError {
    fn from(err: MediaError) -> Self {
        match err {
            MediaError::UnsupportedCodec(mime_type) => Self::UnsupportedCodec(mime_type),
            other => Self::Read(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
