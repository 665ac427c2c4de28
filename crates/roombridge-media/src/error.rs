use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    #[error("Unsupported codec: {0}")]
    UnsupportedCodec(String),

    #[error("Failed to depacketize {mime_type} payload: {reason}")]
    Depacketize { mime_type: String, reason: String },
}
