//! Error types for protocol operations

use thiserror::Error;

/// Protocol-specific errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Connection closed before a complete frame was received
    #[error("connection closed mid-frame")]
    ShortRead,

    /// Frame too large
    #[error("frame too large: {size} bytes (max: {max})")]
    FrameTooLarge {
        /// Declared or actual payload size
        size: usize,
        /// Maximum allowed size
        max: usize,
    },

    /// Payload could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Payload could not be deserialized
    #[error("decode error: {0}")]
    Decode(String),

    /// Transport I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rmp_serde::encode::Error> for ProtocolError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Encode(err.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ProtocolError {
    fn from(err: rmp_serde::decode::Error) -> Self {
        Self::Decode(err.to_string())
    }
}
