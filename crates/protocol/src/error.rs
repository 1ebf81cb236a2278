//! Errors raised while encoding, decoding or parsing protocol values.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A message could not be encoded.
    #[error("cannot encode message: {0}")]
    Serialization(String),

    /// A line is not a valid envelope.
    #[error("malformed message: {0}")]
    Deserialization(String),

    /// A flag name that is not part of the vocabulary.
    #[error("invalid flag name: {0}")]
    InvalidFlags(String),

    /// Peer speaks a different protocol version.
    #[error("protocol version mismatch: expected {expected}, got {got}")]
    VersionMismatch { expected: u8, got: u8 },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl From<serde_json::Error> for ProtocolError {
    fn from(err: serde_json::Error) -> Self {
        // Encoding only fails on I/O or non-string map keys; everything
        // else is a bad line.
        if err.is_io() {
            ProtocolError::Serialization(err.to_string())
        } else {
            ProtocolError::Deserialization(err.to_string())
        }
    }
}
