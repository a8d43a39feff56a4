//! Error types for the presence-proto crate.

use thiserror::Error;

/// Errors that can occur during protocol operations.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// Failed to encode a frame.
    #[error("encoding error: {0}")]
    Encoding(String),

    /// Failed to decode a frame.
    #[error("decoding error: {0}")]
    Decoding(String),

    /// Opcode outside the known set.
    #[error("unknown opcode: {0}")]
    UnknownOpCode(u8),

    /// Missing required field.
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Unrecognized presence status.
    #[error("invalid status: {0}")]
    InvalidStatus(String),
}
