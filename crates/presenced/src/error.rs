//! Error types for presenced.

use thiserror::Error;

/// Endpoint discovery failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The HTTP request failed or returned a non-success status.
    #[error("discovery request failed: {0}")]
    Request(String),

    /// The response body was not the expected JSON.
    #[error("discovery response malformed: {0}")]
    Malformed(String),

    /// The advertised URL is not a usable WebSocket URL.
    #[error("invalid gateway url '{url}': {reason}")]
    InvalidUrl {
        /// URL as received.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Errors that can occur in presenced.
#[derive(Debug, Error)]
pub enum PresenceError {
    /// Missing or malformed configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Gateway endpoint could not be resolved at startup.
    #[error("endpoint discovery failed: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Reconnect budget used up.
    #[error("gave up after {attempts} reconnect attempts")]
    ExhaustedRetries {
        /// Attempts made before giving up.
        attempts: u32,
    },

    /// The session task is gone.
    #[error("session closed")]
    SessionClosed,

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] presence_proto::ProtoError),
}

impl PresenceError {
    /// Process exit code for this error.
    #[must_use]
    pub const fn exit_code(&self) -> i32 {
        1
    }
}
