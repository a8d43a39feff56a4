//! # presence-proto
//!
//! Protocol definitions for the real-time gateway: the `{op, d, s, t}`
//! frame envelope, opcodes, typed inbound events and the outbound frames a
//! presence client sends.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod messages;
pub mod opcode;
pub mod types;

pub use error::ProtoError;
pub use messages::{ClientFrame, DispatchEvent, Envelope, GatewayEvent, ReadyPayload, ReadyUser};
pub use opcode::OpCode;
pub use types::{
    Activity, ActivityKind, ConnectionProperties, IdentifyPayload, PresencePayload, ResumePayload,
    Status,
};

/// Gateway API version requested in the connection URL.
pub const GATEWAY_VERSION: u8 = 9;

/// Payload encoding requested in the connection URL.
pub const GATEWAY_ENCODING: &str = "json";
