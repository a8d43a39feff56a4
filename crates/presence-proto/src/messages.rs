//! Gateway frame definitions.
//!
//! Every frame on the socket is a JSON envelope `{op, d, s, t}`. Inbound
//! frames are classified into [`GatewayEvent`]; the client only ever sends
//! the handful of frames in [`ClientFrame`].

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::opcode::OpCode;
use crate::types::{IdentifyPayload, PresencePayload, ResumePayload};
use crate::ProtoError;

/// Raw frame envelope as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Opcode.
    pub op: u8,
    /// Opcode-specific payload.
    #[serde(default)]
    pub d: Value,
    /// Sequence number, dispatch frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name, dispatch frames only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl Envelope {
    /// Build a non-dispatch envelope.
    #[must_use]
    pub fn new(op: OpCode, d: Value) -> Self {
        Self {
            op: op.as_u8(),
            d,
            s: None,
            t: None,
        }
    }

    /// Hello frame announcing the heartbeat interval in milliseconds.
    #[must_use]
    pub fn hello(heartbeat_interval_ms: u64) -> Self {
        Self::new(
            OpCode::Hello,
            json!({ "heartbeat_interval": heartbeat_interval_ms }),
        )
    }

    /// Heartbeat acknowledgement.
    #[must_use]
    pub fn heartbeat_ack() -> Self {
        Self::new(OpCode::HeartbeatAck, Value::Null)
    }

    /// Server request for an immediate heartbeat.
    #[must_use]
    pub fn heartbeat_request() -> Self {
        Self::new(OpCode::Heartbeat, Value::Null)
    }

    /// Reconnect request.
    #[must_use]
    pub fn reconnect() -> Self {
        Self::new(OpCode::Reconnect, Value::Null)
    }

    /// Invalid session notice.
    #[must_use]
    pub fn invalid_session(resumable: bool) -> Self {
        Self::new(OpCode::InvalidSession, Value::Bool(resumable))
    }

    /// Dispatch of a named event.
    #[must_use]
    pub fn dispatch(sequence: u64, event: impl Into<String>, d: Value) -> Self {
        Self {
            op: OpCode::Dispatch.as_u8(),
            d,
            s: Some(sequence),
            t: Some(event.into()),
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        serde_json::to_string(self).map_err(|e| ProtoError::Encoding(e.to_string()))
    }

    /// Deserialize from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid envelope.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        serde_json::from_str(json).map_err(|e| ProtoError::Decoding(e.to_string()))
    }
}

/// User object carried by READY; only the fields the client logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyUser {
    /// Username.
    pub username: String,
}

/// Payload of the READY dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadyPayload {
    /// Session identifier for resuming.
    pub session_id: String,
    /// Gateway URL to use when resuming.
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// Authenticated user.
    #[serde(default)]
    pub user: Option<ReadyUser>,
}

/// Dispatch events the client interprets; everything else is `Other`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchEvent {
    /// Handshake completed.
    Ready(ReadyPayload),
    /// Resume completed.
    Resumed,
    /// Any other event, by name.
    Other(String),
}

impl DispatchEvent {
    /// Event name as sent by the gateway.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Ready(_) => "READY",
            Self::Resumed => "RESUMED",
            Self::Other(name) => name,
        }
    }
}

/// An inbound frame, classified by opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEvent {
    /// Opcode 10.
    Hello {
        /// Heartbeat interval in milliseconds.
        heartbeat_interval: u64,
    },
    /// Opcode 11.
    HeartbeatAck,
    /// Opcode 1 sent by the server: heartbeat now.
    HeartbeatRequest,
    /// Opcode 7.
    Reconnect,
    /// Opcode 9.
    InvalidSession {
        /// Whether the session may be resumed.
        resumable: bool,
    },
    /// Opcode 0.
    Dispatch {
        /// Sequence number.
        sequence: Option<u64>,
        /// Event.
        event: DispatchEvent,
    },
}

impl GatewayEvent {
    /// Parse and classify a text frame.
    ///
    /// # Errors
    ///
    /// Returns an error for malformed JSON, unknown or client-bound opcodes,
    /// and payloads missing the fields the client depends on.
    pub fn from_json(json: &str) -> Result<Self, ProtoError> {
        Self::from_envelope(Envelope::from_json(json)?)
    }

    /// Classify an already-decoded envelope.
    ///
    /// # Errors
    ///
    /// See [`GatewayEvent::from_json`].
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtoError> {
        match OpCode::try_from(envelope.op)? {
            OpCode::Hello => {
                let interval = envelope
                    .d
                    .get("heartbeat_interval")
                    .and_then(Value::as_u64)
                    .ok_or(ProtoError::MissingField("heartbeat_interval"))?;
                Ok(Self::Hello {
                    heartbeat_interval: interval,
                })
            }
            OpCode::HeartbeatAck => Ok(Self::HeartbeatAck),
            OpCode::Heartbeat => Ok(Self::HeartbeatRequest),
            OpCode::Reconnect => Ok(Self::Reconnect),
            OpCode::InvalidSession => Ok(Self::InvalidSession {
                resumable: envelope.d.as_bool().unwrap_or(false),
            }),
            OpCode::Dispatch => {
                let name = envelope.t.ok_or(ProtoError::MissingField("t"))?;
                let event = match name.as_str() {
                    "READY" => DispatchEvent::Ready(
                        serde_json::from_value(envelope.d)
                            .map_err(|e| ProtoError::Decoding(format!("READY payload: {e}")))?,
                    ),
                    "RESUMED" => DispatchEvent::Resumed,
                    _ => DispatchEvent::Other(name),
                };
                Ok(Self::Dispatch {
                    sequence: envelope.s,
                    event,
                })
            }
            op @ (OpCode::Identify | OpCode::PresenceUpdate | OpCode::Resume) => Err(
                ProtoError::Decoding(format!("opcode {op:?} is client-bound")),
            ),
        }
    }
}

/// Frames the client sends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Opcode 1 with the last sequence, or null.
    Heartbeat(Option<u64>),
    /// Opcode 2.
    Identify(IdentifyPayload),
    /// Opcode 3.
    PresenceUpdate(PresencePayload),
    /// Opcode 6.
    Resume(ResumePayload),
}

#[derive(Serialize)]
struct Outbound<'a, T: Serialize> {
    op: u8,
    d: &'a T,
}

impl ClientFrame {
    /// Opcode of this frame.
    #[must_use]
    pub const fn op(&self) -> OpCode {
        match self {
            Self::Heartbeat(_) => OpCode::Heartbeat,
            Self::Identify(_) => OpCode::Identify,
            Self::PresenceUpdate(_) => OpCode::PresenceUpdate,
            Self::Resume(_) => OpCode::Resume,
        }
    }

    /// Serialize to JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> Result<String, ProtoError> {
        let op = self.op().as_u8();
        let encoded = match self {
            Self::Heartbeat(seq) => serde_json::to_string(&Outbound { op, d: seq }),
            Self::Identify(payload) => serde_json::to_string(&Outbound { op, d: payload }),
            Self::PresenceUpdate(payload) => serde_json::to_string(&Outbound { op, d: payload }),
            Self::Resume(payload) => serde_json::to_string(&Outbound { op, d: payload }),
        };
        encoded.map_err(|e| ProtoError::Encoding(e.to_string()))
    }
}
