//! Gateway opcodes.

use crate::ProtoError;

/// Gateway opcodes understood by a presence client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OpCode {
    /// Event dispatch (server → client).
    Dispatch = 0,
    /// Heartbeat (client → server; server may also request one).
    Heartbeat = 1,
    /// Identify handshake (client → server).
    Identify = 2,
    /// Presence update (client → server).
    PresenceUpdate = 3,
    /// Resume a prior session (client → server).
    Resume = 6,
    /// Server asks the client to reconnect.
    Reconnect = 7,
    /// Session was invalidated.
    InvalidSession = 9,
    /// First frame after connecting, carries the heartbeat interval.
    Hello = 10,
    /// Heartbeat acknowledged.
    HeartbeatAck = 11,
}

impl OpCode {
    /// Raw wire value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OpCode {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Dispatch),
            1 => Ok(Self::Heartbeat),
            2 => Ok(Self::Identify),
            3 => Ok(Self::PresenceUpdate),
            6 => Ok(Self::Resume),
            7 => Ok(Self::Reconnect),
            9 => Ok(Self::InvalidSession),
            10 => Ok(Self::Hello),
            11 => Ok(Self::HeartbeatAck),
            other => Err(ProtoError::UnknownOpCode(other)),
        }
    }
}

impl From<OpCode> for u8 {
    fn from(op: OpCode) -> Self {
        op.as_u8()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case(0, OpCode::Dispatch ; "dispatch")]
    #[test_case(1, OpCode::Heartbeat ; "heartbeat")]
    #[test_case(2, OpCode::Identify ; "identify")]
    #[test_case(3, OpCode::PresenceUpdate ; "presence update")]
    #[test_case(6, OpCode::Resume ; "resume")]
    #[test_case(7, OpCode::Reconnect ; "reconnect")]
    #[test_case(9, OpCode::InvalidSession ; "invalid session")]
    #[test_case(10, OpCode::Hello ; "hello")]
    #[test_case(11, OpCode::HeartbeatAck ; "heartbeat ack")]
    fn test_opcode_wire_values(raw: u8, op: OpCode) {
        assert_eq!(OpCode::try_from(raw).unwrap(), op);
        assert_eq!(u8::from(op), raw);
    }

    #[test_case(4 ; "voice state")]
    #[test_case(8 ; "request members")]
    #[test_case(12 ; "past the end")]
    #[test_case(255 ; "max")]
    fn test_unknown_opcode_rejected(raw: u8) {
        let err = OpCode::try_from(raw).unwrap_err();
        assert!(matches!(err, ProtoError::UnknownOpCode(v) if v == raw));
    }
}
