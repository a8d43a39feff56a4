//! Presence publishing.

use presence_proto::ClientFrame;

use super::state::{Phase, Presence};

/// Result of a presence change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// A presence update frame was written to the socket.
    Sent,
    /// No socket was open; the change applies to the next handshake.
    Skipped,
}

/// Build the opcode-3 frame for `presence`, or `None` when `phase` has no
/// open socket to send it on.
#[must_use]
pub fn presence_update(presence: &Presence, phase: Phase) -> Option<ClientFrame> {
    phase
        .socket_open()
        .then(|| ClientFrame::PresenceUpdate(presence.to_payload()))
}
