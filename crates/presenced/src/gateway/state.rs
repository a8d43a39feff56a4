//! Session state types.

use std::fmt;
use std::time::Duration;

use presence_proto::{PresencePayload, Status};

use crate::config::Token;

/// Phase of the gateway session lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No connection and none scheduled.
    Disconnected,
    /// Resolving the endpoint and opening the socket.
    Connecting,
    /// Socket open, waiting for Hello.
    AwaitingHello,
    /// Identify (or resume) sent, waiting for READY / RESUMED.
    Identifying,
    /// Session established.
    Ready,
    /// Socket closed, reconnect scheduled.
    ReconnectBackoff,
    /// Permanently stopped.
    Terminated,
}

impl Phase {
    /// Phases in which a socket exists or is being opened.
    #[must_use]
    pub const fn is_live(self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::AwaitingHello | Self::Identifying | Self::Ready
        )
    }

    /// Phases in which the socket is open and writable.
    #[must_use]
    pub const fn socket_open(self) -> bool {
        matches!(self, Self::AwaitingHello | Self::Identifying | Self::Ready)
    }

    /// Phases in which the heartbeat must be running.
    #[must_use]
    pub const fn heartbeat_expected(self) -> bool {
        matches!(self, Self::Identifying | Self::Ready)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting-hello",
            Self::Identifying => "identifying",
            Self::Ready => "ready",
            Self::ReconnectBackoff => "reconnect-backoff",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Presence the client wants to show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    /// Status.
    pub status: Status,
    /// Custom status text.
    pub custom_text: String,
}

impl Presence {
    /// Create a presence.
    #[must_use]
    pub fn new(status: Status, custom_text: impl Into<String>) -> Self {
        Self {
            status,
            custom_text: custom_text.into(),
        }
    }

    /// Wire payload for this presence.
    #[must_use]
    pub fn to_payload(&self) -> PresencePayload {
        PresencePayload::with_custom_status(self.status, self.custom_text.clone())
    }
}

/// Mutable identity of the current connection attempt.
///
/// Owned by the session machine; nothing else writes to it.
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) token: Token,
    pub(crate) phase: Phase,
    pub(crate) sequence: Option<u64>,
    pub(crate) session_id: Option<String>,
    pub(crate) resume_gateway_url: Option<String>,
    pub(crate) reconnect_attempts: u32,
    pub(crate) presence: Presence,
    pub(crate) heartbeat_interval: Option<Duration>,
    pub(crate) heartbeat_acked: bool,
    pub(crate) heartbeat_running: bool,
    pub(crate) has_connected: bool,
}

impl SessionState {
    /// Fresh state for a process that has not connected yet.
    #[must_use]
    pub fn new(token: Token, presence: Presence) -> Self {
        Self {
            token,
            phase: Phase::Disconnected,
            sequence: None,
            session_id: None,
            resume_gateway_url: None,
            reconnect_attempts: 0,
            presence,
            heartbeat_interval: None,
            heartbeat_acked: true,
            heartbeat_running: false,
            has_connected: false,
        }
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Last dispatch sequence seen.
    #[must_use]
    pub const fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Session id from READY.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    /// Consecutive abnormal closes since the last established session.
    #[must_use]
    pub const fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Desired presence.
    #[must_use]
    pub const fn presence(&self) -> &Presence {
        &self.presence
    }

    /// Interval from the last Hello.
    #[must_use]
    pub const fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval
    }

    /// Whether the heartbeat is supposed to be running.
    #[must_use]
    pub const fn heartbeat_running(&self) -> bool {
        self.heartbeat_running
    }

    /// Whether the last heartbeat was acknowledged.
    #[must_use]
    pub const fn heartbeat_acked(&self) -> bool {
        self.heartbeat_acked
    }

    /// Whether both a session id and a sequence are available to resume.
    #[must_use]
    pub const fn can_resume(&self) -> bool {
        self.session_id.is_some() && self.sequence.is_some()
    }

    /// Forget the session so the next handshake is a fresh identify.
    pub(crate) fn clear_session(&mut self) {
        self.session_id = None;
        self.sequence = None;
        self.resume_gateway_url = None;
    }

    /// Point-in-time copy for observers.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            phase: self.phase,
            status: self.presence.status,
            custom_text: self.presence.custom_text.clone(),
            sequence: self.sequence,
            session_id: self.session_id.clone(),
            reconnect_attempts: self.reconnect_attempts,
            heartbeat_interval: self.heartbeat_interval,
        }
    }
}

/// Read-only view of the session, safe to hand to other tasks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Phase.
    pub phase: Phase,
    /// Desired status.
    pub status: Status,
    /// Desired custom status text.
    pub custom_text: String,
    /// Last sequence.
    pub sequence: Option<u64>,
    /// Session id.
    pub session_id: Option<String>,
    /// Reconnect attempts.
    pub reconnect_attempts: u32,
    /// Heartbeat interval.
    pub heartbeat_interval: Option<Duration>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> SessionState {
        SessionState::new(
            Token::new("t".repeat(60)),
            Presence::new(Status::Online, "24/7 Online"),
        )
    }

    #[test]
    fn test_initial_state() {
        let state = state();
        assert_eq!(state.phase(), Phase::Disconnected);
        assert_eq!(state.sequence(), None);
        assert_eq!(state.session_id(), None);
        assert_eq!(state.reconnect_attempts(), 0);
        assert_eq!(state.heartbeat_interval(), None);
        assert!(!state.heartbeat_running());
        assert!(!state.can_resume());
    }

    #[test]
    fn test_phase_classification() {
        assert!(Phase::Connecting.is_live());
        assert!(!Phase::Connecting.socket_open());
        assert!(Phase::AwaitingHello.socket_open());
        assert!(!Phase::AwaitingHello.heartbeat_expected());
        assert!(Phase::Identifying.heartbeat_expected());
        assert!(Phase::Ready.heartbeat_expected());
        assert!(!Phase::ReconnectBackoff.is_live());
        assert!(!Phase::Terminated.is_live());
        assert!(!Phase::Disconnected.socket_open());
    }

    #[test]
    fn test_clear_session() {
        let mut state = state();
        state.session_id = Some("abc".to_string());
        state.sequence = Some(12);
        state.resume_gateway_url = Some("wss://resume.example.com".to_string());
        assert!(state.can_resume());

        state.clear_session();

        assert!(!state.can_resume());
        assert_eq!(state.sequence(), None);
        assert!(state.resume_gateway_url.is_none());
    }

    #[test]
    fn test_snapshot_copies_fields() {
        let mut state = state();
        state.phase = Phase::Ready;
        state.sequence = Some(5);
        state.reconnect_attempts = 2;

        let snapshot = state.snapshot();
        assert_eq!(snapshot.phase, Phase::Ready);
        assert_eq!(snapshot.sequence, Some(5));
        assert_eq!(snapshot.reconnect_attempts, 2);
        assert_eq!(snapshot.custom_text, "24/7 Online");
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::AwaitingHello.to_string(), "awaiting-hello");
        assert_eq!(Phase::ReconnectBackoff.to_string(), "reconnect-backoff");
    }
}
