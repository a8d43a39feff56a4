//! Gateway session state machine.
//!
//! [`SessionMachine::handle`] applies one [`Trigger`] to the session state
//! and returns the [`Action`]s the driver must perform. The machine does no
//! I/O, so every transition can be exercised with synthetic frames.

use std::time::Duration;

use presence_proto::{
    ClientFrame, ConnectionProperties, DispatchEvent, GatewayEvent, IdentifyPayload, ResumePayload,
    Status,
};
use tracing::{debug, error, info, warn};

use crate::error::DiscoveryError;

use super::presence::presence_update;
use super::reconnect::ReconnectPolicy;
use super::state::{Phase, SessionState};

/// Normal closure.
pub const CLOSE_NORMAL: u16 = 1000;

/// Closure that keeps the session resumable.
pub const CLOSE_RESUMABLE: u16 = 4000;

/// Longest heartbeat interval honored from a Hello.
pub const MAX_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(600);

/// Behavior switches for the machine.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Backoff and retry budget.
    pub policy: ReconnectPolicy,
    /// Treat an unacknowledged heartbeat as a dead connection.
    pub heartbeat_watchdog: bool,
    /// Resume sessions instead of re-identifying.
    pub resume: bool,
    /// Properties declared on identify.
    pub properties: ConnectionProperties,
    /// Intents sent on identify.
    pub intents: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            policy: ReconnectPolicy::default(),
            heartbeat_watchdog: true,
            resume: false,
            properties: ConnectionProperties::default(),
            intents: 0,
        }
    }
}

/// Something that happened to the session.
#[derive(Debug)]
pub enum Trigger {
    /// Start the first connection.
    Connect,
    /// A scheduled reconnect is due.
    ReconnectDue,
    /// Endpoint discovery failed.
    DiscoveryFailed(DiscoveryError),
    /// The socket opened.
    SocketOpened,
    /// Opening the socket failed.
    SocketFailed(String),
    /// The server closed the socket or it dropped.
    SocketClosed {
        /// Close code, if the server sent one.
        code: Option<u16>,
        /// Close reason.
        reason: String,
    },
    /// Socket-level error; the close that follows drives recovery.
    TransportError(String),
    /// Raw text frame.
    Frame(String),
    /// The heartbeat timer fired.
    HeartbeatTick,
    /// Operator changed the presence.
    UpdatePresence {
        /// New status, if changed.
        status: Option<Status>,
        /// New custom text, if changed.
        custom_text: Option<String>,
    },
    /// Stop for good.
    Shutdown,
}

/// Why the session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Shutdown was requested.
    Shutdown,
    /// The endpoint could not be resolved before any socket opened.
    Discovery(DiscoveryError),
    /// The reconnect budget ran out.
    ExhaustedRetries {
        /// Attempts made.
        attempts: u32,
    },
}

/// Work the driver must perform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Resolve the endpoint (or use `resume_url`) and open a socket.
    Connect {
        /// URL to resume on instead of resolving.
        resume_url: Option<String>,
    },
    /// Write a frame.
    Send(ClientFrame),
    /// Start (or restart) the heartbeat timer.
    StartHeartbeat(Duration),
    /// Stop the heartbeat timer.
    StopHeartbeat,
    /// Close and drop the socket.
    CloseSocket {
        /// Close code to send.
        code: u16,
    },
    /// Fire [`Trigger::ReconnectDue`] after the delay, replacing any
    /// pending reconnect.
    ScheduleReconnect(Duration),
    /// Drop any pending reconnect.
    CancelReconnect,
    /// The session is over.
    Terminate(Termination),
}

/// The session lifecycle state machine.
#[derive(Debug)]
pub struct SessionMachine {
    state: SessionState,
    settings: SessionSettings,
}

impl SessionMachine {
    /// Create a machine around `state`.
    #[must_use]
    pub fn new(state: SessionState, settings: SessionSettings) -> Self {
        Self { state, settings }
    }

    /// Current state.
    #[must_use]
    pub const fn state(&self) -> &SessionState {
        &self.state
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> Phase {
        self.state.phase
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    /// Apply `trigger` and return the resulting actions.
    pub fn handle(&mut self, trigger: Trigger) -> Vec<Action> {
        if self.state.phase == Phase::Terminated {
            debug!(?trigger, "session terminated, ignoring trigger");
            return Vec::new();
        }

        match trigger {
            Trigger::Connect => self.connect(&[Phase::Disconnected, Phase::ReconnectBackoff]),
            Trigger::ReconnectDue => self.connect(&[Phase::ReconnectBackoff]),
            Trigger::DiscoveryFailed(err) => self.discovery_failed(err),
            Trigger::SocketOpened => self.socket_opened(),
            Trigger::SocketFailed(reason) => {
                if self.state.phase != Phase::Connecting {
                    return Vec::new();
                }
                warn!(%reason, "failed to open gateway socket");
                self.connection_lost(None)
            }
            Trigger::SocketClosed { code, reason } => {
                if !self.state.phase.is_live() {
                    debug!(?code, "close for a socket no longer tracked");
                    return Vec::new();
                }
                info!(?code, %reason, phase = %self.state.phase, "gateway connection closed");
                self.connection_lost(None)
            }
            Trigger::TransportError(message) => {
                warn!(%message, "gateway transport error");
                Vec::new()
            }
            Trigger::Frame(text) => match GatewayEvent::from_json(&text) {
                Ok(event) => self.event(event),
                Err(e) => {
                    warn!(error = %e, "dropping malformed gateway frame");
                    Vec::new()
                }
            },
            Trigger::HeartbeatTick => self.heartbeat_tick(),
            Trigger::UpdatePresence {
                status,
                custom_text,
            } => self.update_presence(status, custom_text),
            Trigger::Shutdown => self.shutdown(),
        }
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.state.phase != phase {
            debug!(from = %self.state.phase, to = %phase, "session phase change");
            self.state.phase = phase;
        }
    }

    fn stop_heartbeat(&mut self) -> Vec<Action> {
        if self.state.heartbeat_running {
            self.state.heartbeat_running = false;
            vec![Action::StopHeartbeat]
        } else {
            Vec::new()
        }
    }

    const fn resume_close_code(&self) -> u16 {
        if self.settings.resume {
            CLOSE_RESUMABLE
        } else {
            CLOSE_NORMAL
        }
    }

    fn connect(&mut self, allowed: &[Phase]) -> Vec<Action> {
        if !allowed.contains(&self.state.phase) {
            debug!(phase = %self.state.phase, "connect ignored in this phase");
            return Vec::new();
        }

        let resuming = self.settings.resume && self.state.can_resume();
        if !resuming {
            self.state.clear_session();
        }

        self.set_phase(Phase::Connecting);
        vec![Action::Connect {
            resume_url: if resuming {
                self.state.resume_gateway_url.clone()
            } else {
                None
            },
        }]
    }

    fn discovery_failed(&mut self, err: DiscoveryError) -> Vec<Action> {
        if self.state.phase != Phase::Connecting {
            return Vec::new();
        }

        if self.state.has_connected {
            warn!(error = %err, "gateway discovery failed, treating as dropped connection");
            return self.connection_lost(None);
        }

        error!(error = %err, "failed to resolve gateway endpoint");
        self.set_phase(Phase::Terminated);
        vec![Action::Terminate(Termination::Discovery(err))]
    }

    fn socket_opened(&mut self) -> Vec<Action> {
        if self.state.phase != Phase::Connecting {
            return Vec::new();
        }
        info!("connected to gateway, waiting for hello");
        self.state.has_connected = true;
        self.set_phase(Phase::AwaitingHello);
        Vec::new()
    }

    /// Abnormal loss of the connection: back off or give up.
    fn connection_lost(&mut self, close_code: Option<u16>) -> Vec<Action> {
        let mut actions = self.stop_heartbeat();
        if let Some(code) = close_code {
            actions.push(Action::CloseSocket { code });
        }

        let attempts = self.state.reconnect_attempts;
        if self.settings.policy.should_reconnect(attempts) {
            let delay = self.settings.policy.delay_for_attempt(attempts);
            self.state.reconnect_attempts = attempts + 1;
            info!(?delay, attempt = attempts + 1, "reconnecting after backoff");
            self.set_phase(Phase::ReconnectBackoff);
            actions.push(Action::ScheduleReconnect(delay));
        } else {
            error!(attempts, "max reconnection attempts reached");
            self.set_phase(Phase::Terminated);
            actions.push(Action::Terminate(Termination::ExhaustedRetries { attempts }));
        }
        actions
    }

    fn event(&mut self, event: GatewayEvent) -> Vec<Action> {
        if !self.state.phase.socket_open() {
            debug!(?event, phase = %self.state.phase, "frame for a closed socket ignored");
            return Vec::new();
        }

        match event {
            GatewayEvent::Hello { heartbeat_interval } => self.hello(heartbeat_interval),
            GatewayEvent::HeartbeatAck => {
                debug!("heartbeat acknowledged");
                self.state.heartbeat_acked = true;
                Vec::new()
            }
            GatewayEvent::HeartbeatRequest => {
                debug!("server requested heartbeat");
                vec![Action::Send(ClientFrame::Heartbeat(self.state.sequence))]
            }
            GatewayEvent::Reconnect => {
                info!("reconnect requested by server");
                let mut actions = self.stop_heartbeat();
                actions.push(Action::CloseSocket {
                    code: self.resume_close_code(),
                });
                self.set_phase(Phase::ReconnectBackoff);
                actions.push(Action::ScheduleReconnect(Duration::ZERO));
                actions
            }
            GatewayEvent::InvalidSession { resumable } => {
                let delay = self.settings.policy.invalid_session_delay;
                warn!(resumable, ?delay, "invalid session, reconnecting");
                if !resumable {
                    self.state.clear_session();
                }
                let mut actions = self.stop_heartbeat();
                actions.push(Action::CloseSocket {
                    code: if resumable {
                        self.resume_close_code()
                    } else {
                        CLOSE_NORMAL
                    },
                });
                self.set_phase(Phase::ReconnectBackoff);
                actions.push(Action::ScheduleReconnect(delay));
                actions
            }
            GatewayEvent::Dispatch { sequence, event } => self.dispatch(sequence, event),
        }
    }

    fn hello(&mut self, heartbeat_interval: u64) -> Vec<Action> {
        if self.state.phase != Phase::AwaitingHello {
            warn!(phase = %self.state.phase, "unexpected hello ignored");
            return Vec::new();
        }

        let mut interval = Duration::from_millis(heartbeat_interval);
        if interval > MAX_HEARTBEAT_INTERVAL {
            warn!(heartbeat_interval_ms = heartbeat_interval, "heartbeat interval too long, clamping");
            interval = MAX_HEARTBEAT_INTERVAL;
        }
        self.state.heartbeat_interval = Some(interval);
        self.state.heartbeat_acked = true;
        self.state.heartbeat_running = true;

        let handshake = self.handshake_frame();
        match &handshake {
            ClientFrame::Resume(payload) => {
                info!(session_id = %payload.session_id, seq = payload.seq, "resuming session");
            }
            _ => info!(heartbeat_interval_ms = heartbeat_interval, "identifying with gateway"),
        }

        self.set_phase(Phase::Identifying);
        vec![Action::StartHeartbeat(interval), Action::Send(handshake)]
    }

    fn handshake_frame(&self) -> ClientFrame {
        if self.settings.resume {
            if let (Some(session_id), Some(seq)) = (&self.state.session_id, self.state.sequence) {
                return ClientFrame::Resume(ResumePayload {
                    token: self.state.token.expose().to_string(),
                    session_id: session_id.clone(),
                    seq,
                });
            }
        }

        ClientFrame::Identify(IdentifyPayload {
            token: self.state.token.expose().to_string(),
            properties: self.settings.properties.clone(),
            presence: self.state.presence.to_payload(),
            intents: self.settings.intents,
        })
    }

    fn record_sequence(&mut self, sequence: Option<u64>) {
        let Some(sequence) = sequence else {
            return;
        };
        match self.state.sequence {
            Some(current) if sequence < current => {
                warn!(current, received = sequence, "ignoring out-of-order sequence");
            }
            _ => self.state.sequence = Some(sequence),
        }
    }

    fn dispatch(&mut self, sequence: Option<u64>, event: DispatchEvent) -> Vec<Action> {
        self.record_sequence(sequence);
        debug!(event = event.name(), ?sequence, "dispatch");

        let established = matches!(self.state.phase, Phase::Identifying | Phase::Ready);
        match event {
            DispatchEvent::Ready(ready) => {
                if !established {
                    warn!(phase = %self.state.phase, "READY before hello ignored");
                    return Vec::new();
                }
                let username = ready.user.as_ref().map_or("<unknown>", |u| u.username.as_str());
                info!(session_id = %ready.session_id, %username, "session ready");
                self.state.session_id = Some(ready.session_id);
                self.state.resume_gateway_url = ready.resume_gateway_url;
                self.state.reconnect_attempts = 0;
                self.set_phase(Phase::Ready);
            }
            DispatchEvent::Resumed => {
                if !established {
                    warn!(phase = %self.state.phase, "RESUMED before hello ignored");
                    return Vec::new();
                }
                info!("session resumed");
                self.state.reconnect_attempts = 0;
                self.set_phase(Phase::Ready);
            }
            DispatchEvent::Other(_) => {}
        }
        Vec::new()
    }

    fn heartbeat_tick(&mut self) -> Vec<Action> {
        if !self.state.heartbeat_running || !self.state.phase.heartbeat_expected() {
            debug!(phase = %self.state.phase, "stale heartbeat tick ignored");
            return Vec::new();
        }

        if self.settings.heartbeat_watchdog && !self.state.heartbeat_acked {
            warn!("heartbeat not acknowledged, closing zombie connection");
            return self.connection_lost(Some(self.resume_close_code()));
        }

        self.state.heartbeat_acked = false;
        debug!(seq = ?self.state.sequence, "sending heartbeat");
        vec![Action::Send(ClientFrame::Heartbeat(self.state.sequence))]
    }

    fn update_presence(&mut self, status: Option<Status>, custom_text: Option<String>) -> Vec<Action> {
        if let Some(status) = status {
            self.state.presence.status = status;
        }
        if let Some(text) = custom_text {
            self.state.presence.custom_text = text;
        }

        match presence_update(&self.state.presence, self.state.phase) {
            Some(frame) => {
                info!(status = %self.state.presence.status, "publishing presence");
                vec![Action::Send(frame)]
            }
            None => {
                debug!(phase = %self.state.phase, "presence stored, no open socket");
                Vec::new()
            }
        }
    }

    fn shutdown(&mut self) -> Vec<Action> {
        info!(phase = %self.state.phase, "shutting down gateway session");
        let mut actions = self.stop_heartbeat();
        actions.push(Action::CancelReconnect);
        if self.state.phase.socket_open() {
            actions.push(Action::CloseSocket { code: CLOSE_NORMAL });
        }
        self.set_phase(Phase::Terminated);
        actions.push(Action::Terminate(Termination::Shutdown));
        actions
    }
}
