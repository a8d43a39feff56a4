//! Async driver for the session machine.
//!
//! A single task owns the socket, the heartbeat timer, the reconnect timer
//! and the [`SessionMachine`]. Everything that happens to the session is
//! turned into a [`Trigger`] and fed to the machine in arrival order, and
//! the resulting [`Action`]s are carried out before the next trigger is
//! looked at. Other tasks talk to the session through a [`SessionHandle`].

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use presence_proto::{ClientFrame, ConnectionProperties, Status};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Sleep;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::config::PresenceConfig;
use crate::error::PresenceError;

use super::heartbeat::HeartbeatTimer;
use super::machine::{Action, SessionMachine, SessionSettings, Termination, Trigger};
use super::presence::PublishOutcome;
use super::resolver::{EndpointResolver, gateway_connection_url};
use super::state::{Phase, Presence, SessionSnapshot, SessionState};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type ConnectFuture = Pin<Box<dyn Future<Output = Result<WsStream, Trigger>> + Send>>;

const COMMAND_BUFFER: usize = 32;
const TICK_BUFFER: usize = 4;
const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug)]
enum SessionCommand {
    SetPresence {
        status: Option<Status>,
        custom_text: Option<String>,
        reply: oneshot::Sender<PublishOutcome>,
    },
    Snapshot(oneshot::Sender<SessionSnapshot>),
    Shutdown,
}

enum Flow {
    Continue,
    Done(Result<(), PresenceError>),
}

impl SessionSettings {
    /// Settings derived from the daemon configuration.
    #[must_use]
    pub fn from_config(config: &PresenceConfig) -> Self {
        Self {
            policy: config.gateway.reconnect_policy(),
            heartbeat_watchdog: config.gateway.heartbeat_watchdog,
            resume: config.gateway.resume,
            properties: ConnectionProperties::default(),
            intents: config.gateway.intents,
        }
    }
}

/// Cloneable handle to a running [`GatewaySession`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    phase: watch::Receiver<Phase>,
}

impl SessionHandle {
    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    /// Wait until the phase satisfies `predicate`.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::SessionClosed`] if the session ends first.
    pub async fn wait_for_phase(
        &self,
        predicate: impl Fn(Phase) -> bool,
    ) -> Result<Phase, PresenceError> {
        let mut phase = self.phase.clone();
        phase
            .wait_for(|p| predicate(*p))
            .await
            .map(|p| *p)
            .map_err(|_| PresenceError::SessionClosed)
    }

    /// Change the status, keeping the custom text.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::SessionClosed`] if the session has ended.
    pub async fn set_presence(&self, status: Status) -> Result<PublishOutcome, PresenceError> {
        self.update_presence(Some(status), None).await
    }

    /// Change the custom status text, keeping the status.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::SessionClosed`] if the session has ended.
    pub async fn set_custom_status(
        &self,
        text: impl Into<String>,
    ) -> Result<PublishOutcome, PresenceError> {
        self.update_presence(None, Some(text.into())).await
    }

    /// Change status and/or text and publish if a socket is open.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::SessionClosed`] if the session has ended.
    pub async fn update_presence(
        &self,
        status: Option<Status>,
        custom_text: Option<String>,
    ) -> Result<PublishOutcome, PresenceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::SetPresence {
                status,
                custom_text,
                reply,
            })
            .await
            .map_err(|_| PresenceError::SessionClosed)?;
        rx.await.map_err(|_| PresenceError::SessionClosed)
    }

    /// Point-in-time view of the session.
    ///
    /// # Errors
    ///
    /// Returns [`PresenceError::SessionClosed`] if the session has ended.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, PresenceError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(SessionCommand::Snapshot(reply))
            .await
            .map_err(|_| PresenceError::SessionClosed)?;
        rx.await.map_err(|_| PresenceError::SessionClosed)
    }

    /// Ask the session to close and stop. A session that already ended is
    /// not an error.
    pub async fn shutdown(&self) {
        if self.commands.send(SessionCommand::Shutdown).await.is_err() {
            debug!("shutdown requested for a session that already ended");
        }
    }
}

/// Owns one gateway session from first connect to termination.
pub struct GatewaySession<R> {
    machine: SessionMachine,
    resolver: R,
    connect_timeout: Duration,
    socket: Option<WsStream>,
    connecting: Option<ConnectFuture>,
    heartbeat: HeartbeatTimer,
    tick_tx: mpsc::Sender<()>,
    tick_rx: mpsc::Receiver<()>,
    reconnect: Option<Pin<Box<Sleep>>>,
    commands: mpsc::Receiver<SessionCommand>,
    phase_tx: watch::Sender<Phase>,
    pending: VecDeque<Trigger>,
}

impl<R> GatewaySession<R>
where
    R: EndpointResolver + Clone + 'static,
{
    /// Create a session from configuration.
    #[must_use]
    pub fn from_config(config: &PresenceConfig, resolver: R) -> (Self, SessionHandle) {
        let state = SessionState::new(
            config.token.clone(),
            Presence::new(config.status, config.custom_status.clone()),
        );
        Self::new(
            state,
            SessionSettings::from_config(config),
            resolver,
            config.gateway.connect_timeout(),
        )
    }

    /// Create a session around an explicit state and settings.
    #[must_use]
    pub fn new(
        state: SessionState,
        settings: SessionSettings,
        resolver: R,
        connect_timeout: Duration,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_BUFFER);
        let (tick_tx, tick_rx) = mpsc::channel(TICK_BUFFER);
        let (phase_tx, phase_rx) = watch::channel(state.phase());

        let session = Self {
            machine: SessionMachine::new(state, settings),
            resolver,
            connect_timeout,
            socket: None,
            connecting: None,
            heartbeat: HeartbeatTimer::new(),
            tick_tx,
            tick_rx,
            reconnect: None,
            commands,
            phase_tx,
            pending: VecDeque::new(),
        };

        let handle = SessionHandle {
            commands: commands_tx,
            phase: phase_rx,
        };

        (session, handle)
    }

    /// Run until shutdown or a fatal error.
    ///
    /// # Errors
    ///
    /// Returns an error if the endpoint cannot be resolved before the first
    /// connection, or if the reconnect budget runs out.
    pub async fn run(mut self) -> Result<(), PresenceError> {
        info!("starting gateway session");
        self.pending.push_back(Trigger::Connect);

        loop {
            while let Some(trigger) = self.pending.pop_front() {
                if let Flow::Done(result) = self.dispatch(trigger).await {
                    return result;
                }
            }

            if let Flow::Done(result) = self.wait().await {
                return result;
            }
        }
    }

    /// Block until something happens and queue the resulting triggers.
    async fn wait(&mut self) -> Flow {
        tokio::select! {
            result = poll_connect(&mut self.connecting) => {
                self.connecting = None;
                match result {
                    Ok(socket) => {
                        self.socket = Some(socket);
                        self.pending.push_back(Trigger::SocketOpened);
                    }
                    Err(trigger) => self.pending.push_back(trigger),
                }
            }
            message = next_message(&mut self.socket) => self.on_message(message),
            Some(()) = self.tick_rx.recv() => self.pending.push_back(Trigger::HeartbeatTick),
            () = wait_until(&mut self.reconnect) => {
                self.reconnect = None;
                self.pending.push_back(Trigger::ReconnectDue);
            }
            command = self.commands.recv() => return self.on_command(command).await,
        }
        Flow::Continue
    }

    fn on_message(
        &mut self,
        message: Option<Result<Message, tokio_tungstenite::tungstenite::Error>>,
    ) {
        match message {
            Some(Ok(Message::Text(text))) => {
                self.pending.push_back(Trigger::Frame(text.to_string()));
            }
            Some(Ok(Message::Close(frame))) => {
                self.socket = None;
                let (code, reason) = frame.map_or((None, String::new()), |f| {
                    (Some(u16::from(f.code)), f.reason.to_string())
                });
                self.pending
                    .push_back(Trigger::SocketClosed { code, reason });
            }
            Some(Ok(Message::Binary(_))) => {
                debug!("ignoring binary gateway frame");
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                self.socket = None;
                self.pending
                    .push_back(Trigger::TransportError(e.to_string()));
                self.pending.push_back(Trigger::SocketClosed {
                    code: None,
                    reason: e.to_string(),
                });
            }
            None => {
                self.socket = None;
                self.pending.push_back(Trigger::SocketClosed {
                    code: None,
                    reason: "stream ended".to_string(),
                });
            }
        }
    }

    async fn on_command(&mut self, command: Option<SessionCommand>) -> Flow {
        match command {
            Some(SessionCommand::SetPresence {
                status,
                custom_text,
                reply,
            }) => {
                let actions = self.machine.handle(Trigger::UpdatePresence {
                    status,
                    custom_text,
                });
                let mut outcome = PublishOutcome::Skipped;
                for action in actions {
                    if let Action::Send(frame) = action {
                        if self.send(&frame).await {
                            outcome = PublishOutcome::Sent;
                        }
                    } else if let Flow::Done(result) = self.perform(action).await {
                        return Flow::Done(result);
                    }
                }
                if reply.send(outcome).is_err() {
                    debug!("presence caller went away before the reply");
                }
                Flow::Continue
            }
            Some(SessionCommand::Snapshot(reply)) => {
                if reply.send(self.machine.state().snapshot()).is_err() {
                    debug!("snapshot caller went away before the reply");
                }
                Flow::Continue
            }
            Some(SessionCommand::Shutdown) => self.dispatch(Trigger::Shutdown).await,
            None => {
                info!("all session handles dropped, shutting down");
                self.dispatch(Trigger::Shutdown).await
            }
        }
    }

    async fn dispatch(&mut self, trigger: Trigger) -> Flow {
        let actions = self.machine.handle(trigger);
        self.publish_phase();

        for action in actions {
            if let Flow::Done(result) = self.perform(action).await {
                return Flow::Done(result);
            }
        }

        debug_assert_eq!(
            self.heartbeat.is_running(),
            self.machine.state().heartbeat_running(),
            "heartbeat timer out of step with the session"
        );
        Flow::Continue
    }

    fn publish_phase(&self) {
        let phase = self.machine.phase();
        self.phase_tx.send_if_modified(|current| {
            if *current == phase {
                false
            } else {
                *current = phase;
                true
            }
        });
    }

    async fn perform(&mut self, action: Action) -> Flow {
        match action {
            Action::Connect { resume_url } => {
                self.connecting = Some(self.open(resume_url));
            }
            Action::Send(frame) => {
                self.send(&frame).await;
            }
            Action::StartHeartbeat(interval) => {
                self.drain_ticks();
                let tick_tx = self.tick_tx.clone();
                self.heartbeat.start(interval, move || {
                    // a full buffer means a tick is already queued
                    let _ = tick_tx.try_send(());
                });
            }
            Action::StopHeartbeat => {
                self.heartbeat.stop();
                self.drain_ticks();
            }
            Action::CloseSocket { code } => self.close_socket(code).await,
            Action::ScheduleReconnect(delay) => {
                debug!(?delay, "reconnect scheduled");
                self.reconnect = Some(Box::pin(tokio::time::sleep(delay)));
            }
            Action::CancelReconnect => {
                self.reconnect = None;
                self.connecting = None;
            }
            Action::Terminate(termination) => {
                self.heartbeat.stop();
                self.reconnect = None;
                self.connecting = None;
                self.socket = None;
                return Flow::Done(match termination {
                    Termination::Shutdown => {
                        info!("gateway session stopped");
                        Ok(())
                    }
                    Termination::Discovery(err) => Err(err.into()),
                    Termination::ExhaustedRetries { attempts } => {
                        Err(PresenceError::ExhaustedRetries { attempts })
                    }
                });
            }
        }
        Flow::Continue
    }

    fn drain_ticks(&mut self) {
        while self.tick_rx.try_recv().is_ok() {}
    }

    fn open(&self, resume_url: Option<String>) -> ConnectFuture {
        let resolver = self.resolver.clone();
        let timeout = self.connect_timeout;

        Box::pin(async move {
            let url = match resume_url {
                Some(raw) => gateway_connection_url(&raw),
                None => resolver.resolve().await,
            }
            .map_err(Trigger::DiscoveryFailed)?;

            info!(%url, "opening gateway socket");
            match tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str())).await
            {
                Ok(Ok((socket, _))) => Ok(socket),
                Ok(Err(e)) => Err(Trigger::SocketFailed(e.to_string())),
                Err(_) => Err(Trigger::SocketFailed(format!(
                    "timed out after {timeout:?}"
                ))),
            }
        })
    }

    /// Write a frame. A failed write drops the socket and queues the close.
    async fn send(&mut self, frame: &ClientFrame) -> bool {
        let Some(socket) = self.socket.as_mut() else {
            debug!(op = frame.op().as_u8(), "no socket, frame dropped");
            return false;
        };

        let json = match frame.to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "failed to encode frame");
                return false;
            }
        };

        match socket.send(Message::text(json)).await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "failed to write to gateway socket");
                self.socket = None;
                self.pending
                    .push_back(Trigger::TransportError(e.to_string()));
                self.pending.push_back(Trigger::SocketClosed {
                    code: None,
                    reason: e.to_string(),
                });
                false
            }
        }
    }

    /// Close and forget the socket. Its close never reaches the machine.
    async fn close_socket(&mut self, code: u16) {
        let Some(mut socket) = self.socket.take() else {
            return;
        };
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: "".into(),
        };
        match tokio::time::timeout(CLOSE_TIMEOUT, socket.close(Some(frame))).await {
            Ok(Ok(())) => debug!(code, "gateway socket closed"),
            Ok(Err(e)) => debug!(code, error = %e, "error while closing gateway socket"),
            Err(_) => debug!(code, "timed out closing gateway socket"),
        }
    }
}

async fn poll_connect(connecting: &mut Option<ConnectFuture>) -> Result<WsStream, Trigger> {
    match connecting {
        Some(future) => future.as_mut().await,
        None => std::future::pending().await,
    }
}

async fn next_message(
    socket: &mut Option<WsStream>,
) -> Option<Result<Message, tokio_tungstenite::tungstenite::Error>> {
    match socket {
        Some(socket) => socket.next().await,
        None => std::future::pending().await,
    }
}

async fn wait_until(sleep: &mut Option<Pin<Box<Sleep>>>) {
    match sleep {
        Some(sleep) => sleep.as_mut().await,
        None => std::future::pending().await,
    }
}
