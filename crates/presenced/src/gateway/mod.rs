//! Gateway session client.
//!
//! Keeps one authenticated session with the gateway alive: endpoint
//! discovery, the hello/identify handshake, heartbeats, presence updates,
//! and reconnection with exponential backoff.

mod heartbeat;
mod machine;
mod presence;
mod reconnect;
mod resolver;
mod session;
mod state;

pub use heartbeat::HeartbeatTimer;
pub use machine::{
    Action, CLOSE_NORMAL, CLOSE_RESUMABLE, MAX_HEARTBEAT_INTERVAL, SessionMachine, SessionSettings,
    Termination, Trigger,
};
pub use presence::{PublishOutcome, presence_update};
pub use reconnect::{ReconnectPolicy, calculate_backoff};
pub use resolver::{
    AnyResolver, EndpointResolver, HttpResolver, StaticResolver, gateway_connection_url,
};
pub use session::{GatewaySession, SessionHandle};
pub use state::{Phase, Presence, SessionSnapshot, SessionState};
