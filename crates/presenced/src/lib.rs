//! presenced - gateway presence daemon
//!
//! Keeps one authenticated gateway session alive around the clock and
//! publishes a fixed status with a custom status line. The session survives
//! network drops, server-requested reconnects and invalidated sessions.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod console;
pub mod error;
pub mod gateway;

pub use config::{PresenceConfig, Token};
pub use console::{ConsoleCommand, run_console};
pub use error::{DiscoveryError, PresenceError};
pub use gateway::{
    AnyResolver, GatewaySession, HttpResolver, Phase, PublishOutcome, SessionHandle,
    SessionSnapshot, StaticResolver,
};

/// Pick the endpoint resolver for `config`: a fixed URL when one is
/// configured, HTTP discovery otherwise.
///
/// # Errors
///
/// Returns an error if the fixed URL is invalid or the HTTP client cannot
/// be built.
pub fn resolver_for(config: &PresenceConfig) -> Result<AnyResolver, PresenceError> {
    let resolver = match &config.gateway.gateway_url {
        Some(url) => AnyResolver::Static(StaticResolver::new(url)?),
        None => AnyResolver::Http(HttpResolver::new(
            config.gateway.discovery_url.clone(),
            config.gateway.connect_timeout(),
        )?),
    };
    Ok(resolver)
}
