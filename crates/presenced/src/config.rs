//! Daemon configuration.
//!
//! Configuration for the presence daemon, including:
//! - The authentication token
//! - Initial presence (status and custom status text)
//! - Gateway discovery and reconnection tuning
//!
//! Values come from an optional TOML file and are overridden by command
//! line flags / environment variables in `main`.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use presence_proto::Status;
use serde::Deserialize;

use crate::error::PresenceError;
use crate::gateway::ReconnectPolicy;

/// Tokens of this length or shorter are rejected as implausible.
pub const MIN_TOKEN_LEN: usize = 50;

/// Default discovery endpoint.
pub const DEFAULT_DISCOVERY_URL: &str = "https://discord.com/api/v9/gateway";

/// Default custom status text.
pub const DEFAULT_CUSTOM_STATUS: &str = "24/7 Online";

/// Authentication token. Never printed.
#[derive(Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(transparent)]
pub struct Token(String);

impl Token {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_string())
    }

    /// Raw token for the identify payload.
    #[must_use]
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Whether the token looks like a real credential.
    #[must_use]
    pub fn is_plausible(&self) -> bool {
        self.0.len() > MIN_TOKEN_LEN
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token(<{} chars>)", self.0.len())
    }
}

/// Gateway connection tuning.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// HTTP endpoint returning `{ "url": ... }`.
    pub discovery_url: String,
    /// Fixed gateway URL; skips discovery when set.
    pub gateway_url: Option<String>,
    /// Consecutive abnormal closes tolerated before giving up.
    pub max_reconnect_attempts: u32,
    /// First backoff delay in milliseconds.
    pub initial_backoff_ms: u64,
    /// Backoff ceiling in milliseconds.
    pub max_backoff_ms: u64,
    /// Fixed delay after an invalid-session notice, in milliseconds.
    pub invalid_session_delay_ms: u64,
    /// Force a reconnect when a heartbeat goes unacknowledged.
    pub heartbeat_watchdog: bool,
    /// Resume sessions instead of re-identifying.
    pub resume: bool,
    /// Timeout for discovery and socket open, in seconds.
    pub connect_timeout_secs: u64,
    /// Intents bitfield sent on identify.
    pub intents: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            discovery_url: DEFAULT_DISCOVERY_URL.to_string(),
            gateway_url: None,
            max_reconnect_attempts: 10,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
            invalid_session_delay_ms: 5_000,
            heartbeat_watchdog: true,
            resume: false,
            connect_timeout_secs: 10,
            intents: 0,
        }
    }
}

impl GatewayConfig {
    /// Reconnect policy derived from this configuration.
    #[must_use]
    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            max_delay: Duration::from_millis(self.max_backoff_ms),
            backoff_multiplier: 2.0,
            max_attempts: self.max_reconnect_attempts,
            invalid_session_delay: Duration::from_millis(self.invalid_session_delay_ms),
        }
    }

    /// Timeout applied to discovery and to opening the socket.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

fn default_custom_status() -> String {
    DEFAULT_CUSTOM_STATUS.to_string()
}

/// Main daemon configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PresenceConfig {
    /// Authentication token. May be left out of the file and supplied
    /// through the environment instead.
    #[serde(default)]
    pub token: Token,
    /// Initial status.
    #[serde(default)]
    pub status: Status,
    /// Initial custom status text.
    #[serde(default = "default_custom_status")]
    pub custom_status: String,
    /// Gateway tuning.
    #[serde(default)]
    pub gateway: GatewayConfig,
}

impl PresenceConfig {
    /// Configuration with defaults for everything but the token.
    #[must_use]
    pub fn new(token: Token) -> Self {
        Self {
            token,
            status: Status::default(),
            custom_status: default_custom_status(),
            gateway: GatewayConfig::default(),
        }
    }

    /// Load and validate configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, PresenceError> {
        let config = Self::read_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file without validating it, so that
    /// command line overrides can be applied first.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn read_file(path: impl AsRef<Path>) -> Result<Self, PresenceError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            PresenceError::Config(format!(
                "failed to read config file '{}': {}",
                path.as_ref().display(),
                e
            ))
        })?;

        Self::parse(&content)
    }

    /// Parse and validate configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid.
    pub fn from_toml(content: &str) -> Result<Self, PresenceError> {
        let config = Self::parse(content)?;
        config.validate()?;
        Ok(config)
    }

    fn parse(content: &str) -> Result<Self, PresenceError> {
        toml::from_str(content).map_err(|e| PresenceError::Config(format!("invalid TOML: {e}")))
    }

    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration values are invalid.
    pub fn validate(&self) -> Result<(), PresenceError> {
        if !self.token.is_plausible() {
            return Err(PresenceError::Config(format!(
                "token must be longer than {MIN_TOKEN_LEN} characters"
            )));
        }

        if !self.gateway.discovery_url.starts_with("http://")
            && !self.gateway.discovery_url.starts_with("https://")
        {
            return Err(PresenceError::Config(
                "discovery_url must start with http:// or https://".to_string(),
            ));
        }

        if let Some(url) = &self.gateway.gateway_url {
            if !url.starts_with("ws://") && !url.starts_with("wss://") {
                return Err(PresenceError::Config(
                    "gateway_url must start with ws:// or wss://".to_string(),
                ));
            }
        }

        if self.gateway.initial_backoff_ms > self.gateway.max_backoff_ms {
            return Err(PresenceError::Config(
                "initial_backoff_ms cannot exceed max_backoff_ms".to_string(),
            ));
        }

        if self.gateway.connect_timeout_secs == 0 {
            return Err(PresenceError::Config(
                "connect_timeout_secs must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}
