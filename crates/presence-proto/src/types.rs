//! Presence and handshake payload types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ProtoError;

/// Activity name the gateway expects for a custom status.
pub const CUSTOM_STATUS_ACTIVITY_NAME: &str = "Custom Status";

/// Presence status broadcast to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// Online.
    #[default]
    Online,
    /// Idle / away.
    Idle,
    /// Do not disturb.
    Dnd,
    /// Shown as offline.
    Invisible,
}

impl Status {
    /// Wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Idle => "idle",
            Self::Dnd => "dnd",
            Self::Invisible => "invisible",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ProtoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "online" => Ok(Self::Online),
            "idle" => Ok(Self::Idle),
            "dnd" => Ok(Self::Dnd),
            "invisible" => Ok(Self::Invisible),
            other => Err(ProtoError::InvalidStatus(other.to_string())),
        }
    }
}

/// Activity type, serialized as its integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ActivityKind {
    /// "Playing {name}".
    Playing,
    /// "Streaming {name}".
    Streaming,
    /// "Listening to {name}".
    Listening,
    /// "Watching {name}".
    Watching,
    /// Free-form custom status; the text lives in `state`.
    Custom,
    /// "Competing in {name}".
    Competing,
}

impl From<ActivityKind> for u8 {
    fn from(kind: ActivityKind) -> Self {
        match kind {
            ActivityKind::Playing => 0,
            ActivityKind::Streaming => 1,
            ActivityKind::Listening => 2,
            ActivityKind::Watching => 3,
            ActivityKind::Custom => 4,
            ActivityKind::Competing => 5,
        }
    }
}

impl TryFrom<u8> for ActivityKind {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Playing),
            1 => Ok(Self::Streaming),
            2 => Ok(Self::Listening),
            3 => Ok(Self::Watching),
            4 => Ok(Self::Custom),
            5 => Ok(Self::Competing),
            other => Err(format!("unknown activity type {other}")),
        }
    }
}

/// A single activity entry in a presence payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activity {
    /// Activity name.
    pub name: String,
    /// Activity type.
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    /// Custom status text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
}

impl Activity {
    /// Custom status activity carrying `text`.
    #[must_use]
    pub fn custom_status(text: impl Into<String>) -> Self {
        Self {
            name: CUSTOM_STATUS_ACTIVITY_NAME.to_string(),
            kind: ActivityKind::Custom,
            state: Some(text.into()),
        }
    }
}

/// Presence update payload (opcode 3, also embedded in identify).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresencePayload {
    /// Status.
    pub status: Status,
    /// Unix time in milliseconds the client went idle, 0 if not idle.
    pub since: u64,
    /// Activities.
    pub activities: Vec<Activity>,
    /// Whether the client is AFK.
    pub afk: bool,
}

impl PresencePayload {
    /// Presence with a single custom status activity.
    #[must_use]
    pub fn with_custom_status(status: Status, text: impl Into<String>) -> Self {
        Self {
            status,
            since: 0,
            activities: vec![Activity::custom_status(text)],
            afk: false,
        }
    }
}

/// Client properties declared on identify.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionProperties {
    /// Operating system.
    pub os: String,
    /// Browser / library name.
    pub browser: String,
    /// Device name.
    pub device: String,
}

impl Default for ConnectionProperties {
    fn default() -> Self {
        Self {
            os: "linux".to_string(),
            browser: "chrome".to_string(),
            device: "chrome".to_string(),
        }
    }
}

/// Identify payload (opcode 2).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Authentication token.
    pub token: String,
    /// Declared client properties.
    pub properties: ConnectionProperties,
    /// Initial presence.
    pub presence: PresencePayload,
    /// Gateway intents bitfield.
    pub intents: u64,
}

impl fmt::Debug for IdentifyPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdentifyPayload")
            .field("token", &"<redacted>")
            .field("properties", &self.properties)
            .field("presence", &self.presence)
            .field("intents", &self.intents)
            .finish()
    }
}

/// Resume payload (opcode 6).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Authentication token.
    pub token: String,
    /// Session being resumed.
    pub session_id: String,
    /// Last sequence number received.
    pub seq: u64,
}

impl fmt::Debug for ResumePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResumePayload")
            .field("token", &"<redacted>")
            .field("session_id", &self.session_id)
            .field("seq", &self.seq)
            .finish()
    }
}
