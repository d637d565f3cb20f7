use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One timestamped observation from the receiver.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reading {
    /// UTC time at which the report was decoded.
    pub timestamp: DateTime<Utc>,
    /// CW jamming index reported by the receiver (0 = clean, 255 = strong).
    pub jam_ind: u8,
    /// Raw MON-HW `flags` byte, when the device supplied one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub flags: Option<u8>,
}

impl Reading {
    pub fn new(timestamp: DateTime<Utc>, jam_ind: u8, flags: Option<u8>) -> Self {
        Self {
            timestamp,
            jam_ind,
            flags,
        }
    }

    /// The receiver's own jamming verdict, decoded from `flags` bits 2..3.
    pub fn jamming_state(&self) -> Option<JammingState> {
        self.flags.map(JammingState::from_flags)
    }
}

/// Receiver-side jamming assessment carried in the MON-HW flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JammingState {
    Unknown,
    Ok,
    Warning,
    Critical,
}

impl JammingState {
    pub fn from_flags(flags: u8) -> Self {
        match (flags >> 2) & 0b11 {
            1 => Self::Ok,
            2 => Self::Warning,
            3 => Self::Critical,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Ok => "ok",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// Lifecycle of a device session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Streaming,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Alert level derived from the jamming index stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AlertState {
    #[default]
    Normal,
    Jammed,
}

impl fmt::Display for AlertState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => f.write_str("normal"),
            Self::Jammed => f.write_str("jammed"),
        }
    }
}
