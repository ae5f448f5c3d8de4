//! Shared enums and time helpers used across the tracker.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since UNIX epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ================================================================================================
// TRANSPORT
// ================================================================================================

/// Transport protocol of a connection. Packed into the low nibble of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionType {
    Tcp = 0,
    Udp = 1,
}

impl ConnectionType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectionType::Tcp),
            1 => Some(ConnectionType::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for ConnectionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionType::Tcp => write!(f, "TCP"),
            ConnectionType::Udp => write!(f, "UDP"),
        }
    }
}

// ================================================================================================
// ADDRESS FAMILY
// ================================================================================================

/// Address family of a connection. Packed into the high nibble of the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionFamily {
    #[serde(rename = "v4")]
    AfInet = 0,
    #[serde(rename = "v6")]
    AfInet6 = 1,
}

impl ConnectionFamily {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ConnectionFamily::AfInet),
            1 => Some(ConnectionFamily::AfInet6),
            _ => None,
        }
    }

    /// Number of raw address bytes for this family.
    pub fn address_len(self) -> usize {
        match self {
            ConnectionFamily::AfInet => 4,
            ConnectionFamily::AfInet6 => 16,
        }
    }
}

impl fmt::Display for ConnectionFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionFamily::AfInet => write!(f, "v4"),
            ConnectionFamily::AfInet6 => write!(f, "v6"),
        }
    }
}

// ================================================================================================
// DIRECTION
// ================================================================================================

/// Whether a connection was accepted by this host, initiated by it, or never left it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionDirection {
    Incoming = 1,
    Outgoing = 2,
    Local = 3,
}

impl fmt::Display for ConnectionDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionDirection::Incoming => write!(f, "incoming"),
            ConnectionDirection::Outgoing => write!(f, "outgoing"),
            ConnectionDirection::Local => write!(f, "local"),
        }
    }
}
