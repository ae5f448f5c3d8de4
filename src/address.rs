//! IPv4/IPv6 address value type carrying its raw byte form.

use crate::types::ConnectionFamily;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

/// Immutable address of one connection endpoint.
///
/// Serialized as its textual form (`"10.0.0.1"`, `"::1"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(IpAddr);

impl Address {
    pub fn v4(a: u8, b: u8, c: u8, d: u8) -> Self {
        Address(IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
    }

    /// Builds an address from raw network-order bytes; 4 bytes is v4, 16 is v6.
    pub fn from_bytes(raw: &[u8]) -> Option<Self> {
        match raw.len() {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(raw);
                Some(Address(IpAddr::V4(Ipv4Addr::from(octets))))
            }
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(raw);
                Some(Address(IpAddr::V6(Ipv6Addr::from(octets))))
            }
            _ => None,
        }
    }

    pub fn family(&self) -> ConnectionFamily {
        match self.0 {
            IpAddr::V4(_) => ConnectionFamily::AfInet,
            IpAddr::V6(_) => ConnectionFamily::AfInet6,
        }
    }

    /// Appends the raw bytes (4 or 16) to `buf`.
    pub fn write_bytes(&self, buf: &mut Vec<u8>) {
        match self.0 {
            IpAddr::V4(a) => buf.extend_from_slice(&a.octets()),
            IpAddr::V6(a) => buf.extend_from_slice(&a.octets()),
        }
    }

    /// Loopback test that also recognizes v4-mapped v6 loopback (`::ffff:127.0.0.1`).
    pub fn is_loopback(&self) -> bool {
        match self.0 {
            IpAddr::V4(a) => a.is_loopback(),
            IpAddr::V6(a) => {
                a.is_loopback() || a.to_ipv4_mapped().map(|v4| v4.is_loopback()).unwrap_or(false)
            }
        }
    }
}

impl From<IpAddr> for Address {
    fn from(ip: IpAddr) -> Self {
        Address(ip)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
