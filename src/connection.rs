//! Connection identity, per-interval statistics and the raw sample ingestion type.
//!
//! Raw samples arrive from the socket probe with untyped tags and byte
//! addresses. They are validated exactly once, here, into a [`ValidSample`];
//! everything downstream works on typed values only.

use crate::address::Address;
use crate::nat::{FiveTuple, IPTranslation};
use crate::types::{ConnectionDirection, ConnectionFamily, ConnectionType};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// ================================================================================================
// IDENTITY
// ================================================================================================

/// Identity of one logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConnectionKey {
    pub pid: u32,
    pub netns: u32,
    pub sport: u16,
    pub dport: u16,
    pub source: Address,
    pub dest: Address,
    pub family: ConnectionFamily,
    #[serde(rename = "type")]
    pub conn_type: ConnectionType,
}

impl ConnectionKey {
    pub fn five_tuple(&self) -> FiveTuple {
        FiveTuple {
            conn_type: self.conn_type,
            source: self.source,
            sport: self.sport,
            dest: self.dest,
            dport: self.dport,
        }
    }
}

// ================================================================================================
// STATISTICS
// ================================================================================================

/// One connection as emitted for a polling interval.
///
/// `monotonic_*` mirror the socket's cumulative counters; `last_*` hold the
/// share accrued since the previous interval and are never negative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStats {
    #[serde(flatten)]
    pub key: ConnectionKey,

    pub monotonic_sent_bytes: u64,
    pub last_sent_bytes: u64,

    pub monotonic_recv_bytes: u64,
    pub last_recv_bytes: u64,

    pub monotonic_retransmits: u32,
    pub last_retransmits: u32,

    /// Probe timestamp of the sample that last updated this record
    pub last_update_epoch: u64,

    /// `None` when the listening-port set was unavailable for the interval
    pub direction: Option<ConnectionDirection>,

    pub ip_translation: Option<IPTranslation>,
}

impl fmt::Display for ConnectionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let direction = self
            .direction
            .map(|d| d.to_string())
            .unwrap_or_else(|| "unclassified".to_string());
        write!(
            f,
            "[{}] [PID: {}] [NS: {}] [{}:{} <-> {}:{}] ({}) {} bytes sent (+{}), {} bytes received (+{}), {} retransmits (+{})",
            self.key.conn_type,
            self.key.pid,
            self.key.netns,
            self.key.source,
            self.key.sport,
            self.key.dest,
            self.key.dport,
            direction,
            self.monotonic_sent_bytes,
            self.last_sent_bytes,
            self.monotonic_recv_bytes,
            self.last_recv_bytes,
            self.monotonic_retransmits,
            self.last_retransmits,
        )
    }
}

// ================================================================================================
// INGESTION
// ================================================================================================

/// Reasons a single raw sample is rejected.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SampleError {
    #[error("unknown address family tag {0}")]
    UnknownFamily(u8),

    #[error("unknown transport tag {0}")]
    UnknownTransport(u8),

    #[error("{endpoint} address has {actual} bytes, family {family} expects {expected}")]
    AddressLength {
        endpoint: &'static str,
        family: ConnectionFamily,
        expected: usize,
        actual: usize,
    },
}

/// One live socket as reported by the probe, counters cumulative since socket creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    pub pid: u32,
    #[serde(default)]
    pub netns: u32,
    pub sport: u16,
    pub dport: u16,
    /// 0 = v4, 1 = v6
    pub family: u8,
    /// 0 = TCP, 1 = UDP
    #[serde(rename = "type")]
    pub conn_type: u8,
    /// Raw network-order source address bytes
    pub source: Vec<u8>,
    /// Raw network-order destination address bytes
    pub dest: Vec<u8>,
    #[serde(default)]
    pub sent_bytes: u64,
    #[serde(default)]
    pub recv_bytes: u64,
    #[serde(default)]
    pub retransmits: u32,
    pub timestamp: u64,
}

/// Cumulative counters carried by a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub sent_bytes: u64,
    pub recv_bytes: u64,
    pub retransmits: u32,
}

/// A sample that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidSample {
    pub key: ConnectionKey,
    pub counters: Counters,
    pub timestamp: u64,
}

impl Sample {
    pub fn validate(&self) -> Result<ValidSample, SampleError> {
        let family =
            ConnectionFamily::from_u8(self.family).ok_or(SampleError::UnknownFamily(self.family))?;
        let conn_type = ConnectionType::from_u8(self.conn_type)
            .ok_or(SampleError::UnknownTransport(self.conn_type))?;

        let source = endpoint_address("source", family, &self.source)?;
        let dest = endpoint_address("dest", family, &self.dest)?;

        Ok(ValidSample {
            key: ConnectionKey {
                pid: self.pid,
                netns: self.netns,
                sport: self.sport,
                dport: self.dport,
                source,
                dest,
                family,
                conn_type,
            },
            counters: Counters {
                sent_bytes: self.sent_bytes,
                recv_bytes: self.recv_bytes,
                retransmits: self.retransmits,
            },
            timestamp: self.timestamp,
        })
    }
}

fn endpoint_address(
    endpoint: &'static str,
    family: ConnectionFamily,
    raw: &[u8],
) -> Result<Address, SampleError> {
    let expected = family.address_len();
    if raw.len() != expected {
        return Err(SampleError::AddressLength {
            endpoint,
            family,
            expected,
            actual: raw.len(),
        });
    }
    Address::from_bytes(raw).ok_or(SampleError::AddressLength {
        endpoint,
        family,
        expected,
        actual: raw.len(),
    })
}
