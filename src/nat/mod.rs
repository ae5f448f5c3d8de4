//! NAT enrichment.
//!
//! A connection's own view of its endpoints can differ from what leaves the
//! host once address translation is applied. The kernel's conntrack table
//! knows the translated view; this module asks it, best effort, and attaches
//! the answer to the emitted records.
//!
//! - [`Conntracker`]: lookup boundary, one 5-tuple in, optional translation out
//! - [`StaticConntrack`]: in-memory table implementation
//! - [`NatAdapter`]: runs a batch of lookups off the diff path under a time budget

pub mod adapter;
pub mod table;

pub use adapter::{NatAdapter, NatConfig, NatOutcome};
pub use table::StaticConntrack;

use crate::address::Address;
use crate::types::ConnectionType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// (transport, source, source port, destination, destination port)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiveTuple {
    #[serde(rename = "type")]
    pub conn_type: ConnectionType,
    pub source: Address,
    pub sport: u16,
    pub dest: Address,
    pub dport: u16,
}

/// Post-translation endpoint view, as seen on the reply direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct IPTranslation {
    pub repl_src_ip: Address,
    pub repl_dst_ip: Address,
    pub repl_src_port: u16,
    pub repl_dst_port: u16,
}

#[derive(Debug, Error)]
pub enum NatError {
    #[error("conntrack unavailable: {0}")]
    Unavailable(String),

    #[error("conntrack lookup failed: {0}")]
    Lookup(String),
}

/// Source of NAT mappings.
///
/// `Ok(None)` means no translation exists for the tuple, which is the normal
/// case and not an error.
pub trait Conntracker: Send + Sync {
    fn lookup(&self, tuple: &FiveTuple) -> Result<Option<IPTranslation>, NatError>;
}
