//! # Connection Tracker
//!
//! Turns per-socket cumulative counters sampled by a kernel probe into
//! directional, NAT-aware connection records, once per polling interval.
//!
//! Per interval:
//! raw samples → [`tracker::ConnectionStore`] diff pass (keyed by [`key`] codec,
//! direction from [`direction`]) → [`nat::NatAdapter`] enrichment →
//! [`tracker::IntervalReport`] published to readers and the [`sink`].

pub mod address;
pub mod config;
pub mod connection;
pub mod direction;
pub mod error;
pub mod key;
pub mod nat;
pub mod poll;
pub mod probe;
pub mod sink;
pub mod tracker;
pub mod types;

pub use address::Address;
pub use config::{ConfigError, TrackerConfig};
pub use connection::{ConnectionKey, ConnectionStats, Sample, SampleError};
pub use direction::{classify, ListeningPort, ListeningPorts};
pub use error::{TrackerError, TrackerResult};
pub use key::{beautify_key, decode_key, encode_key, DecodedKey};
pub use nat::{Conntracker, FiveTuple, IPTranslation, NatAdapter, NatConfig, StaticConntrack};
pub use poll::{PollService, PollStats, Poller, PollerConfig};
pub use probe::{ProbeError, ProbeFrame, ReplayProbe, SocketProbe};
pub use tracker::{ConnectionStore, IntervalReport, SnapshotHandle};
pub use types::{ConnectionDirection, ConnectionFamily, ConnectionType};
