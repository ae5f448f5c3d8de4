//! Connection tracking core: the diff engine and the snapshot it publishes.

pub mod snapshot;
pub mod store;

pub use snapshot::{IntervalReport, SnapshotHandle};
pub use store::{ConnectionStore, DiffSummary, Emission, StoreStats};
