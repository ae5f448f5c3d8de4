//! Connection polling.
//!
//! Provides two ways to run the diff engine:
//! 1. **Scheduled polling** (Poller): background task on a fixed interval
//! 2. **On-demand polling** (PollService): forced poll plus snapshot diagnostics

pub mod scheduler;
pub mod service;

pub use scheduler::{Poller, PollerConfig};
pub use service::{PollService, PollStats};
