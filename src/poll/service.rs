//! On-demand polling and diagnostics.
//!
//! Lets an operator force a poll outside the schedule and inspect the last
//! published snapshot. Diagnostics read the snapshot only, never the store.

use crate::error::TrackerResult;
use crate::key::{beautify_key, encode_key};
use crate::poll::Poller;
use crate::tracker::IntervalReport;
use std::sync::Arc;

/// Statistics from one poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollStats {
    /// Sequence number of the published interval
    pub interval: u64,
    pub active: usize,
    pub closed: usize,
    pub dropped: usize,
    pub regressions: usize,
    /// Live records left without a direction
    pub unclassified: usize,
    pub nat_degraded: bool,
    /// Individual conntrack lookups that failed
    pub nat_lookup_errors: usize,
    /// Duration of the poll in milliseconds
    pub duration_ms: u64,
    /// Timestamp of completion
    pub timestamp: u64,
}

/// Poll trigger and snapshot inspection.
pub struct PollService {
    poller: Arc<Poller>,
}

impl PollService {
    pub fn new(poller: Arc<Poller>) -> Self {
        Self { poller }
    }

    /// Poll immediately. Waits for a scheduled poll in progress to finish first.
    pub async fn trigger(&self) -> TrackerResult<PollStats> {
        self.poller.poll_once().await
    }

    pub fn latest_report(&self) -> Arc<IntervalReport> {
        self.poller.snapshot().latest()
    }

    /// Readable keys of every record in the latest snapshot.
    pub fn debug_connections(&self) -> Vec<String> {
        let report = self.latest_report();
        let mut buf = Vec::with_capacity(64);
        report
            .connections
            .iter()
            .map(|conn| beautify_key(encode_key(&conn.key, &mut buf)))
            .collect()
    }
}
