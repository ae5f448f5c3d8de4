//! Interval output and its publication point.

use crate::connection::ConnectionStats;
use crate::tracker::store::{DiffSummary, Emission};
use crate::types::now_ms;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Everything emitted for one polling interval.
///
/// `connections` holds the live records first, then the ones that closed
/// during the interval; both groups are ordered by encoded key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntervalReport {
    /// Sequence number of the interval, starting at 1
    pub interval: u64,
    /// Wall-clock time the report was built (ms since epoch)
    pub collected_at: u64,
    pub connections: Vec<ConnectionStats>,
    pub active: usize,
    pub closed: usize,
    /// Samples dropped at validation
    pub dropped: usize,
    /// NAT translations could not be resolved for this interval
    pub nat_degraded: bool,
}

impl IntervalReport {
    pub fn new(interval: u64, emission: Emission, summary: &DiffSummary, nat_degraded: bool) -> Self {
        let active = emission.active.len();
        let closed = emission.closed.len();
        let mut connections = emission.active;
        connections.extend(emission.closed);

        Self {
            interval,
            collected_at: now_ms(),
            connections,
            active,
            closed,
            dropped: summary.dropped,
            nat_degraded,
        }
    }

    pub fn active_connections(&self) -> &[ConnectionStats] {
        &self.connections[..self.split_at()]
    }

    pub fn closed_connections(&self) -> &[ConnectionStats] {
        &self.connections[self.split_at()..]
    }

    // Reports read back from disk may carry an inconsistent count
    fn split_at(&self) -> usize {
        self.active.min(self.connections.len())
    }
}

/// Last published report, shared with readers outside the polling task.
///
/// Readers get an `Arc` to an immutable report; the store itself is never
/// exposed.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHandle {
    latest: Arc<RwLock<Arc<IntervalReport>>>,
}

impl SnapshotHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, report: Arc<IntervalReport>) {
        *self.latest.write() = report;
    }

    pub fn latest(&self) -> Arc<IntervalReport> {
        Arc::clone(&self.latest.read())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::connection::ConnectionKey;
    use crate::types::{ConnectionFamily, ConnectionType};

    fn stats(sport: u16) -> ConnectionStats {
        ConnectionStats {
            key: ConnectionKey {
                pid: 1,
                netns: 0,
                sport,
                dport: 80,
                source: Address::v4(10, 0, 0, 1),
                dest: Address::v4(10, 0, 0, 2),
                family: ConnectionFamily::AfInet,
                conn_type: ConnectionType::Tcp,
            },
            monotonic_sent_bytes: 0,
            last_sent_bytes: 0,
            monotonic_recv_bytes: 0,
            last_recv_bytes: 0,
            monotonic_retransmits: 0,
            last_retransmits: 0,
            last_update_epoch: 0,
            direction: None,
            ip_translation: None,
        }
    }

    #[test]
    fn test_report_splits_active_and_closed() {
        let emission = Emission {
            active: vec![stats(1), stats(2)],
            closed: vec![stats(3)],
        };
        let report = IntervalReport::new(4, emission, &DiffSummary::default(), false);

        assert_eq!(report.interval, 4);
        assert_eq!(report.active_connections().len(), 2);
        assert_eq!(report.closed_connections().len(), 1);
        assert_eq!(report.closed_connections()[0].key.sport, 3);
    }

    #[test]
    fn test_snapshot_readers_keep_point_in_time_copy() {
        let handle = SnapshotHandle::new();
        assert_eq!(handle.latest().interval, 0);

        let first = Arc::new(IntervalReport {
            interval: 1,
            ..Default::default()
        });
        handle.publish(first);
        let held = handle.latest();

        handle.publish(Arc::new(IntervalReport {
            interval: 2,
            ..Default::default()
        }));
        assert_eq!(held.interval, 1);
        assert_eq!(handle.clone().latest().interval, 2);
    }
}
