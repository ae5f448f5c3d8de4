//! Connection store and per-interval diff engine.
//!
//! The store keeps exactly one record per encoded connection key: the state
//! emitted for the previous interval. Each pass merges the current raw
//! samples against it:
//!
//! 1. Unknown key: baseline the record (`last_* = 0`, `monotonic_*` = sample).
//! 2. Known key: `last_* = sample - prior`. If any counter went backwards the
//!    socket behind the key was replaced, so the sample starts a new logical
//!    connection and `last_*` takes the sample's cumulative values.
//! 3. Keys absent from the batch are closed: they are held back with their
//!    last values, emitted once by [`ConnectionStore::emit`], then forgotten.
//!
//! The pass does no I/O. Raw sample reads and NAT lookups happen around it.

use crate::connection::{ConnectionStats, Sample, ValidSample};
use crate::direction::{classify, ListeningPorts};
use crate::key::encode_key;
use crate::nat::{FiveTuple, NatOutcome};
use log::{debug, warn};
use std::collections::{HashMap, HashSet};

/// Counts for a single diff pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    /// Records live after the pass
    pub active: usize,
    /// Records that disappeared from the feed in this pass
    pub closed: usize,
    /// Samples rejected at validation
    pub dropped: usize,
    /// Keys whose counters went backwards
    pub regressions: usize,
    /// Samples that repeated a key already seen in the same batch
    pub duplicates: usize,
    /// Live records left without a direction
    pub unclassified: usize,
}

/// Cumulative counters across the store's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub passes: u64,
    pub samples_seen: u64,
    pub samples_dropped: u64,
    pub regressions: u64,
    pub closed_emitted: u64,
}

/// Records produced by one pass, each list ordered by encoded key.
#[derive(Debug, Clone, Default)]
pub struct Emission {
    pub active: Vec<ConnectionStats>,
    pub closed: Vec<ConnectionStats>,
}

/// Arena of connection records keyed by their encoded identity.
///
/// Owned and mutated by the polling task only.
#[derive(Debug, Default)]
pub struct ConnectionStore {
    conns: HashMap<Vec<u8>, ConnectionStats>,
    closed: Vec<(Vec<u8>, ConnectionStats)>,
    key_buf: Vec<u8>,
    stats: StoreStats,
}

impl ConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live records.
    pub fn len(&self) -> usize {
        self.conns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conns.is_empty()
    }

    pub fn stats(&self) -> StoreStats {
        self.stats
    }

    /// Merges one interval's samples into the store.
    ///
    /// Malformed samples are dropped individually. Duplicate keys within the
    /// batch resolve last-write-wins, each measured against the prior
    /// interval's record.
    pub fn diff(&mut self, samples: &[Sample], listening: Option<&ListeningPorts>) -> DiffSummary {
        let mut summary = DiffSummary::default();
        let mut next: HashMap<Vec<u8>, ConnectionStats> = HashMap::with_capacity(samples.len());

        for sample in samples {
            let valid = match sample.validate() {
                Ok(valid) => valid,
                Err(e) => {
                    warn!(
                        "Dropping sample pid={} sport={} dport={}: {}",
                        sample.pid, sample.sport, sample.dport, e
                    );
                    summary.dropped += 1;
                    continue;
                }
            };

            let key = encode_key(&valid.key, &mut self.key_buf).to_vec();

            let mut stats = match self.conns.get(&key) {
                Some(prior) => {
                    let (stats, regressed) = advance(prior, &valid);
                    if regressed {
                        warn!(
                            "Counter regression for pid={} {}:{} -> {}:{}, treating as new connection",
                            valid.key.pid,
                            valid.key.source,
                            valid.key.sport,
                            valid.key.dest,
                            valid.key.dport
                        );
                        summary.regressions += 1;
                    }
                    stats
                }
                None => baseline(&valid),
            };

            stats.direction = classify(&valid.key, listening);
            if stats.direction.is_none() {
                summary.unclassified += 1;
            }

            if let Some(replaced) = next.insert(key, stats) {
                debug!("Duplicate sample in batch, keeping latest: {}", replaced);
                summary.duplicates += 1;
                if replaced.direction.is_none() {
                    summary.unclassified -= 1;
                }
            }
        }

        let prior = std::mem::replace(&mut self.conns, next);
        let mut newly_closed = 0;
        for (key, stats) in prior {
            if !self.conns.contains_key(&key) {
                debug!("Connection closed: {}", stats);
                self.closed.push((key, stats));
                newly_closed += 1;
            }
        }

        summary.active = self.conns.len();
        summary.closed = newly_closed;

        self.stats.passes += 1;
        self.stats.samples_seen += samples.len() as u64;
        self.stats.samples_dropped += summary.dropped as u64;
        self.stats.regressions += summary.regressions as u64;

        summary
    }

    /// Distinct 5-tuples of the records a [`diff`](Self::diff) of `samples`
    /// would leave live, for NAT lookup ahead of the pass.
    ///
    /// Malformed samples are skipped silently; the pass itself reports them.
    pub fn sample_tuples(samples: &[Sample]) -> Vec<FiveTuple> {
        let unique: HashSet<FiveTuple> = samples
            .iter()
            .filter_map(|sample| sample.validate().ok())
            .map(|valid| valid.key.five_tuple())
            .collect();
        unique.into_iter().collect()
    }

    /// Writes the interval's NAT results onto the live records.
    ///
    /// A degraded outcome clears translations: the interval's records go out
    /// without one rather than with a stale mapping.
    pub fn apply_translations(&mut self, outcome: &NatOutcome) {
        for stats in self.conns.values_mut() {
            stats.ip_translation = if outcome.degraded {
                None
            } else {
                outcome.translations.get(&stats.key.five_tuple()).copied()
            };
        }
    }

    /// Produces the ordered output of the last pass and forgets closed records.
    pub fn emit(&mut self) -> Emission {
        let mut active: Vec<(&Vec<u8>, &ConnectionStats)> = self.conns.iter().collect();
        active.sort_by(|a, b| a.0.cmp(b.0));
        let active = active.into_iter().map(|(_, stats)| stats.clone()).collect();

        let mut closed = std::mem::take(&mut self.closed);
        closed.sort_by(|a, b| a.0.cmp(&b.0));
        self.stats.closed_emitted += closed.len() as u64;
        let closed = closed.into_iter().map(|(_, stats)| stats).collect();

        Emission { active, closed }
    }
}

/// First observation of a key.
fn baseline(sample: &ValidSample) -> ConnectionStats {
    ConnectionStats {
        key: sample.key,
        monotonic_sent_bytes: sample.counters.sent_bytes,
        last_sent_bytes: 0,
        monotonic_recv_bytes: sample.counters.recv_bytes,
        last_recv_bytes: 0,
        monotonic_retransmits: sample.counters.retransmits,
        last_retransmits: 0,
        last_update_epoch: sample.timestamp,
        direction: None,
        ip_translation: None,
    }
}

/// Next state of a known key; the flag reports a counter regression.
fn advance(prior: &ConnectionStats, sample: &ValidSample) -> (ConnectionStats, bool) {
    let counters = sample.counters;
    let deltas = (
        counters.sent_bytes.checked_sub(prior.monotonic_sent_bytes),
        counters.recv_bytes.checked_sub(prior.monotonic_recv_bytes),
        counters.retransmits.checked_sub(prior.monotonic_retransmits),
    );

    let (last_sent, last_recv, last_retransmits, regressed) = match deltas {
        (Some(sent), Some(recv), Some(retransmits)) => (sent, recv, retransmits, false),
        _ => (
            counters.sent_bytes,
            counters.recv_bytes,
            counters.retransmits,
            true,
        ),
    };

    let stats = ConnectionStats {
        key: sample.key,
        monotonic_sent_bytes: counters.sent_bytes,
        last_sent_bytes: last_sent,
        monotonic_recv_bytes: counters.recv_bytes,
        last_recv_bytes: last_recv,
        monotonic_retransmits: counters.retransmits,
        last_retransmits,
        last_update_epoch: sample.timestamp,
        direction: prior.direction,
        ip_translation: prior.ip_translation,
    };
    (stats, regressed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::nat::IPTranslation;
    use crate::types::ConnectionDirection;

    fn sample(sport: u16, sent: u64, ts: u64) -> Sample {
        Sample {
            pid: 42,
            netns: 1,
            sport,
            dport: 443,
            family: 0,
            conn_type: 0,
            source: vec![10, 0, 0, 1],
            dest: vec![93, 184, 216, 34],
            sent_bytes: sent,
            recv_bytes: sent / 2,
            retransmits: 0,
            timestamp: ts,
        }
    }

    fn ports() -> ListeningPorts {
        ListeningPorts::new()
    }

    #[test]
    fn test_new_key_baselines_at_zero() {
        let mut store = ConnectionStore::new();
        let summary = store.diff(&[sample(5000, 1000, 1)], Some(&ports()));
        assert_eq!(summary.active, 1);

        let out = store.emit();
        assert_eq!(out.active.len(), 1);
        let c = &out.active[0];
        assert_eq!(c.monotonic_sent_bytes, 1000);
        assert_eq!(c.last_sent_bytes, 0);
        assert_eq!(c.last_recv_bytes, 0);
        assert_eq!(c.last_update_epoch, 1);
        assert_eq!(c.direction, Some(ConnectionDirection::Outgoing));
    }

    #[test]
    fn test_known_key_reports_exact_delta() {
        let mut store = ConnectionStore::new();
        store.diff(&[sample(5000, 1000, 1)], Some(&ports()));
        store.emit();
        store.diff(&[sample(5000, 1500, 2)], Some(&ports()));
        let out = store.emit();

        let c = &out.active[0];
        assert_eq!(c.last_sent_bytes, 500);
        assert_eq!(c.monotonic_sent_bytes, 1500);
        assert_eq!(c.last_recv_bytes, 250);
        assert_eq!(c.last_update_epoch, 2);
    }

    #[test]
    fn test_regression_rebaselines_without_negative_delta() {
        let mut store = ConnectionStore::new();
        store.diff(&[sample(5000, 1000, 1)], Some(&ports()));
        store.emit();

        let summary = store.diff(&[sample(5000, 300, 2)], Some(&ports()));
        assert_eq!(summary.regressions, 1);
        let out = store.emit();
        let c = &out.active[0];
        assert_eq!(c.last_sent_bytes, 300);
        assert_eq!(c.monotonic_sent_bytes, 300);
        assert_eq!(c.last_recv_bytes, 150);

        // The regressed value is the new baseline
        store.diff(&[sample(5000, 350, 3)], Some(&ports()));
        let out = store.emit();
        assert_eq!(out.active[0].last_sent_bytes, 50);
        assert_eq!(store.stats().regressions, 1);
    }

    #[test]
    fn test_closed_connection_emitted_once_with_frozen_values() {
        let mut store = ConnectionStore::new();
        store.diff(&[sample(5000, 1000, 1)], Some(&ports()));
        store.emit();
        store.diff(&[sample(5000, 1500, 2)], Some(&ports()));
        let live = store.emit().active;

        let summary = store.diff(&[], Some(&ports()));
        assert_eq!(summary.closed, 1);
        assert_eq!(summary.active, 0);
        let out = store.emit();
        assert!(out.active.is_empty());
        assert_eq!(out.closed, live);
        assert_eq!(out.closed[0].last_update_epoch, 2);

        store.diff(&[], Some(&ports()));
        let out = store.emit();
        assert!(out.closed.is_empty());
        assert!(store.is_empty());
        assert_eq!(store.stats().closed_emitted, 1);
    }

    #[test]
    fn test_reused_key_after_close_starts_fresh() {
        let mut store = ConnectionStore::new();
        store.diff(&[sample(5000, 1000, 1)], Some(&ports()));
        store.emit();
        store.diff(&[], Some(&ports()));
        store.emit();

        store.diff(&[sample(5000, 4000, 3)], Some(&ports()));
        let out = store.emit();
        assert_eq!(out.active[0].last_sent_bytes, 0);
        assert_eq!(out.active[0].monotonic_sent_bytes, 4000);
    }

    #[test]
    fn test_duplicate_samples_last_write_wins() {
        let mut store = ConnectionStore::new();
        store.diff(&[sample(5000, 1000, 1)], Some(&ports()));
        store.emit();

        let summary = store.diff(
            &[sample(5000, 1200, 2), sample(5000, 1700, 3)],
            Some(&ports()),
        );
        assert_eq!(summary.duplicates, 1);
        assert_eq!(summary.active, 1);
        let out = store.emit();
        assert_eq!(out.active.len(), 1);
        assert_eq!(out.active[0].last_sent_bytes, 700);
        assert_eq!(out.active[0].last_update_epoch, 3);
    }

    #[test]
    fn test_malformed_sample_dropped_batch_continues() {
        let mut store = ConnectionStore::new();
        let mut bad = sample(6000, 10, 1);
        bad.source = vec![10, 0, 0];
        let summary = store.diff(&[bad, sample(5000, 1000, 1)], Some(&ports()));
        assert_eq!(summary.dropped, 1);
        assert_eq!(summary.active, 1);
        assert_eq!(store.stats().samples_dropped, 1);
        assert_eq!(store.stats().samples_seen, 2);
    }

    #[test]
    fn test_namespaces_do_not_collide() {
        let mut store = ConnectionStore::new();
        let a = sample(5000, 1000, 1);
        let mut b = sample(5000, 2000, 1);
        b.netns = 2;
        let summary = store.diff(&[a, b], Some(&ports()));
        assert_eq!(summary.active, 2);
        assert_eq!(summary.duplicates, 0);
    }

    #[test]
    fn test_missing_listening_set_leaves_direction_unset() {
        let mut store = ConnectionStore::new();
        let summary = store.diff(&[sample(5000, 1000, 1)], None);
        assert_eq!(summary.unclassified, 1);
        assert_eq!(store.emit().active[0].direction, None);
    }

    #[test]
    fn test_sample_tuples_match_live_records() {
        let mut bad = sample(5002, 1, 1);
        bad.source = vec![10, 0, 0];
        let mut other_pid = sample(5000, 1, 1);
        other_pid.pid = 43;
        let batch = [sample(5000, 1, 1), other_pid, sample(5001, 1, 1), bad];

        let mut tuples: Vec<u16> = ConnectionStore::sample_tuples(&batch)
            .iter()
            .map(|t| t.sport)
            .collect();
        tuples.sort();
        // Same 5-tuple under two pids is looked up once
        assert_eq!(tuples, vec![5000, 5001]);
    }

    #[test]
    fn test_emit_orders_by_encoded_key() {
        let mut store = ConnectionStore::new();
        store.diff(
            &[sample(5002, 1, 1), sample(5000, 1, 1), sample(5001, 1, 1)],
            Some(&ports()),
        );
        let ports: Vec<u16> = store.emit().active.iter().map(|c| c.key.sport).collect();
        assert_eq!(ports, vec![5000, 5001, 5002]);
    }

    #[test]
    fn test_translations_applied_and_cleared_on_degrade() {
        let mut store = ConnectionStore::new();
        let batch = [sample(5000, 1000, 1)];
        store.diff(&batch, Some(&ports()));

        let tuple = ConnectionStore::sample_tuples(&batch)[0];
        let translation = IPTranslation {
            repl_src_ip: Address::v4(93, 184, 216, 34),
            repl_dst_ip: Address::v4(203, 0, 113, 5),
            repl_src_port: 443,
            repl_dst_port: 31000,
        };
        let mut outcome = NatOutcome::default();
        outcome.translations.insert(tuple, translation);
        store.apply_translations(&outcome);
        assert_eq!(store.emit().active[0].ip_translation, Some(translation));

        // Closed records keep the translation they carried while live
        store.diff(&[], Some(&ports()));
        assert_eq!(store.emit().closed[0].ip_translation, Some(translation));

        store.diff(&[sample(5000, 1000, 2)], Some(&ports()));
        store.apply_translations(&outcome);
        let degraded = NatOutcome {
            degraded: true,
            ..Default::default()
        };
        store.apply_translations(&degraded);
        assert_eq!(store.emit().active[0].ip_translation, None);
    }
}
