//! Best-effort NAT lookups for one polling interval.

use super::{Conntracker, FiveTuple, IPTranslation, NatError};
use log::warn;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Configuration for NAT enrichment.
#[derive(Debug, Clone)]
pub struct NatConfig {
    /// Whether lookups are performed at all
    pub enabled: bool,
    /// Wall-clock budget for one interval's batch of lookups
    pub lookup_budget: Duration,
}

impl Default for NatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            lookup_budget: Duration::from_millis(500),
        }
    }
}

/// Result of one batch of lookups.
#[derive(Debug, Clone, Default)]
pub struct NatOutcome {
    /// Tuples with a known translation; absent tuples have none
    pub translations: HashMap<FiveTuple, IPTranslation>,
    /// True when the batch was skipped, timed out or the tracker was unavailable
    pub degraded: bool,
    /// Individual lookups that failed
    pub lookup_errors: usize,
}

impl NatOutcome {
    fn degraded() -> Self {
        Self {
            degraded: true,
            ..Default::default()
        }
    }
}

/// Runs conntrack lookups on the blocking pool, bounded by a time budget.
///
/// Only one batch is in flight at a time. A batch that overruns its budget
/// keeps running in the background; until it finishes, later intervals are
/// degraded immediately rather than stacking more blocking work.
pub struct NatAdapter {
    tracker: Option<Arc<dyn Conntracker>>,
    config: NatConfig,
    in_flight: Arc<AtomicBool>,
}

impl NatAdapter {
    pub fn new(tracker: Arc<dyn Conntracker>, config: NatConfig) -> Self {
        Self {
            tracker: Some(tracker),
            config,
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Adapter that never attaches translations.
    pub fn disabled() -> Self {
        Self {
            tracker: None,
            config: NatConfig {
                enabled: false,
                ..Default::default()
            },
            in_flight: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled && self.tracker.is_some()
    }

    /// Looks up every tuple, returning whatever resolved within the budget.
    pub async fn resolve(&self, tuples: Vec<FiveTuple>) -> NatOutcome {
        let tracker = match (&self.tracker, self.config.enabled) {
            (Some(tracker), true) => Arc::clone(tracker),
            _ => return NatOutcome::default(),
        };
        if tuples.is_empty() {
            return NatOutcome::default();
        }

        if self.in_flight.swap(true, Ordering::AcqRel) {
            warn!("Previous conntrack batch still running, emitting without NAT translation");
            return NatOutcome::degraded();
        }

        let in_flight = Arc::clone(&self.in_flight);
        let task = tokio::task::spawn_blocking(move || {
            let _guard = InFlightGuard(in_flight);
            lookup_batch(tracker.as_ref(), &tuples)
        });

        match timeout(self.config.lookup_budget, task).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                warn!("Conntrack lookup task failed: {}", e);
                NatOutcome::degraded()
            }
            Err(_) => {
                warn!(
                    "Conntrack lookups exceeded {}ms budget, emitting without NAT translation",
                    self.config.lookup_budget.as_millis()
                );
                NatOutcome::degraded()
            }
        }
    }
}

/// Clears the in-flight flag when the blocking batch ends, however it ends.
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn lookup_batch(tracker: &dyn Conntracker, tuples: &[FiveTuple]) -> NatOutcome {
    let mut outcome = NatOutcome::default();

    for tuple in tuples {
        match tracker.lookup(tuple) {
            Ok(Some(translation)) => {
                outcome.translations.insert(*tuple, translation);
            }
            Ok(None) => {}
            Err(NatError::Unavailable(reason)) => {
                warn!("Conntrack unavailable, emitting without NAT translation: {}", reason);
                return NatOutcome::degraded();
            }
            Err(e) => {
                warn!(
                    "Conntrack lookup for {}:{} -> {}:{} failed: {}",
                    tuple.source, tuple.sport, tuple.dest, tuple.dport, e
                );
                outcome.lookup_errors += 1;
            }
        }
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::nat::StaticConntrack;
    use crate::types::ConnectionType;

    fn tuple(sport: u16) -> FiveTuple {
        FiveTuple {
            conn_type: ConnectionType::Tcp,
            source: Address::v4(10, 0, 0, 1),
            sport,
            dest: Address::v4(93, 184, 216, 34),
            dport: 443,
        }
    }

    fn translation() -> IPTranslation {
        IPTranslation {
            repl_src_ip: Address::v4(93, 184, 216, 34),
            repl_dst_ip: Address::v4(203, 0, 113, 5),
            repl_src_port: 443,
            repl_dst_port: 31000,
        }
    }

    struct SlowTracker(Duration);

    impl Conntracker for SlowTracker {
        fn lookup(&self, _tuple: &FiveTuple) -> Result<Option<IPTranslation>, NatError> {
            std::thread::sleep(self.0);
            Ok(None)
        }
    }

    struct FailingTracker {
        unavailable: bool,
    }

    impl Conntracker for FailingTracker {
        fn lookup(&self, tuple: &FiveTuple) -> Result<Option<IPTranslation>, NatError> {
            if self.unavailable {
                Err(NatError::Unavailable("netlink socket closed".to_string()))
            } else if tuple.sport == 1 {
                Err(NatError::Lookup("EINVAL".to_string()))
            } else {
                Ok(None)
            }
        }
    }

    #[tokio::test]
    async fn test_resolve_hits_and_misses() {
        let table = Arc::new(StaticConntrack::new());
        table.insert(tuple(5000), translation());
        let adapter = NatAdapter::new(table, NatConfig::default());

        let outcome = adapter.resolve(vec![tuple(5000), tuple(5001)]).await;
        assert!(!outcome.degraded);
        assert_eq!(outcome.translations.len(), 1);
        assert_eq!(outcome.translations.get(&tuple(5000)), Some(&translation()));
        assert!(outcome.translations.get(&tuple(5001)).is_none());
    }

    #[tokio::test]
    async fn test_disabled_adapter_is_not_degraded() {
        let adapter = NatAdapter::disabled();
        assert!(!adapter.is_enabled());
        let outcome = adapter.resolve(vec![tuple(5000)]).await;
        assert!(!outcome.degraded);
        assert!(outcome.translations.is_empty());
    }

    #[tokio::test]
    async fn test_slow_lookup_degrades_and_blocks_next_batch() {
        let adapter = NatAdapter::new(
            Arc::new(SlowTracker(Duration::from_millis(300))),
            NatConfig {
                enabled: true,
                lookup_budget: Duration::from_millis(20),
            },
        );

        let first = adapter.resolve(vec![tuple(5000)]).await;
        assert!(first.degraded);

        // The overrunning batch is still on the blocking pool
        let second = adapter.resolve(vec![tuple(5000)]).await;
        assert!(second.degraded);

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(!adapter.in_flight.load(Ordering::Acquire));
    }

    #[tokio::test]
    async fn test_unavailable_tracker_degrades() {
        let adapter = NatAdapter::new(
            Arc::new(FailingTracker { unavailable: true }),
            NatConfig::default(),
        );
        let outcome = adapter.resolve(vec![tuple(5000)]).await;
        assert!(outcome.degraded);
    }

    #[tokio::test]
    async fn test_single_lookup_error_is_counted_not_fatal() {
        let adapter = NatAdapter::new(
            Arc::new(FailingTracker { unavailable: false }),
            NatConfig::default(),
        );
        let outcome = adapter.resolve(vec![tuple(1), tuple(2)]).await;
        assert!(!outcome.degraded);
        assert_eq!(outcome.lookup_errors, 1);
    }
}
