//! Fixed-interval polling task.
//!
//! Each tick reads one probe frame, runs the diff pass over the store,
//! resolves NAT translations for the live connections and publishes the
//! resulting [`IntervalReport`].
//!
//! # Failure model
//!
//! A poll either completes or fails as a whole. A failed probe read returns
//! before the store is touched, so the next interval diffs against the last
//! good snapshot. NAT lookups run before the diff pass, so a poll cancelled
//! while waiting on them also leaves the store untouched. Failures are logged and the task keeps ticking; only an
//! exhausted probe ends it.
//!
//! # Ownership
//!
//! The store lives behind an async mutex held for the whole poll. Scheduled
//! and on-demand polls therefore never interleave, and nothing outside the
//! poll can reach the live map. Readers use the [`SnapshotHandle`].

use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::interval;

use crate::error::{TrackerError, TrackerResult};
use crate::nat::NatAdapter;
use crate::probe::{ProbeError, SocketProbe};
use crate::tracker::{ConnectionStore, IntervalReport, SnapshotHandle};
use crate::types::now_ms;
use log::{debug, error, info, warn};

use super::service::PollStats;

/// Configuration for the polling task.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Interval between polls
    pub poll_interval: Duration,
    /// Whether the scheduled task runs
    pub enabled: bool,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            enabled: true,
        }
    }
}

struct PollState {
    store: ConnectionStore,
    interval: u64,
}

/// Drives the connection store once per interval.
pub struct Poller {
    probe: Arc<Mutex<Box<dyn SocketProbe>>>,
    state: tokio::sync::Mutex<PollState>,
    nat: NatAdapter,
    snapshot: SnapshotHandle,
    reports: Option<mpsc::Sender<Arc<IntervalReport>>>,
    config: PollerConfig,
    /// Timestamp of the last successful poll
    last_poll_at: Arc<RwLock<u64>>,
    failed_polls: AtomicU64,
}

impl Poller {
    pub fn new(probe: Box<dyn SocketProbe>, nat: NatAdapter, config: PollerConfig) -> Self {
        Self {
            probe: Arc::new(Mutex::new(probe)),
            state: tokio::sync::Mutex::new(PollState {
                store: ConnectionStore::new(),
                interval: 0,
            }),
            nat,
            snapshot: SnapshotHandle::new(),
            reports: None,
            config,
            last_poll_at: Arc::new(RwLock::new(0)),
            failed_polls: AtomicU64::new(0),
        }
    }

    /// Forwards every published report to `tx` as well.
    pub fn with_report_channel(mut self, tx: mpsc::Sender<Arc<IntervalReport>>) -> Self {
        self.reports = Some(tx);
        self
    }

    pub fn snapshot(&self) -> SnapshotHandle {
        self.snapshot.clone()
    }

    /// Milliseconds since UNIX epoch of the last successful poll, 0 if none.
    pub fn last_poll(&self) -> u64 {
        *self.last_poll_at.read()
    }

    pub fn failed_polls(&self) -> u64 {
        self.failed_polls.load(Ordering::Relaxed)
    }

    /// Runs the polling loop until the probe is exhausted.
    ///
    /// Returns immediately when disabled. Should be spawned as a tokio task.
    pub async fn start(self: Arc<Self>) {
        if !self.config.enabled {
            info!("Connection polling is disabled, skipping");
            return;
        }

        info!(
            "Starting connection polling with {}-second interval",
            self.config.poll_interval.as_secs()
        );

        let mut ticker = interval(self.config.poll_interval);

        loop {
            ticker.tick().await;
            if !self.do_poll().await {
                info!("Probe exhausted, stopping connection polling");
                return;
            }
        }
    }

    /// One scheduled poll. Returns false once the probe has nothing left.
    async fn do_poll(&self) -> bool {
        match self.poll_once().await {
            Ok(stats) => {
                info!(
                    "Interval {}: {} active, {} closed, {} dropped, {} unclassified, {} NAT lookup errors in {}ms{}",
                    stats.interval,
                    stats.active,
                    stats.closed,
                    stats.dropped,
                    stats.unclassified,
                    stats.nat_lookup_errors,
                    stats.duration_ms,
                    if stats.nat_degraded { " (no NAT)" } else { "" }
                );
                true
            }
            Err(TrackerError::Probe(ProbeError::Exhausted)) => false,
            Err(e) => {
                error!("Connection poll failed: {}", e);
                true
            }
        }
    }

    /// Performs one complete poll and publishes its report.
    pub async fn poll_once(&self) -> TrackerResult<PollStats> {
        let mut state = self.state.lock().await;
        let start = now_ms();

        let probe = Arc::clone(&self.probe);
        let frame = match tokio::task::spawn_blocking(move || probe.lock().read_frame()).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(e)) => {
                self.failed_polls.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
            Err(e) => {
                self.failed_polls.fetch_add(1, Ordering::Relaxed);
                return Err(e.into());
            }
        };

        let listening = frame.listening_ports();
        if listening.is_none() {
            warn!("Listening ports unavailable, non-local connections left unclassified");
        }

        // Last await of the poll. Everything after it runs to completion, so a
        // poll dropped here leaves the store at the previous emitted interval.
        let nat = self
            .nat
            .resolve(ConnectionStore::sample_tuples(&frame.samples))
            .await;

        let summary = state.store.diff(&frame.samples, listening.as_ref());
        debug!("Diff pass: {:?}", summary);
        state.store.apply_translations(&nat);

        state.interval += 1;
        let emission = state.store.emit();
        let report = Arc::new(IntervalReport::new(
            state.interval,
            emission,
            &summary,
            nat.degraded,
        ));

        self.snapshot.publish(Arc::clone(&report));
        if let Some(tx) = &self.reports {
            if let Err(e) = tx.try_send(Arc::clone(&report)) {
                warn!("Dropping report for interval {}: {}", report.interval, e);
            }
        }

        let finished = now_ms();
        *self.last_poll_at.write() = finished;

        Ok(PollStats {
            interval: report.interval,
            active: summary.active,
            closed: summary.closed,
            dropped: summary.dropped,
            regressions: summary.regressions,
            unclassified: summary.unclassified,
            nat_degraded: nat.degraded,
            nat_lookup_errors: nat.lookup_errors,
            duration_ms: finished.saturating_sub(start),
            timestamp: finished,
        })
    }
}
