//! # Sink Recorder
//!
//! Consumer side of the report channel: drains published interval reports
//! into the connection log and keeps running totals.

use super::writer::ConnectionLogWriter;
use super::SinkError;
use crate::tracker::IntervalReport;
use log::{error, info};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Running totals for the sink
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub reports: u64,
    pub records: u64,
    pub closed_records: u64,
    pub nat_degraded_reports: u64,
    pub write_failures: u64,
}

/// Writes reports to the connection log
pub struct SinkRecorder {
    writer: Arc<ConnectionLogWriter>,
    stats: Arc<RwLock<SinkStats>>,
}

impl SinkRecorder {
    pub fn new(writer: ConnectionLogWriter) -> Self {
        SinkRecorder {
            writer: Arc::new(writer),
            stats: Arc::new(RwLock::new(SinkStats::default())),
        }
    }

    /// Write one report and update totals
    pub fn record(&self, report: &IntervalReport) -> Result<(), SinkError> {
        if let Err(e) = self.writer.write_report(report) {
            self.stats.write().write_failures += 1;
            return Err(e);
        }

        let mut stats = self.stats.write();
        stats.reports += 1;
        stats.records += report.connections.len() as u64;
        stats.closed_records += report.closed as u64;
        if report.nat_degraded {
            stats.nat_degraded_reports += 1;
        }
        Ok(())
    }

    /// Drain `rx` until every sender is gone, then flush.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Arc<IntervalReport>>) {
        while let Some(report) = rx.recv().await {
            if let Err(e) = self.record(&report) {
                error!("Failed to record interval {}: {}", report.interval, e);
            }
        }

        if let Err(e) = self.writer.flush() {
            error!("Failed to flush connection log: {}", e);
        }
        let stats = self.stats();
        info!(
            "Report channel closed after {} reports ({} records, {} write failures)",
            stats.reports, stats.records, stats.write_failures
        );
    }

    pub fn flush(&self) -> Result<(), SinkError> {
        self.writer.flush()
    }

    pub fn stats(&self) -> SinkStats {
        self.stats.read().clone()
    }
}
