//! # Connection Log Query
//!
//! Reads the active and rotated connection logs back for inspection.

use super::{rotated_files, SinkError, LOG_FILE_NAME};
use crate::connection::ConnectionStats;
use crate::tracker::IntervalReport;
use flate2::read::GzDecoder;
use log::warn;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

/// Aggregate view over every report in the log directory
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LogStatistics {
    pub reports: usize,
    pub records: usize,
    pub closed_records: usize,
    pub nat_degraded_reports: usize,
    pub dropped_samples: usize,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub retransmits: u64,
}

/// Reader over a connection log directory
pub struct LogQuery {
    dir: PathBuf,
}

impl LogQuery {
    pub fn new(dir: &Path) -> Self {
        LogQuery {
            dir: dir.to_path_buf(),
        }
    }

    /// Every readable report, oldest first.
    ///
    /// Lines that fail to parse (e.g. a partially written tail) are skipped.
    pub fn reports(&self) -> Result<Vec<IntervalReport>, SinkError> {
        let mut files = rotated_files(&self.dir)?;

        let active = self.dir.join(LOG_FILE_NAME);
        if active.exists() {
            files.push(active);
        }

        let mut reports = Vec::new();
        for path in files {
            let file = File::open(&path)?;
            let reader: Box<dyn Read> = if path.extension().map(|e| e == "gz").unwrap_or(false) {
                Box::new(GzDecoder::new(file))
            } else {
                Box::new(file)
            };

            for line in BufReader::new(reader).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<IntervalReport>(&line) {
                    Ok(report) => reports.push(report),
                    Err(e) => warn!("Skipping unreadable line in {}: {}", path.display(), e),
                }
            }
        }

        Ok(reports)
    }

    /// Last `limit` reports, newest first
    pub fn recent(&self, limit: usize) -> Result<Vec<IntervalReport>, SinkError> {
        let mut reports = self.reports()?;
        reports.reverse();
        reports.truncate(limit);
        Ok(reports)
    }

    /// Closed connection records, newest first
    pub fn closed(&self, limit: Option<usize>) -> Result<Vec<ConnectionStats>, SinkError> {
        let mut closed: Vec<ConnectionStats> = self
            .reports()?
            .iter()
            .rev()
            .flat_map(|r| r.closed_connections().iter().rev().cloned())
            .collect();
        if let Some(limit) = limit {
            closed.truncate(limit);
        }
        Ok(closed)
    }

    /// Records of one process, newest first
    pub fn by_pid(&self, pid: u32, limit: Option<usize>) -> Result<Vec<ConnectionStats>, SinkError> {
        let mut records: Vec<ConnectionStats> = self
            .reports()?
            .iter()
            .rev()
            .flat_map(|r| r.connections.iter().filter(|c| c.key.pid == pid).cloned())
            .collect();
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    pub fn statistics(&self) -> Result<LogStatistics, SinkError> {
        let mut stats = LogStatistics::default();
        for report in self.reports()? {
            stats.reports += 1;
            stats.records += report.connections.len();
            stats.closed_records += report.closed;
            stats.dropped_samples += report.dropped;
            if report.nat_degraded {
                stats.nat_degraded_reports += 1;
            }
            // Closed records repeat the previous interval's deltas
            for conn in report.active_connections() {
                stats.bytes_sent += conn.last_sent_bytes;
                stats.bytes_received += conn.last_recv_bytes;
                stats.retransmits += conn.last_retransmits as u64;
            }
        }
        Ok(stats)
    }
}
