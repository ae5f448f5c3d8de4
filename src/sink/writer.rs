//! # Connection Log Writer
//!
//! Rotation-capable JSON-lines writer for interval reports. One line per
//! [`IntervalReport`]; rotated files are optionally gzip-compressed and the
//! oldest beyond the retention limit are removed.

use super::{SinkError, LOG_FILE_NAME};
use crate::tracker::IntervalReport;
use parking_lot::Mutex;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Connection log configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Directory holding the active and rotated logs
    pub log_dir: PathBuf,

    /// Rotation policy
    pub rotation: RotationPolicy,

    /// Gzip rotated logs
    pub compress_rotated: bool,

    /// Maximum number of rotated files to keep
    pub max_rotated_files: usize,

    /// Buffer size for writes (bytes)
    pub buffer_size: usize,

    /// Flush after every report
    pub immediate_flush: bool,
}

/// File rotation policy
#[derive(Debug, Clone)]
pub enum RotationPolicy {
    /// Rotate when file exceeds size (bytes)
    BySize(u64),

    /// Rotate every N seconds
    ByTime(u64),

    /// No rotation
    Never,
}

impl Default for LogConfig {
    fn default() -> Self {
        LogConfig {
            log_dir: PathBuf::from("./var/conntrack"),
            rotation: RotationPolicy::BySize(64 * 1024 * 1024),
            compress_rotated: true,
            max_rotated_files: 10,
            buffer_size: 8192,
            immediate_flush: false,
        }
    }
}

/// Thread-safe connection log writer
pub struct ConnectionLogWriter {
    config: LogConfig,
    current_file: Mutex<Option<LogFile>>,
    base_path: PathBuf,
    rotation_seq: AtomicU64,
}

struct LogFile {
    writer: BufWriter<File>,
    path: PathBuf,
    created_at: SystemTime,
    bytes_written: u64,
    reports_written: u64,
}

impl ConnectionLogWriter {
    /// Create a new writer, creating the log directory if needed
    pub fn new(config: LogConfig) -> Result<Self, SinkError> {
        fs::create_dir_all(&config.log_dir)?;

        let base_path = config.log_dir.clone();
        let writer = ConnectionLogWriter {
            config,
            current_file: Mutex::new(None),
            base_path,
            rotation_seq: AtomicU64::new(0),
        };

        writer.rotate_if_needed(true)?;

        Ok(writer)
    }

    /// Append one report as a JSON line
    pub fn write_report(&self, report: &IntervalReport) -> Result<(), SinkError> {
        let mut line = serde_json::to_vec(report)?;
        line.push(b'\n');

        let mut file_guard = self.current_file.lock();

        if file_guard.is_none() {
            drop(file_guard);
            self.rotate_if_needed(true)?;
            file_guard = self.current_file.lock();
        }

        if let Some(ref mut file) = *file_guard {
            file.writer.write_all(&line)?;

            if self.config.immediate_flush {
                file.writer.flush()?;
            }

            file.bytes_written += line.len() as u64;
            file.reports_written += 1;

            if self.should_rotate(file) {
                drop(file_guard);
                self.rotate_if_needed(false)?;
            }
        }

        Ok(())
    }

    /// Flush pending writes
    pub fn flush(&self) -> Result<(), SinkError> {
        let mut file_guard = self.current_file.lock();

        if let Some(ref mut file) = *file_guard {
            file.writer.flush()?;
        }

        Ok(())
    }

    /// Path of the active log file
    pub fn current_path(&self) -> PathBuf {
        self.base_path.join(LOG_FILE_NAME)
    }

    /// Reports written to the active file since it was opened
    pub fn reports_in_current_file(&self) -> u64 {
        self.current_file
            .lock()
            .as_ref()
            .map(|f| f.reports_written)
            .unwrap_or(0)
    }

    fn should_rotate(&self, file: &LogFile) -> bool {
        match self.config.rotation {
            RotationPolicy::BySize(max_bytes) => file.bytes_written >= max_bytes,
            RotationPolicy::ByTime(seconds) => {
                let elapsed = SystemTime::now()
                    .duration_since(file.created_at)
                    .unwrap_or_default()
                    .as_secs();
                elapsed >= seconds
            }
            RotationPolicy::Never => false,
        }
    }

    fn rotate_if_needed(&self, force_create: bool) -> Result<(), SinkError> {
        let mut file_guard = self.current_file.lock();

        let should_rotate = if let Some(ref file) = *file_guard {
            self.should_rotate(file) || force_create
        } else {
            force_create
        };

        if !should_rotate {
            return Ok(());
        }

        if let Some(mut old_file) = file_guard.take() {
            old_file.writer.flush()?;

            let rotated_path = self.rotated_path();
            fs::rename(&old_file.path, &rotated_path)?;

            if self.config.compress_rotated {
                self.compress_file(&rotated_path)?;
            }

            self.cleanup_old_files()?;
        }

        let new_path = self.current_path();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&new_path)?;

        *file_guard = Some(LogFile {
            writer: BufWriter::with_capacity(self.config.buffer_size, file),
            path: new_path,
            created_at: SystemTime::now(),
            bytes_written: 0,
            reports_written: 0,
        });

        Ok(())
    }

    /// `connections.log.<ms>-<seq>`; names sort in rotation order
    fn rotated_path(&self) -> PathBuf {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis())
            .unwrap_or(0);
        let seq = self.rotation_seq.fetch_add(1, Ordering::Relaxed);
        self.base_path
            .join(format!("{}.{:013}-{:06}", LOG_FILE_NAME, millis, seq))
    }

    fn compress_file(&self, path: &Path) -> Result<(), SinkError> {
        use flate2::write::GzEncoder;
        use flate2::Compression;

        let input = fs::read(path)?;

        let mut output_path = path.as_os_str().to_owned();
        output_path.push(".gz");
        let output_file = File::create(PathBuf::from(output_path))?;

        let mut encoder = GzEncoder::new(output_file, Compression::default());
        encoder.write_all(&input)?;
        encoder.finish()?;

        fs::remove_file(path).ok();

        Ok(())
    }

    fn cleanup_old_files(&self) -> Result<(), SinkError> {
        let rotated = rotated_files(&self.base_path)?;
        let excess = rotated.len().saturating_sub(self.config.max_rotated_files);

        for path in rotated.iter().take(excess) {
            fs::remove_file(path).ok();
        }

        Ok(())
    }

    /// Rotated files currently on disk, oldest first
    pub fn rotated_files(&self) -> Result<Vec<PathBuf>, SinkError> {
        rotated_files(&self.base_path)
    }
}

/// Rotated logs in `dir`, oldest first. Names sort in rotation order.
pub fn rotated_files(dir: &Path) -> Result<Vec<PathBuf>, SinkError> {
    let prefix = format!("{}.", LOG_FILE_NAME);
    let mut rotated: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|n| n.to_str())
                .map(|name| name.starts_with(&prefix))
                .unwrap_or(false)
        })
        .collect();
    rotated.sort();
    Ok(rotated)
}

impl Drop for ConnectionLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
