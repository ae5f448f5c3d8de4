//! # Sink Module
//!
//! Local consumer for interval reports: a rotating JSON-lines connection log
//! and the task that feeds it from the poller's report channel.

pub mod query;
pub mod recorder;
pub mod writer;

pub use query::{LogQuery, LogStatistics};
pub use recorder::{SinkRecorder, SinkStats};
pub use writer::{rotated_files, ConnectionLogWriter, LogConfig, RotationPolicy};

use thiserror::Error;

/// Name of the active log file; rotated files append `.<ms>-<seq>[.gz]`.
pub const LOG_FILE_NAME: &str = "connections.log";

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}
