use crate::config::ConfigError;
use crate::probe::ProbeError;
use crate::sink::SinkError;
use thiserror::Error;

/// Crate-level error for a polling interval or agent startup.
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error("probe read failed: {0}")]
    Probe(#[from] ProbeError),

    #[error("sink error: {0}")]
    Sink(#[from] SinkError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type TrackerResult<T> = Result<T, TrackerError>;
