//! Raw socket sample boundary.
//!
//! The kernel probe itself lives outside this crate. It is seen here as a
//! [`SocketProbe`] handing over one [`ProbeFrame`] per interval: every live
//! socket's cumulative counters plus, when known, the listening ports.

use crate::connection::Sample;
use crate::direction::{ListeningPort, ListeningPorts};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("probe I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to decode probe frame at line {line}: {source}")]
    Decode {
        line: usize,
        source: serde_json::Error,
    },

    #[error("probe has no more frames")]
    Exhausted,

    #[error("probe unavailable: {0}")]
    Unavailable(String),
}

/// One interval's worth of probe output.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeFrame {
    pub samples: Vec<Sample>,
    /// `None` when the listening-port set could not be read this interval
    #[serde(default)]
    pub listening: Option<Vec<ListeningPort>>,
}

impl ProbeFrame {
    pub fn listening_ports(&self) -> Option<ListeningPorts> {
        self.listening
            .as_ref()
            .map(|ports| ports.iter().copied().collect())
    }
}

/// Source of raw socket samples. Reads may block.
pub trait SocketProbe: Send {
    fn read_frame(&mut self) -> Result<ProbeFrame, ProbeError>;
}

/// Replays pre-recorded frames, one per read.
///
/// The file format is JSON lines, one [`ProbeFrame`] per line.
#[derive(Debug, Default)]
pub struct ReplayProbe {
    frames: VecDeque<ProbeFrame>,
}

impl ReplayProbe {
    pub fn from_frames(frames: Vec<ProbeFrame>) -> Self {
        Self {
            frames: frames.into(),
        }
    }

    pub fn from_path(path: &Path) -> Result<Self, ProbeError> {
        let reader = BufReader::new(File::open(path)?);
        let mut frames = VecDeque::new();

        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let frame = serde_json::from_str(&line).map_err(|source| ProbeError::Decode {
                line: idx + 1,
                source,
            })?;
            frames.push_back(frame);
        }

        Ok(Self { frames })
    }

    pub fn remaining(&self) -> usize {
        self.frames.len()
    }
}

impl SocketProbe for ReplayProbe {
    fn read_frame(&mut self) -> Result<ProbeFrame, ProbeError> {
        self.frames.pop_front().ok_or(ProbeError::Exhausted)
    }
}
