//! Agent configuration.
//!
//! Loaded from a JSON file where every field has a default, then overridden
//! from the environment.

use crate::nat::NatConfig;
use crate::poll::PollerConfig;
use crate::sink::{LogConfig, RotationPolicy};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Complete configuration for the tracker agent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackerConfig {
    #[serde(default)]
    pub poll: PollSection,

    #[serde(default)]
    pub nat: NatSection,

    #[serde(default)]
    pub probe: ProbeSection,

    #[serde(default)]
    pub sink: SinkSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollSection {
    /// Seconds between polls
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NatSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Budget for one interval's conntrack lookups
    #[serde(default = "default_lookup_budget_ms")]
    pub lookup_budget_ms: u64,

    /// JSON conntrack table served by the static tracker
    #[serde(default)]
    pub table_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProbeSection {
    /// JSON-lines file of recorded probe frames
    #[serde(default)]
    pub replay_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkSection {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    /// Rotate once the active log reaches this size
    #[serde(default = "default_rotate_bytes")]
    pub rotate_bytes: u64,

    #[serde(default = "default_true")]
    pub compress_rotated: bool,

    #[serde(default = "default_max_rotated_files")]
    pub max_rotated_files: usize,

    #[serde(default)]
    pub immediate_flush: bool,
}

fn default_true() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    30
}

fn default_lookup_budget_ms() -> u64 {
    500
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("./var/conntrack")
}

fn default_rotate_bytes() -> u64 {
    64 * 1024 * 1024
}

fn default_max_rotated_files() -> usize {
    10
}

impl Default for PollSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            enabled: true,
        }
    }
}

impl Default for NatSection {
    fn default() -> Self {
        Self {
            enabled: true,
            lookup_budget_ms: default_lookup_budget_ms(),
            table_path: None,
        }
    }
}

impl Default for SinkSection {
    fn default() -> Self {
        Self {
            log_dir: default_log_dir(),
            rotate_bytes: default_rotate_bytes(),
            compress_rotated: true,
            max_rotated_files: default_max_rotated_files(),
            immediate_flush: false,
        }
    }
}

impl TrackerConfig {
    /// Load from a JSON file, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path)?;
        let mut config: TrackerConfig = serde_json::from_str(&raw)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = TrackerConfig::default();
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Applies `TRACKER_*` overrides read through `lookup`.
    ///
    /// An interval that does not parse is ignored.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secs) = lookup("TRACKER_POLL_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
            self.poll.interval_secs = secs;
        }
        if let Some(dir) = lookup("TRACKER_LOG_DIR") {
            self.sink.log_dir = PathBuf::from(dir);
        }
        if let Some(path) = lookup("TRACKER_REPLAY_PATH") {
            self.probe.replay_path = Some(PathBuf::from(path));
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll.interval_secs == 0 {
            return Err(ConfigError::ValidationError(
                "poll.interval_secs must be greater than zero".to_string(),
            ));
        }
        if self.sink.rotate_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "sink.rotate_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn poller_config(&self) -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_secs(self.poll.interval_secs),
            enabled: self.poll.enabled,
        }
    }

    pub fn nat_config(&self) -> NatConfig {
        NatConfig {
            enabled: self.nat.enabled,
            lookup_budget: Duration::from_millis(self.nat.lookup_budget_ms),
        }
    }

    pub fn log_config(&self) -> LogConfig {
        LogConfig {
            log_dir: self.sink.log_dir.clone(),
            rotation: RotationPolicy::BySize(self.sink.rotate_bytes),
            compress_rotated: self.sink.compress_rotated,
            max_rotated_files: self.sink.max_rotated_files,
            buffer_size: 8192,
            immediate_flush: self.sink.immediate_flush,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = TrackerConfig::default();
        assert_eq!(config.poll.interval_secs, 30);
        assert!(config.poll.enabled);
        assert_eq!(config.nat.lookup_budget_ms, 500);
        assert_eq!(config.sink.max_rotated_files, 10);
        assert!(config.probe.replay_path.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"poll": {{"interval_secs": 10}}, "nat": {{"enabled": false}}}}"#
        )
        .unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        let config: TrackerConfig = serde_json::from_str(&raw).unwrap();
        assert_eq!(config.poll.interval_secs, 10);
        assert!(config.poll.enabled);
        assert!(!config.nat.enabled);
        assert_eq!(config.nat.lookup_budget_ms, 500);
        assert_eq!(config.sink.rotate_bytes, 64 * 1024 * 1024);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let mut config = TrackerConfig::default();
        config.poll.interval_secs = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();
        assert!(matches!(
            TrackerConfig::load(file.path()),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        // Only test that touches the process environment
        std::env::set_var("TRACKER_POLL_INTERVAL_SECS", "5");
        std::env::set_var("TRACKER_LOG_DIR", "/tmp/conntrack-test");
        std::env::set_var("TRACKER_REPLAY_PATH", "/tmp/frames.jsonl");
        let config = TrackerConfig::from_env();
        std::env::remove_var("TRACKER_POLL_INTERVAL_SECS");
        std::env::remove_var("TRACKER_LOG_DIR");
        std::env::remove_var("TRACKER_REPLAY_PATH");

        let config = config.unwrap();
        assert_eq!(config.poll.interval_secs, 5);
        assert_eq!(config.sink.log_dir, PathBuf::from("/tmp/conntrack-test"));
        assert_eq!(
            config.probe.replay_path,
            Some(PathBuf::from("/tmp/frames.jsonl"))
        );
        assert_eq!(config.poller_config().poll_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_unparseable_interval_override_ignored() {
        let vars: std::collections::HashMap<&str, &str> =
            [("TRACKER_POLL_INTERVAL_SECS", "soon"), ("TRACKER_LOG_DIR", "/var/ct")]
                .into_iter()
                .collect();
        let mut config = TrackerConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.poll.interval_secs, 30);
        assert_eq!(config.sink.log_dir, PathBuf::from("/var/ct"));
        assert!(config.probe.replay_path.is_none());
    }

    #[test]
    fn test_derived_configs() {
        let config = TrackerConfig::default();
        assert_eq!(config.poller_config().poll_interval, Duration::from_secs(30));
        assert_eq!(config.nat_config().lookup_budget, Duration::from_millis(500));
        assert!(matches!(
            config.log_config().rotation,
            RotationPolicy::BySize(b) if b == 64 * 1024 * 1024
        ));
    }
}
