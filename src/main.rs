//! # Tracker Agent Entry Point
//!
//! Loads the configuration, wires the probe, conntrack lookups and
//! connection log together, and runs the polling task until the probe is
//! exhausted or Ctrl-C.

use clap::Parser;
use log::{error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracker::sink::{ConnectionLogWriter, SinkRecorder};
use tracker::{
    NatAdapter, Poller, ReplayProbe, StaticConntrack, TrackerConfig, TrackerError,
};

#[derive(Parser)]
#[command(name = "tracker-agent")]
#[command(about = "Per-interval connection tracking agent", long_about = None)]
struct Cli {
    /// JSON configuration file; defaults plus environment when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Probe frames to replay (overrides probe.replay_path)
    #[arg(long, value_name = "FILE")]
    replay: Option<PathBuf>,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    if let Err(e) = run(Cli::parse()).await {
        error!("tracker-agent failed: {}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), TrackerError> {
    let mut config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::from_env()?,
    };
    if let Some(replay) = cli.replay {
        config.probe.replay_path = Some(replay);
    }

    let replay_path = config.probe.replay_path.clone().ok_or_else(|| {
        tracker::ConfigError::ValidationError(
            "probe.replay_path (or --replay) is required".to_string(),
        )
    })?;
    let probe = ReplayProbe::from_path(&replay_path)?;
    info!(
        "Loaded {} probe frames from {}",
        probe.remaining(),
        replay_path.display()
    );

    let nat = match &config.nat.table_path {
        Some(path) if config.nat.enabled => match StaticConntrack::load(path) {
            Ok(table) => {
                info!("Loaded {} conntrack entries from {}", table.len(), path.display());
                NatAdapter::new(Arc::new(table), config.nat_config())
            }
            Err(e) => {
                warn!("NAT enrichment disabled: {}", e);
                NatAdapter::disabled()
            }
        },
        _ => NatAdapter::disabled(),
    };

    let writer = ConnectionLogWriter::new(config.log_config())?;
    info!("Writing connection log to {}", writer.current_path().display());
    let recorder = Arc::new(SinkRecorder::new(writer));

    let (tx, rx) = mpsc::channel(64);
    let sink_task = tokio::spawn(Arc::clone(&recorder).run(rx));

    let poller = Arc::new(
        Poller::new(Box::new(probe), nat, config.poller_config()).with_report_channel(tx),
    );

    tokio::select! {
        _ = Arc::clone(&poller).start() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupted, shutting down");
        }
    }

    // Dropping the poller closes the report channel and lets the sink drain
    drop(poller);
    sink_task.await?;

    let stats = recorder.stats();
    info!(
        "Recorded {} reports, {} connection records ({} closed)",
        stats.reports, stats.records, stats.closed_records
    );
    Ok(())
}
