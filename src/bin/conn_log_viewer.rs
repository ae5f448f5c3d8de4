//! # Connection Log Viewer CLI
//!
//! Command-line tool for inspecting the tracker's connection log.
//!
//! Usage:
//!   conn_log_viewer recent [--limit N]
//!   conn_log_viewer closed [--limit N]
//!   conn_log_viewer by-pid <pid> [--limit N]
//!   conn_log_viewer stats

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracker::sink::LogQuery;
use tracker::{ConnectionStats, IntervalReport};

#[derive(Parser)]
#[command(name = "conn_log_viewer")]
#[command(about = "Query the connection tracker's interval log", long_about = None)]
struct Cli {
    /// Path to connection log directory
    #[arg(short, long, default_value = "./var/conntrack")]
    dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the most recent interval reports
    Recent {
        /// Maximum number of reports to show
        #[arg(short, long, default_value_t = 5)]
        limit: usize,
    },

    /// Show connections that closed
    Closed {
        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show records for a specific process
    ByPid {
        /// Process ID to filter by
        pid: u32,

        /// Maximum number of records to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show aggregate statistics
    Stats,
}

fn main() -> Result<(), String> {
    let cli = Cli::parse();

    let query = LogQuery::new(&cli.dir);

    match cli.command {
        Commands::Recent { limit } => {
            println!("Recent {} interval reports:\n", limit);
            let reports = query.recent(limit).map_err(|e| e.to_string())?;

            for report in reports {
                print_report(&report);
            }
        }

        Commands::Closed { limit } => {
            println!("Closed connections:\n");
            let records = query.closed(limit).map_err(|e| e.to_string())?;

            for record in records {
                print_record(&record);
            }
        }

        Commands::ByPid { pid, limit } => {
            println!("Connections for pid {}:\n", pid);
            let records = query.by_pid(pid, limit).map_err(|e| e.to_string())?;

            if records.is_empty() {
                println!("No records for pid {}", pid);
            }
            for record in records {
                print_record(&record);
            }
        }

        Commands::Stats => {
            let stats = query.statistics().map_err(|e| e.to_string())?;

            println!("Connection Log Statistics\n");
            println!("Reports:          {}", stats.reports);
            println!("Records:          {}", stats.records);
            println!("Closed:           {}", stats.closed_records);
            println!("Dropped samples:  {}", stats.dropped_samples);
            println!("NAT degraded:     {}", stats.nat_degraded_reports);
            println!("Bytes sent:       {}", stats.bytes_sent);
            println!("Bytes received:   {}", stats.bytes_received);
            println!("Retransmits:      {}", stats.retransmits);
        }
    }

    Ok(())
}

fn print_report(report: &IntervalReport) {
    println!("═══════════════════════════════════════════════════════════");
    println!(
        "Interval {} | {} (Unix ms) | {} active | {} closed | {} dropped{}",
        report.interval,
        report.collected_at,
        report.active,
        report.closed,
        report.dropped,
        if report.nat_degraded { " | NAT degraded" } else { "" }
    );
    println!("═══════════════════════════════════════════════════════════\n");

    for record in report.active_connections() {
        print_record(record);
    }

    if !report.closed_connections().is_empty() {
        println!("───────────────────────────────────────────────────────────");
        println!("Closed ({})", report.closed_connections().len());
        println!("───────────────────────────────────────────────────────────\n");

        for record in report.closed_connections() {
            print_record(record);
        }
    }
}

fn print_record(record: &ConnectionStats) {
    println!("{}", record);

    if let Some(ref translation) = record.ip_translation {
        println!(
            "   ↳ NAT: {}:{} <-> {}:{}",
            translation.repl_src_ip,
            translation.repl_src_port,
            translation.repl_dst_ip,
            translation.repl_dst_port
        );
    }
}
