//! Example: Running the connection Poller as a background task.
//!
//! Replays three intervals of probe output for one outgoing HTTPS
//! connection and one inbound SSH session, resolves NAT translations from
//! an in-memory conntrack table, and prints each published report.
//!
//! Run with: `cargo run --example poller_integration`

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracker::{
    Address, ConnectionType, FiveTuple, IPTranslation, ListeningPort, NatAdapter, NatConfig,
    Poller, PollerConfig, ProbeFrame, ReplayProbe, Sample, StaticConntrack,
};

fn sample(pid: u32, sport: u16, dest: [u8; 4], dport: u16, sent: u64, recv: u64) -> Sample {
    Sample {
        pid,
        netns: 0,
        sport,
        dport,
        family: 0,
        conn_type: 0,
        source: vec![10, 0, 0, 5],
        dest: dest.to_vec(),
        sent_bytes: sent,
        recv_bytes: recv,
        retransmits: 0,
        timestamp: 0,
    }
}

fn frames() -> Vec<ProbeFrame> {
    let listening = Some(vec![ListeningPort {
        netns: 0,
        conn_type: ConnectionType::Tcp,
        port: 22,
    }]);

    vec![
        ProbeFrame {
            samples: vec![
                sample(4242, 51000, [93, 184, 216, 34], 443, 1_200, 8_000),
                sample(900, 22, [10, 0, 0, 77], 60022, 300, 150),
            ],
            listening: listening.clone(),
        },
        ProbeFrame {
            samples: vec![
                sample(4242, 51000, [93, 184, 216, 34], 443, 2_000, 48_000),
                sample(900, 22, [10, 0, 0, 77], 60022, 900, 400),
            ],
            listening: listening.clone(),
        },
        // SSH session gone
        ProbeFrame {
            samples: vec![sample(4242, 51000, [93, 184, 216, 34], 443, 2_500, 50_000)],
            listening,
        },
    ]
}

fn conntrack() -> StaticConntrack {
    let table = StaticConntrack::new();
    table.insert(
        FiveTuple {
            conn_type: ConnectionType::Tcp,
            source: Address::v4(10, 0, 0, 5),
            sport: 51000,
            dest: Address::v4(93, 184, 216, 34),
            dport: 443,
        },
        IPTranslation {
            repl_src_ip: Address::v4(93, 184, 216, 34),
            repl_dst_ip: Address::v4(203, 0, 113, 9),
            repl_src_port: 443,
            repl_dst_port: 61000,
        },
    );
    table
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let nat = NatAdapter::new(Arc::new(conntrack()), NatConfig::default());
    let (tx, mut rx) = mpsc::channel(8);

    let poller = Arc::new(
        Poller::new(
            Box::new(ReplayProbe::from_frames(frames())),
            nat,
            PollerConfig {
                poll_interval: Duration::from_millis(200),
                enabled: true,
            },
        )
        .with_report_channel(tx),
    );

    // Runs until the replayed frames are used up, then drops its sender
    let task = tokio::spawn(Arc::clone(&poller).start());
    drop(poller);

    while let Some(report) = rx.recv().await {
        println!(
            "── interval {} ({} active, {} closed) ──",
            report.interval, report.active, report.closed
        );
        for conn in report.active_connections() {
            println!("  {}", conn);
        }
        for conn in report.closed_connections() {
            println!("  closed: {}", conn);
        }
    }

    if let Err(e) = task.await {
        eprintln!("poller task failed: {}", e);
    }
}
