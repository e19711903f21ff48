// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Insect Node
//!
//! Runs a single Insect participant until Ctrl+C:
//! - a Queen that aggregates the fleet's route table
//! - a Slave that announces one route and resolves its dependencies
//!
//! # Usage
//!
//! ```bash
//! # Queen on the default port (7979)
//! insect-node --role queen
//!
//! # Slave announcing /orders, resolving /inventory
//! insect-node --role slave --route /orders --remote 10.0.0.1:7979 --depends /inventory
//!
//! # Everything from a file, CLI flags win
//! insect-node --config node.json --log-level debug
//! ```

use clap::Parser;
use insect::{MetricSample, PollResult, Queen, Slave};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::EnvFilter;

mod config;

pub use config::{ConfigError, NodeConfig, NodeRole};

/// Insect Node - UDP service discovery participant
#[derive(Parser, Debug)]
#[command(name = "insect-node")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Participant role
    #[arg(long, value_enum)]
    role: Option<NodeRole>,

    /// UDP bind address
    #[arg(short, long)]
    bind: Option<SocketAddr>,

    /// Upstream remote `host:port[,host:port...]` (repeatable)
    #[arg(short, long)]
    remote: Vec<String>,

    /// Route announced by a Slave
    #[arg(long)]
    route: Option<String>,

    /// Route to resolve at start-up (repeatable, Slave only)
    #[arg(long)]
    depends: Vec<String>,

    /// Heartbeat interval in milliseconds
    #[arg(long)]
    pulse_ms: Option<u64>,

    /// Host announced to peers (defaults to the bound IP)
    #[arg(long)]
    advertise_host: Option<String>,

    /// Configuration file (JSON format)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    /// File (or defaults) overridden by the flags that were given.
    fn into_config(self) -> Result<NodeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => {
                info!("Loading config from {:?}", path);
                NodeConfig::from_file(path)?
            }
            None => NodeConfig::default(),
        };

        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(bind) = self.bind {
            config.bind = Some(bind);
        }
        if !self.remote.is_empty() {
            config.remotes = self.remote;
        }
        if let Some(route) = self.route {
            config.route = Some(route);
        }
        if !self.depends.is_empty() {
            config.depends = self.depends;
        }
        if let Some(pulse_ms) = self.pulse_ms {
            config.pulse_ms = pulse_ms;
        }
        if let Some(host) = self.advertise_host {
            config.advertise_host = Some(host);
        }
        Ok(config)
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // RUST_LOG wins over --log-level.
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("insect={0},insect_node={0}", args.log_level)));
    init_logging(filter, std::io::stdout)?;

    let node = args.into_config()?;
    let config = node.to_insect_config()?;

    let running = Arc::new(AtomicBool::new(true));
    let r = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Shutdown signal received, stopping node...");
        r.store(false, Ordering::SeqCst);
    })?;

    info!("+----------------------------------------------------+");
    info!("|       Insect Node v{:31} |", env!("CARGO_PKG_VERSION"));
    info!("+----------------------------------------------------+");
    info!("|  Role:   {:41} |", format!("{:?}", node.role));
    info!("|  Bind:   {:41} |", config.bind);
    info!("|  Pulse:  {:41} |", format!("{}ms", node.pulse_ms));
    info!("+----------------------------------------------------+");

    match node.role {
        NodeRole::Queen => run_queen(Queen::start(config)?, &node, &running),
        NodeRole::Slave => {
            let route = node.route.clone().unwrap_or_default();
            run_slave(Slave::start(config, route)?, &node, &running)
        }
    }

    info!("Insect node stopped");
    Ok(())
}

/// Install the fmt subscriber. Also installs the `log` bridge, so the
/// library's `log` records go through the same filter and writer.
fn init_logging<W>(filter: EnvFilter, writer: W) -> Result<(), TryInitError>
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_names(true)
        .finish()
        .try_init()
}

/// Sleep in short steps until Ctrl+C, calling `status` every interval.
fn wait_for_shutdown(running: &AtomicBool, interval: Option<Duration>, mut status: impl FnMut()) {
    let mut last_status = Instant::now();
    while running.load(Ordering::SeqCst) {
        thread::sleep(Duration::from_millis(200));
        if let Some(interval) = interval {
            if last_status.elapsed() >= interval {
                status();
                last_status = Instant::now();
            }
        }
    }
}

fn run_queen(mut queen: Queen, node: &NodeConfig, running: &AtomicBool) {
    info!("Queen listening on {}", queen.local_addr());

    let feed = queen.metrics_feed();
    let mut last_metric = 0u64;
    wait_for_shutdown(running, node.status_interval(), || {
        let routes = queen.routes();
        let instances: usize = routes.iter().map(|route| queen.instances(route).len()).sum();
        let stats = queen.stats();
        info!(
            routes = routes.len(),
            instances,
            received = stats.received,
            sent = stats.sent,
            malformed = stats.malformed,
            "Queen status"
        );

        match feed.poll_since(last_metric) {
            PollResult::Batch(samples) => {
                for (offset, sample) in samples {
                    log_sample(&sample);
                    last_metric = offset;
                }
            }
            PollResult::Overflow { head } => {
                warn!("Metrics feed overran between status reports, skipping to {}", head);
                last_metric = head;
            }
            PollResult::Start(head) => last_metric = head,
        }
    });

    if !queen.stop() {
        warn!("Queen did not stop cleanly");
    }
}

fn log_sample(sample: &MetricSample) {
    info!(
        source = %sample.source,
        path = %sample.entry.path,
        value = sample.entry.value,
        "Metric"
    );
}

fn run_slave(mut slave: Slave, node: &NodeConfig, running: &AtomicBool) {
    let (host, port) = slave.advertised_address();
    info!("Slave {} announced as {}:{}", slave.route(), host, port);

    for dependency in &node.depends {
        match slave.find_service(dependency) {
            Some(instance) => info!("Resolved {} -> {}", dependency, instance),
            None => warn!("No instance of {} yet", dependency),
        }
    }

    wait_for_shutdown(running, node.status_interval(), || {
        let stats = slave.stats();
        let known = slave.membership().table().len();
        info!(
            known,
            received = stats.received,
            sent = stats.sent,
            send_errors = stats.send_errors,
            "Slave status"
        );
    });

    if !slave.stop() {
        warn!("Slave did not stop cleanly");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().expect("capture lock").extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    // Only test in this binary that installs the global subscriber.
    #[test]
    fn test_log_records_reach_subscriber() {
        let captured = Captured::default();
        init_logging(EnvFilter::new("insect_node=debug"), captured.clone()).expect("init");

        log::info!("[exchange] bridged record");
        log::trace!("below the filter");

        let output = String::from_utf8(captured.0.lock().expect("capture lock").clone())
            .expect("utf8");
        assert!(output.contains("bridged record"), "output: {}", output);
        assert!(!output.contains("below the filter"));
    }

    #[test]
    fn test_flags_override_file_defaults() {
        let args = Args::parse_from([
            "insect-node",
            "--role",
            "slave",
            "--route",
            "/orders",
            "--remote",
            "127.0.0.1:7979",
            "--pulse-ms",
            "250",
        ]);
        let config = args.into_config().expect("config");
        assert_eq!(config.role, NodeRole::Slave);
        assert_eq!(config.route.as_deref(), Some("/orders"));
        assert_eq!(config.pulse_ms, 250);
        assert!(config.to_insect_config().is_ok());
    }
}
