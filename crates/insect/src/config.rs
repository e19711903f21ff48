// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant configuration.

use crate::error::{Error, Result};
use crate::rt::DEFAULT_POOL_CAPACITY;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs};
use std::time::Duration;

/// Configuration shared by Queen and Slave participants.
///
/// The trust mode is not configured here: it follows from the role
/// (Slaves trust only `remotes`, the Queen checks self-consistency).
#[derive(Debug, Clone)]
pub struct InsectConfig {
    /// Local UDP bind address.
    pub bind: SocketAddr,

    /// Host announced to peers. Defaults to the bound IP.
    pub advertise_host: Option<String>,

    /// Upstream remotes (the Queen for a Slave).
    pub remotes: Vec<SocketAddr>,

    /// Heartbeat interval.
    pub pulse_interval: Duration,

    /// Hard cap on pooled message buffers.
    pub pool_capacity: usize,

    /// Timeout used by `find_service` without an explicit timeout.
    pub discovery_timeout: Duration,

    /// How often buffered metrics are packed and sent.
    pub metrics_flush_interval: Duration,

    /// Capacity of the metrics offset queue (rounded to a power of two).
    pub metrics_queue_capacity: usize,

    /// Bound on waiting for a worker to report it is running.
    pub startup_timeout: Duration,

    /// Bound on waiting for each worker to terminate.
    pub shutdown_timeout: Duration,

    /// Re-send dependency requests on every pulse so a restarted Queen relearns them.
    pub republish_dependencies: bool,

    /// Requested SO_RCVBUF / SO_SNDBUF size (0 = OS default).
    pub socket_buffer_size: usize,
}

impl Default for InsectConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            advertise_host: None,
            remotes: Vec::new(),
            pulse_interval: Duration::from_secs(1),
            pool_capacity: DEFAULT_POOL_CAPACITY,
            discovery_timeout: Duration::from_secs(5),
            metrics_flush_interval: Duration::from_secs(1),
            metrics_queue_capacity: 4096,
            startup_timeout: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(5),
            republish_dependencies: true,
            socket_buffer_size: 1024 * 1024,
        }
    }
}

impl InsectConfig {
    /// Create a new configuration bound to `bind`.
    pub fn new(bind: SocketAddr) -> Self {
        Self {
            bind,
            ..Default::default()
        }
    }

    /// Builder: set the advertised host.
    pub fn with_advertise_host(mut self, host: impl Into<String>) -> Self {
        self.advertise_host = Some(host.into());
        self
    }

    /// Builder: add one upstream remote.
    pub fn with_remote(mut self, remote: SocketAddr) -> Self {
        self.remotes.push(remote);
        self
    }

    /// Builder: replace the upstream remotes.
    pub fn with_remotes(mut self, remotes: Vec<SocketAddr>) -> Self {
        self.remotes = remotes;
        self
    }

    /// Builder: set heartbeat interval.
    pub fn with_pulse_interval(mut self, interval: Duration) -> Self {
        self.pulse_interval = interval;
        self
    }

    /// Builder: set pool capacity.
    pub fn with_pool_capacity(mut self, capacity: usize) -> Self {
        self.pool_capacity = capacity;
        self
    }

    /// Builder: set default discovery timeout.
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Builder: set metrics flush interval.
    pub fn with_metrics_flush_interval(mut self, interval: Duration) -> Self {
        self.metrics_flush_interval = interval;
        self
    }

    /// Builder: set metrics queue capacity.
    pub fn with_metrics_queue_capacity(mut self, capacity: usize) -> Self {
        self.metrics_queue_capacity = capacity;
        self
    }

    /// Builder: set worker startup/shutdown bounds.
    pub fn with_worker_timeouts(mut self, startup: Duration, shutdown: Duration) -> Self {
        self.startup_timeout = startup;
        self.shutdown_timeout = shutdown;
        self
    }

    /// Builder: stop re-sending dependency requests on each pulse.
    pub fn without_dependency_republish(mut self) -> Self {
        self.republish_dependencies = false;
        self
    }

    /// Host peers should use to reach this participant.
    ///
    /// `bound` is the socket's actual local address (ephemeral port resolved).
    /// An unspecified bind IP falls back to loopback.
    pub fn advertised_address(&self, bound: SocketAddr) -> (String, u16) {
        let host = match &self.advertise_host {
            Some(host) => host.clone(),
            None if bound.ip().is_unspecified() => {
                log::warn!(
                    "[config] bound to {} without advertise_host, announcing loopback",
                    bound
                );
                match bound.ip() {
                    IpAddr::V4(_) => Ipv4Addr::LOCALHOST.to_string(),
                    IpAddr::V6(_) => std::net::Ipv6Addr::LOCALHOST.to_string(),
                }
            }
            None => bound.ip().to_string(),
        };
        (host, bound.port())
    }

    /// Validate configuration.
    pub fn validate(&self) -> core::result::Result<(), &'static str> {
        if self.pulse_interval.is_zero() {
            return Err("pulse_interval must be > 0");
        }
        if self.pool_capacity == 0 {
            return Err("pool_capacity must be > 0");
        }
        if self.metrics_flush_interval.is_zero() {
            return Err("metrics_flush_interval must be > 0");
        }
        if self.metrics_queue_capacity == 0 {
            return Err("metrics_queue_capacity must be > 0");
        }
        if self.startup_timeout.is_zero() || self.shutdown_timeout.is_zero() {
            return Err("worker timeouts must be > 0");
        }
        if let Some(host) = &self.advertise_host {
            if host.is_empty() || host.len() > u8::MAX as usize {
                return Err("advertise_host must be 1-255 bytes");
            }
        }
        Ok(())
    }

    /// Validate for a Slave, which needs at least one remote to talk to.
    ///
    /// The Queen only accepts an announcement whose `(host, port)` equals the
    /// datagram's source, so the advertised host must be a literal IP.
    pub fn validate_for_slave(&self) -> core::result::Result<(), &'static str> {
        self.validate()?;
        if self.remotes.is_empty() {
            return Err("a slave needs at least one remote");
        }
        if let Some(host) = &self.advertise_host {
            if host.parse::<IpAddr>().is_err() {
                return Err("a slave's advertise_host must be a literal IP address");
            }
        }
        Ok(())
    }
}

/// Parse `host:port[,host:port...]` into socket addresses.
///
/// Host names are resolved; the first resolved address is kept. Empty
/// items (e.g. a trailing comma) are ignored.
pub fn parse_remotes(list: &str) -> Result<Vec<SocketAddr>> {
    let mut remotes = Vec::new();
    for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let addr = item
            .to_socket_addrs()
            .map_err(|e| Error::InvalidRemote(format!("{}: {}", item, e)))?
            .next()
            .ok_or_else(|| Error::InvalidRemote(format!("{}: no address", item)))?;
        remotes.push(addr);
    }
    Ok(remotes)
}
