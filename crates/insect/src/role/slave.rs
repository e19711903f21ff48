// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slave: announces itself, resolves dependencies, forwards metrics.
//!
//! # Discovery
//!
//! `find_service*` blocks the caller until the route shows up in the local
//! table or the timeout elapses:
//!
//! 1. check the table
//! 2. obtain the route's wait handle and sample its generation
//! 3. send a dependency request to every remote
//! 4. re-check the table (a reply may have raced step 3)
//! 5. wait on the handle for the remaining time, then go back to 4
//!
//! The handle is released only if it is still the one this caller obtained.

use super::heartbeat::Heartbeat;
use super::metrics_sink::MetricsSink;
use super::Role;
use crate::config::InsectConfig;
use crate::error::{Error, Result};
use crate::exchange::{ExchangeHandle, ExchangeStatsSnapshot, MessageExchange, QueueControl};
use crate::membership::{now_millis, Insect, InstanceKey, Membership, MergeOutcome, TrustPolicy};
use crate::protocol::{Mapping, MetricEntry, Payload, Shutdown};
use crate::rt::OffsetQueue;
use crate::worker::Worker;
use dashmap::DashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

// ============================================================================
// Role
// ============================================================================

/// Longest metrics flush interval; larger values are clamped.
const MAX_FLUSH_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Slave role hooks (exchange thread).
pub struct SlaveRole {
    remotes: Vec<SocketAddr>,
    sink: MetricsSink,
    flush_interval: Duration,
    next_flush: Instant,
}

impl SlaveRole {
    pub fn new(
        remotes: Vec<SocketAddr>,
        metrics: Arc<OffsetQueue<MetricEntry>>,
        flush_interval: Duration,
    ) -> Self {
        let flush_interval = flush_interval.min(MAX_FLUSH_INTERVAL);
        Self {
            remotes,
            sink: MetricsSink::new(metrics),
            flush_interval,
            next_flush: Instant::now() + flush_interval,
        }
    }

    /// Samples lost to metrics queue overflow.
    pub fn metrics_lost(&self) -> u64 {
        self.sink.lost()
    }
}

impl Role for SlaveRole {
    fn name(&self) -> &'static str {
        "slave"
    }

    fn post_handle_mapping(
        &mut self,
        _membership: &Membership,
        mapping: &Mapping,
        from: SocketAddr,
        outcome: MergeOutcome,
        _queue: &mut QueueControl<'_>,
    ) {
        if outcome == MergeOutcome::New {
            log::debug!(
                "[slave] learned {} at {}:{} from {}",
                mapping.route,
                mapping.host,
                mapping.port,
                from
            );
        }
    }

    fn handle_invalidate(
        &mut self,
        membership: &Membership,
        from: SocketAddr,
        _queue: &mut QueueControl<'_>,
    ) {
        log::info!("[slave] {} invalidated the route table", from);
        membership.reset();
    }

    fn handle_shutdown(
        &mut self,
        membership: &Membership,
        from: SocketAddr,
        _queue: &mut QueueControl<'_>,
    ) {
        log::info!("[slave] {} is shutting down, dropping the route table", from);
        membership.reset();
    }

    fn on_tick(&mut self, _membership: &Membership, queue: &mut QueueControl<'_>) -> Duration {
        let now = Instant::now();
        if now >= self.next_flush {
            self.sink.flush(&self.remotes, queue);
            self.next_flush = now + self.flush_interval;
        }
        self.next_flush.saturating_duration_since(now)
    }

    fn on_shutdown(&mut self, _membership: &Membership, queue: &mut QueueControl<'_>) {
        self.sink.flush(&self.remotes, queue);
        for remote in &self.remotes {
            queue.send(&Payload::Shutdown(Shutdown), *remote);
        }
        log::info!("[slave] sent shutdown to {} remotes", self.remotes.len());
    }
}

// ============================================================================
// Slave facade
// ============================================================================

/// Running Slave participant.
pub struct Slave {
    route: String,
    advertised: (String, u16),
    remotes: Vec<SocketAddr>,
    membership: Arc<Membership>,
    handle: ExchangeHandle,
    metrics: Arc<OffsetQueue<MetricEntry>>,
    requested: Arc<DashSet<String>>,
    discovery_timeout: Duration,
    shutdown_timeout: Duration,
    heartbeat: Worker,
    exchange: Worker,
    stopped: bool,
}

impl Slave {
    /// Bind, start the exchange, then start announcing `route`.
    pub fn start(config: InsectConfig, route: impl Into<String>) -> Result<Self> {
        config.validate_for_slave().map_err(Error::Config)?;
        let route = route.into();
        if route.is_empty() || route.len() > u8::MAX as usize {
            return Err(Error::Config("route must be 1-255 bytes"));
        }

        let membership = Arc::new(Membership::new());
        let metrics = Arc::new(OffsetQueue::with_capacity(config.metrics_queue_capacity));
        let requested = Arc::new(DashSet::new());
        let (mut exchange, handle) = MessageExchange::bind(&config)?;
        let advertised = config.advertised_address(handle.local_addr());

        let mut insect = Insect::new(
            Arc::clone(&membership),
            SlaveRole::new(
                config.remotes.clone(),
                Arc::clone(&metrics),
                config.metrics_flush_interval,
            ),
            TrustPolicy::trusted_remotes(&config.remotes),
        );
        let exchange_worker = Worker::spawn("insect-slave", config.startup_timeout, move |ctx| {
            exchange.run(&mut insect, || ctx.mark_running());
        })?;
        let shutdown_handle = handle.clone();
        let mut exchange_worker = exchange_worker.with_interrupt_hook(move || {
            shutdown_handle.shutdown();
        });

        let mut heartbeat = Heartbeat::new(
            handle.clone(),
            config.remotes.clone(),
            route.clone(),
            advertised.clone(),
        );
        if config.republish_dependencies {
            heartbeat = heartbeat.with_republished_dependencies(Arc::clone(&requested));
        }
        let interval = config.pulse_interval;
        let heartbeat_worker = match Worker::spawn("insect-heartbeat", config.startup_timeout, move |ctx| {
            heartbeat.run(ctx, interval)
        }) {
            Ok(worker) => worker,
            Err(e) => {
                exchange_worker.stop(config.shutdown_timeout);
                return Err(e);
            }
        };

        log::info!(
            "[slave] {} listening on {}, announced as {}:{}",
            route,
            handle.local_addr(),
            advertised.0,
            advertised.1
        );
        Ok(Self {
            route,
            advertised,
            remotes: config.remotes,
            membership,
            handle,
            metrics,
            requested,
            discovery_timeout: config.discovery_timeout,
            shutdown_timeout: config.shutdown_timeout,
            heartbeat: heartbeat_worker,
            exchange: exchange_worker,
            stopped: false,
        })
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// `(host, port)` this Slave announces.
    pub fn advertised_address(&self) -> (String, u16) {
        self.advertised.clone()
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    /// Youngest instance of `route`, waiting up to the configured discovery timeout.
    pub fn find_service(&self, route: &str) -> Option<InstanceKey> {
        self.find_service_timeout(route, self.discovery_timeout)
    }

    /// Youngest instance of `route` (active instances first).
    pub fn find_service_timeout(&self, route: &str, timeout: Duration) -> Option<InstanceKey> {
        self.resolve(route, timeout, |membership| {
            membership.table().youngest(route).map(|state| state.key())
        })
    }

    /// Every instance of `route`, youngest first. Active instances only, unless
    /// all known instances are out of service.
    pub fn find_services(&self, route: &str, timeout: Duration) -> Option<Vec<InstanceKey>> {
        self.resolve(route, timeout, |membership| {
            let mut found = membership.table().active_instances(route);
            if found.is_empty() {
                found = membership.table().instances(route);
            }
            if found.is_empty() {
                return None;
            }
            found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            Some(found.iter().map(|state| state.key()).collect())
        })
    }

    fn resolve<T>(
        &self,
        route: &str,
        timeout: Duration,
        lookup: impl Fn(&Membership) -> Option<T>,
    ) -> Option<T> {
        if let Some(found) = lookup(&self.membership) {
            return Some(found);
        }

        // No deadline when the timeout does not fit in an Instant (e.g. Duration::MAX).
        let deadline = Instant::now().checked_add(timeout);
        let pending = self.membership.pending().obtain(route);
        let mut seen = pending.generation();
        self.request(route);

        let found = loop {
            if let Some(found) = lookup(&self.membership) {
                break Some(found);
            }
            let remaining = match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        log::debug!("[slave] no instance of {} within {:?}", route, timeout);
                        break None;
                    }
                    deadline - now
                }
                None => Duration::MAX,
            };
            if pending.wait_for_change(seen, remaining) {
                seen = pending.generation();
                // Woken by a reset: the Queen may have forgotten us, ask again.
                if self.membership.table().instances(route).is_empty() {
                    self.request(route);
                }
            }
        };

        let last_waiter = self.membership.pending().release(route, &pending);
        if found.is_none() && last_waiter {
            // Unresolved routes are not republished on every pulse.
            self.requested.remove(route);
        }
        found
    }

    /// Send a dependency request for `dependency` to every remote.
    fn request(&self, dependency: &str) {
        self.requested.insert(dependency.to_string());
        let (host, port) = &self.advertised;
        let mapping =
            Mapping::dependency_request(&self.route, host, *port, now_millis(), dependency);
        for remote in &self.remotes {
            if let Err(e) = self.handle.send(Payload::Mapping(mapping.clone()), *remote) {
                log::debug!("[slave] dependency request for {} not sent: {}", dependency, e);
                return;
            }
        }
    }

    /// Queue a metric sample for the next flush.
    pub fn forward(&self, path: impl Into<String>, value: f64) {
        self.metrics.push(MetricEntry::new(path, now_millis(), value));
    }

    pub fn stats(&self) -> ExchangeStatsSnapshot {
        self.handle.stats().snapshot()
    }

    /// Stop the heartbeat, then the exchange, each bounded by the shutdown
    /// timeout. Returns `true` if both terminated.
    pub fn stop(&mut self) -> bool {
        if self.stopped {
            return true;
        }
        self.stopped = true;
        let heartbeat = self.heartbeat.stop(self.shutdown_timeout);
        let exchange = self.exchange.stop(self.shutdown_timeout);
        log::info!("[slave] {} stopped", self.route);
        heartbeat && exchange
    }
}

impl Drop for Slave {
    fn drop(&mut self) {
        self.stop();
    }
}
