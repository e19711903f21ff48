// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Slave heartbeat loop.

use crate::exchange::ExchangeHandle;
use crate::membership::now_millis;
use crate::protocol::{Mapping, Payload};
use crate::worker::WorkerContext;
use dashmap::DashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Periodic announcer for one Slave.
pub struct Heartbeat {
    handle: ExchangeHandle,
    remotes: Vec<SocketAddr>,
    route: String,
    host: String,
    port: u16,
    /// Routes this Slave asked for; re-requested on every pulse when set.
    requested: Option<Arc<DashSet<String>>>,
}

impl Heartbeat {
    pub fn new(
        handle: ExchangeHandle,
        remotes: Vec<SocketAddr>,
        route: impl Into<String>,
        (host, port): (String, u16),
    ) -> Self {
        Self {
            handle,
            remotes,
            route: route.into(),
            host,
            port,
            requested: None,
        }
    }

    /// Re-send dependency requests for `requested` routes on every pulse.
    pub fn with_republished_dependencies(mut self, requested: Arc<DashSet<String>>) -> Self {
        self.requested = Some(requested);
        self
    }

    /// Send one announcement (and any republished requests) to every remote.
    /// Returns the number of datagrams queued.
    pub fn pulse(&self) -> usize {
        let timestamp = now_millis();
        let mut mappings = vec![Mapping::announcement(&self.route, &self.host, self.port, timestamp)];
        if let Some(requested) = &self.requested {
            mappings.extend(requested.iter().map(|dependency| {
                Mapping::dependency_request(&self.route, &self.host, self.port, timestamp, &dependency)
            }));
        }

        let mut queued = 0;
        for mapping in mappings {
            for remote in &self.remotes {
                match self.handle.send(Payload::Mapping(mapping.clone()), *remote) {
                    Ok(()) => queued += 1,
                    Err(e) => {
                        log::debug!("[slave] heartbeat to {} not queued: {}", remote, e);
                        return queued;
                    }
                }
            }
        }
        queued
    }

    /// Worker body: announce at start-up, then once per `interval` until interrupted.
    pub fn run(self, ctx: WorkerContext, interval: Duration) {
        ctx.mark_running();
        self.pulse();
        while ctx.park_interruptibly(interval) {
            thread::yield_now();
            if ctx.is_interrupted() {
                break;
            }
            self.pulse();
        }
        log::debug!("[slave] heartbeat for {} stopped", self.route);
    }
}
