// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Route table: `route -> { (host, port) -> InstanceState }`.
//!
//! Written by the exchange thread, read by any caller thread.

use super::instance::{InstanceKey, InstanceState};
use dashmap::DashMap;
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;

/// Whether a merge inserted a previously unseen instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    New,
    Updated,
}

#[derive(Debug, Default)]
pub struct RouteTable {
    routes: DashMap<String, HashMap<InstanceKey, InstanceState>>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the entry for `state`'s key.
    ///
    /// Dependencies of the replaced entry are unioned into the new one, and an
    /// administrative hold is carried over.
    pub fn merge(&self, mut state: InstanceState) -> MergeOutcome {
        let key = state.key();
        let mut instances = self.routes.entry(state.route.clone()).or_default();
        let outcome = match instances.get(&key) {
            Some(previous) => {
                state
                    .dependencies
                    .extend(previous.dependencies.iter().cloned());
                if previous.held {
                    state.held = true;
                    state.out_of_service = true;
                }
                if state.internal_path.is_empty() {
                    state.internal_path = previous.internal_path.clone();
                }
                MergeOutcome::Updated
            }
            None => MergeOutcome::New,
        };
        instances.insert(key, state);
        outcome
    }

    /// Single entry lookup.
    pub fn get(&self, route: &str, key: &InstanceKey) -> Option<InstanceState> {
        self.routes
            .get(route)
            .and_then(|instances| instances.get(key).cloned())
    }

    /// All instances of `route`, out-of-service ones included.
    pub fn instances(&self, route: &str) -> Vec<InstanceState> {
        let mut found: Vec<InstanceState> = self
            .routes
            .get(route)
            .map(|instances| instances.values().cloned().collect())
            .unwrap_or_default();
        found.sort_by(|a, b| a.key().cmp(&b.key()));
        found
    }

    /// Instances of `route` not marked out of service.
    pub fn active_instances(&self, route: &str) -> Vec<InstanceState> {
        let mut active = self.instances(route);
        active.retain(|state| !state.out_of_service);
        active
    }

    /// Entry with the greatest timestamp, preferring active instances.
    pub fn youngest(&self, route: &str) -> Option<InstanceState> {
        let instances = self.instances(route);
        let active = instances.iter().filter(|s| !s.out_of_service);
        active
            .max_by_key(|s| s.timestamp)
            .or_else(|| instances.iter().max_by_key(|s| s.timestamp))
            .cloned()
    }

    /// Every known instance that declared a dependency on `route`, once per key.
    pub fn dependents_of(&self, route: &str) -> Vec<InstanceState> {
        let mut dependents: BTreeMap<InstanceKey, InstanceState> = BTreeMap::new();
        for entry in self.routes.iter() {
            for (key, state) in entry.value() {
                if state.dependencies.contains(route) {
                    dependents.entry(key.clone()).or_insert_with(|| state.clone());
                }
            }
        }
        dependents.into_values().collect()
    }

    /// Administrative flag flip. Returns `false` if the entry does not exist.
    ///
    /// Setting the flag holds it across later announcements until it is
    /// cleared here again.
    pub fn set_out_of_service(&self, route: &str, key: &InstanceKey, out_of_service: bool) -> bool {
        let Some(mut instances) = self.routes.get_mut(route) else {
            return false;
        };
        match instances.get_mut(key) {
            Some(state) => {
                state.out_of_service = out_of_service;
                state.held = out_of_service;
                true
            }
            None => false,
        }
    }

    /// Mark every entry announced from `addr` out of service (graceful leave).
    ///
    /// Not a hold: the next announcement from that instance restores it.
    pub fn mark_address_out_of_service(&self, addr: SocketAddr) -> usize {
        let mut marked = 0;
        for mut entry in self.routes.iter_mut() {
            for (key, state) in entry.value_mut().iter_mut() {
                if key.matches(addr) && !state.out_of_service {
                    state.out_of_service = true;
                    marked += 1;
                }
            }
        }
        marked
    }

    /// Whether any entry was announced from `addr`.
    pub fn knows_address(&self, addr: SocketAddr) -> bool {
        self.routes
            .iter()
            .any(|entry| entry.value().keys().any(|key| key.matches(addr)))
    }

    /// Distinct reachable addresses of every known instance.
    pub fn addresses(&self) -> Vec<SocketAddr> {
        let mut addresses: Vec<SocketAddr> = self
            .routes
            .iter()
            .flat_map(|entry| {
                entry
                    .value()
                    .keys()
                    .filter_map(InstanceKey::socket_addr)
                    .collect::<Vec<_>>()
            })
            .collect();
        addresses.sort();
        addresses.dedup();
        addresses
    }

    /// Drop every entry.
    pub fn clear(&self) {
        self.routes.clear();
    }

    /// Consistent-per-route copy of the table.
    pub fn snapshot(&self) -> BTreeMap<String, Vec<InstanceState>> {
        self.routes()
            .into_iter()
            .map(|route| {
                let instances = self.instances(&route);
                (route, instances)
            })
            .filter(|(_, instances)| !instances.is_empty())
            .collect()
    }

    /// Known routes, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self
            .routes
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        routes.sort();
        routes
    }

    /// Total number of entries across routes.
    pub fn len(&self) -> usize {
        self.routes.iter().map(|entry| entry.value().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
