// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Per-route wait handles for blocking discovery.
//!
//! One handle per unresolved route, shared by every caller waiting on it.
//! The exchange thread bumps the handle's generation after each accepted
//! mapping for the route; waiters sleep until the generation moves past the
//! value they sampled before re-checking the table, so a wake between the
//! check and the wait is never lost.

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Wait handle for one route.
#[derive(Debug, Default)]
pub struct PendingRequest {
    generation: Mutex<u64>,
    condvar: Condvar,
}

impl PendingRequest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current generation; sample before re-checking the table.
    pub fn generation(&self) -> u64 {
        *self.generation.lock()
    }

    /// Wake every waiter.
    pub fn notify_all(&self) {
        let mut generation = self.generation.lock();
        *generation = generation.wrapping_add(1);
        self.condvar.notify_all();
    }

    /// Block until the generation differs from `seen` or `timeout` elapses.
    ///
    /// Returns `true` if woken by a notification. A timeout too large for an
    /// `Instant` waits without a deadline.
    pub fn wait_for_change(&self, seen: u64, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut generation = self.generation.lock();
        while *generation == seen {
            match deadline {
                Some(deadline) => {
                    if self
                        .condvar
                        .wait_until(&mut generation, deadline)
                        .timed_out()
                    {
                        return *generation != seen;
                    }
                }
                None => self.condvar.wait(&mut generation),
            }
        }
        true
    }
}

/// Concurrent map of route -> wait handle.
#[derive(Debug, Default)]
pub struct PendingRequests {
    handles: DashMap<String, Arc<PendingRequest>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing handle for `route`, or a newly installed one.
    pub fn obtain(&self, route: &str) -> Arc<PendingRequest> {
        if let Some(existing) = self.handles.get(route) {
            return Arc::clone(existing.value());
        }
        Arc::clone(
            self.handles
                .entry(route.to_string())
                .or_insert_with(|| Arc::new(PendingRequest::new()))
                .value(),
        )
    }

    /// Wake all waiters on `route`, if any.
    pub fn notify(&self, route: &str) -> bool {
        match self.handles.get(route) {
            Some(handle) => {
                handle.notify_all();
                true
            }
            None => false,
        }
    }

    /// Wake every waiter on every route (e.g. after a table reset).
    pub fn notify_every(&self) {
        for entry in self.handles.iter() {
            entry.value().notify_all();
        }
    }

    /// Remove `route`'s handle if it is still `mine` and nobody else holds it.
    ///
    /// Clones are only taken under the shard lock, so the count seen here
    /// can only shrink concurrently. Two waiters releasing at once may both
    /// see the other's clone and leave the handle in place; the next
    /// `obtain` reuses it and its release removes it.
    pub fn release(&self, route: &str, mine: &Arc<PendingRequest>) -> bool {
        self.handles
            .remove_if(route, |_, current| {
                Arc::ptr_eq(current, mine) && Arc::strong_count(current) <= 2
            })
            .is_some()
    }

    pub fn contains(&self, route: &str) -> bool {
        self.handles.contains_key(route)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}
