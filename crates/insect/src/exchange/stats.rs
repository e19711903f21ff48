// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Exchange counters.
//!
//! ```
//! use insect::exchange::ExchangeStats;
//!
//! let stats = ExchangeStats::new();
//! stats.record_received();
//! stats.record_malformed();
//!
//! let snapshot = stats.snapshot();
//! assert_eq!(snapshot.received, 1);
//! assert_eq!(snapshot.malformed, 1);
//! ```

use crate::rt::PoolStats;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared between the exchange thread and observers.
#[derive(Debug, Default)]
pub struct ExchangeStats {
    received: AtomicU64,
    sent: AtomicU64,
    malformed: AtomicU64,
    receive_errors: AtomicU64,
    send_errors: AtomicU64,
    submissions_dropped: AtomicU64,

    // Mirrored from the single-owner pool once per loop iteration
    pool_allocations: AtomicU64,
    pool_reuses: AtomicU64,
    pool_discards: AtomicU64,
}

impl ExchangeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_send_error(&self) {
        self.send_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_submission_dropped(&self) {
        self.submissions_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn mirror_pool(&self, pool: PoolStats) {
        self.pool_allocations.store(pool.allocations, Ordering::Relaxed);
        self.pool_reuses.store(pool.reuses, Ordering::Relaxed);
        self.pool_discards.store(pool.discards, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ExchangeStatsSnapshot {
        ExchangeStatsSnapshot {
            received: self.received.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            send_errors: self.send_errors.load(Ordering::Relaxed),
            submissions_dropped: self.submissions_dropped.load(Ordering::Relaxed),
            pool_allocations: self.pool_allocations.load(Ordering::Relaxed),
            pool_reuses: self.pool_reuses.load(Ordering::Relaxed),
            pool_discards: self.pool_discards.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`ExchangeStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExchangeStatsSnapshot {
    /// Datagrams decoded and queued for the handler.
    pub received: u64,
    /// Datagrams handed to the socket.
    pub sent: u64,
    /// Datagrams dropped by the codec.
    pub malformed: u64,
    pub receive_errors: u64,
    pub send_errors: u64,
    /// Payloads that could not be encoded or queued.
    pub submissions_dropped: u64,
    pub pool_allocations: u64,
    pub pool_reuses: u64,
    pub pool_discards: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_mirror() {
        let stats = ExchangeStats::new();
        stats.mirror_pool(PoolStats {
            allocations: 3,
            reuses: 10,
            discards: 1,
            idle: 2,
        });
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.pool_allocations, 3);
        assert_eq!(snapshot.pool_reuses, 10);
        assert_eq!(snapshot.pool_discards, 1);
    }

    #[test]
    fn test_error_counters() {
        let stats = ExchangeStats::new();
        stats.record_send_error();
        stats.record_send_error();
        stats.record_receive_error();
        stats.record_submission_dropped();
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.send_errors, 2);
        assert_eq!(snapshot.receive_errors, 1);
        assert_eq!(snapshot.submissions_dropped, 1);
        assert_eq!(snapshot.sent, 0);
    }
}
