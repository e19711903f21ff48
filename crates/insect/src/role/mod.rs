// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Participant roles.
//!
//! A [`Role`] supplies the behaviour that differs between the Queen (relay
//! and answer) and a Slave (announce, discover, forward metrics). The
//! membership core runs the shared part: provenance checks and table merge.

pub mod heartbeat;
pub mod metrics_sink;
pub mod queen;
pub mod slave;

pub use metrics_sink::{MetricSample, MetricsSink};
pub use queen::{Queen, QueenRole};
pub use slave::{Slave, SlaveRole};

use crate::exchange::QueueControl;
use crate::membership::{Membership, MergeOutcome};
use crate::protocol::{Mapping, Metrics};
use std::net::SocketAddr;
use std::time::Duration;

/// Role hooks invoked on the exchange thread.
///
/// Every hook runs after the membership core accepted the payload's sender.
pub trait Role: Send + 'static {
    /// Log prefix, e.g. `"queen"`.
    fn name(&self) -> &'static str;

    /// An accepted mapping was merged into the table.
    fn post_handle_mapping(
        &mut self,
        membership: &Membership,
        mapping: &Mapping,
        from: SocketAddr,
        outcome: MergeOutcome,
        queue: &mut QueueControl<'_>,
    );

    fn handle_invalidate(
        &mut self,
        _membership: &Membership,
        from: SocketAddr,
        _queue: &mut QueueControl<'_>,
    ) {
        log::debug!("[{}] ignoring invalidate from {}", self.name(), from);
    }

    fn handle_shutdown(
        &mut self,
        _membership: &Membership,
        from: SocketAddr,
        _queue: &mut QueueControl<'_>,
    ) {
        log::debug!("[{}] ignoring shutdown from {}", self.name(), from);
    }

    fn handle_metrics(
        &mut self,
        _membership: &Membership,
        from: SocketAddr,
        metrics: Metrics,
        _queue: &mut QueueControl<'_>,
    ) {
        log::debug!(
            "[{}] ignoring {} metric entries from {}",
            self.name(),
            metrics.entries.len(),
            from
        );
    }

    /// Periodic work after inbound dispatch. Returns the next deadline.
    fn on_tick(&mut self, membership: &Membership, queue: &mut QueueControl<'_>) -> Duration;

    /// The exchange is closing; queue any farewell datagrams.
    fn on_shutdown(&mut self, _membership: &Membership, _queue: &mut QueueControl<'_>) {}
}
