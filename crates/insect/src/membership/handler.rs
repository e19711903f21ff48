// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! `Insect<R>`: the exchange handler shared by every role.
//!
//! Inbound payloads go through a provenance check first:
//!
//! - Slaves only accept datagrams from their configured remotes.
//! - The Queen accepts anyone, but a mapping must announce the address it
//!   was sent from, and control/metrics packets must come from an address
//!   already in the table.
//!
//! Accepted mappings are merged, waiters on the route are woken, and the
//! role's hook runs.

use super::{InstanceState, Membership};
use crate::exchange::{MessageHandler, QueueControl};
use crate::protocol::{Mapping, Payload};
use crate::role::Role;
use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// How inbound senders are authenticated.
#[derive(Debug, Clone)]
pub enum TrustPolicy {
    /// Only these UDP peers are accepted (Slaves).
    TrustedRemotes(HashSet<SocketAddr>),
    /// Mappings must name their own sender; control packets need a known sender (Queen).
    SelfAuthenticated,
}

impl TrustPolicy {
    pub fn trusted_remotes(remotes: &[SocketAddr]) -> Self {
        TrustPolicy::TrustedRemotes(remotes.iter().copied().collect())
    }

    fn accepts_mapping(&self, mapping: &Mapping, from: SocketAddr) -> bool {
        match self {
            TrustPolicy::TrustedRemotes(remotes) => remotes.contains(&from),
            TrustPolicy::SelfAuthenticated => {
                InstanceState::from_mapping(mapping).key().matches(from)
            }
        }
    }

    fn accepts_control(&self, membership: &Membership, from: SocketAddr) -> bool {
        match self {
            TrustPolicy::TrustedRemotes(remotes) => remotes.contains(&from),
            TrustPolicy::SelfAuthenticated => membership.table().knows_address(from),
        }
    }
}

/// Membership core bound to a role.
pub struct Insect<R: Role> {
    membership: Arc<Membership>,
    role: R,
    trust: TrustPolicy,
}

impl<R: Role> Insect<R> {
    pub fn new(membership: Arc<Membership>, role: R, trust: TrustPolicy) -> Self {
        Self {
            membership,
            role,
            trust,
        }
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn role(&self) -> &R {
        &self.role
    }

    fn dispatch(&mut self, from: SocketAddr, payload: Payload, queue: &mut QueueControl<'_>) {
        match payload {
            Payload::Mapping(mapping) => self.handle_mapping(from, mapping, queue),
            other => {
                if !self.trust.accepts_control(&self.membership, from) {
                    log::warn!(
                        "[{}] dropping {} from untrusted sender {}",
                        self.role.name(),
                        other.kind(),
                        from
                    );
                    return;
                }
                match other {
                    Payload::Invalidate(_) => {
                        self.role.handle_invalidate(&self.membership, from, queue)
                    }
                    Payload::Shutdown(_) => self.role.handle_shutdown(&self.membership, from, queue),
                    Payload::Metrics(metrics) => {
                        self.role
                            .handle_metrics(&self.membership, from, metrics, queue)
                    }
                    Payload::Mapping(_) => {}
                }
            }
        }
    }

    fn handle_mapping(&mut self, from: SocketAddr, mapping: Mapping, queue: &mut QueueControl<'_>) {
        if !self.trust.accepts_mapping(&mapping, from) {
            log::warn!(
                "[{}] dropping mapping for {} claiming {}:{} from {}: possible spoofing attempt",
                self.role.name(),
                mapping.route,
                mapping.host,
                mapping.port,
                from
            );
            return;
        }

        let outcome = self
            .membership
            .table()
            .merge(InstanceState::from_mapping(&mapping));
        self.membership.pending().notify(&mapping.route);

        log::trace!(
            "[{}] {:?} {} at {}:{} (dependency {:?})",
            self.role.name(),
            outcome,
            mapping.route,
            mapping.host,
            mapping.port,
            mapping.dependency
        );

        self.role
            .post_handle_mapping(&self.membership, &mapping, from, outcome, queue);
    }
}

impl<R: Role> MessageHandler for Insect<R> {
    fn process_messages(&mut self, queue: &mut QueueControl<'_>) -> Duration {
        while let Some((from, payload)) = queue.poll_inbound() {
            self.dispatch(from, payload, queue);
        }
        self.role.on_tick(&self.membership, queue)
    }

    fn on_shutdown(&mut self, queue: &mut QueueControl<'_>) {
        self.role.on_shutdown(&self.membership, queue);
    }
}
