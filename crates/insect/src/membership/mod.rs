// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Membership core: route table, pending discovery handles and the
//! provenance checks applied to every inbound payload.

pub mod handler;
pub mod instance;
pub mod pending;
pub mod table;

pub use handler::{Insect, TrustPolicy};
pub use instance::{now_millis, InstanceKey, InstanceState};
pub use pending::{PendingRequest, PendingRequests};
pub use table::{MergeOutcome, RouteTable};

/// State shared between the exchange thread and caller threads.
#[derive(Debug, Default)]
pub struct Membership {
    table: RouteTable,
    pending: PendingRequests,
}

impl Membership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    pub fn pending(&self) -> &PendingRequests {
        &self.pending
    }

    /// Table-wide reset. Waiters are woken so they re-check and re-request.
    pub fn reset(&self) {
        self.table.clear();
        self.pending.notify_every();
    }
}
