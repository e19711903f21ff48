// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! # Insect - UDP service discovery and heartbeat
//!
//! A small gossip protocol with two roles:
//!
//! - the **Queen** keeps the fleet-wide route table, relays announcements to
//!   the instances that depend on them and answers dependency requests;
//! - a **Slave** announces its own route on every heartbeat, resolves the
//!   routes it depends on and forwards application metrics.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use insect::{InsectConfig, Queen, Result, Slave};
//! use std::time::Duration;
//!
//! fn main() -> Result<()> {
//!     let queen = Queen::start(InsectConfig::new("127.0.0.1:7979".parse().unwrap()))?;
//!
//!     let config = InsectConfig::new("127.0.0.1:0".parse().unwrap())
//!         .with_remote(queen.local_addr());
//!     let web = Slave::start(config, "/web")?;
//!
//!     if let Some(db) = web.find_service_timeout("/db", Duration::from_secs(2)) {
//!         println!("/db is at {}", db);
//!     }
//!     web.forward("web.requests", 1.0);
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! +---------------------------------------------------------------------+
//! |   Queen / Slave facades        (role)                               |
//! |   discovery API | forward() | admin calls                           |
//! +---------------------------------------------------------------------+
//! |   Membership core              (membership)                         |
//! |   trust check | route table merge | per-route wait handles          |
//! +---------------------------------------------------------------------+
//! |   Message exchange             (exchange)                           |
//! |   mio event loop | buffer pool | inbound/outbound queues            |
//! +---------------------------------------------------------------------+
//! |   Wire codec                   (protocol)                           |
//! |   Mapping | Metrics | Invalidate | Shutdown                         |
//! +---------------------------------------------------------------------+
//! ```

/// Participant configuration.
pub mod config;
/// Library error type.
pub mod error;
/// Single-threaded UDP event loop.
pub mod exchange;
/// Route table, wait handles and the shared message handler.
pub mod membership;
/// Wire format of the four payload kinds.
pub mod protocol;
/// Queen and Slave roles.
pub mod role;
/// Runtime primitives (buffer pool, offset queue).
pub mod rt;
/// Background worker threads.
pub mod worker;

pub use config::InsectConfig;
pub use error::{Error, Result};
pub use exchange::{ExchangeStats, ExchangeStatsSnapshot};
pub use membership::{InstanceKey, InstanceState};
pub use protocol::{CodecError, MetricEntry, Payload};
pub use role::{MetricSample, Queen, Slave};
pub use rt::{OffsetQueue, PollResult};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
