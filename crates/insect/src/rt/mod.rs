// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Runtime primitives: buffer pool and offset queue.

pub mod offset_queue;
pub mod pool;

pub use offset_queue::{OffsetQueue, PollResult, RESTART};
pub use pool::{Pool, PoolStats, Recyclable, DEFAULT_POOL_CAPACITY};
