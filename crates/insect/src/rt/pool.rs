// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! LIFO free list of reusable buffers.
//!
//! Single-owner pool: the exchange thread borrows a buffer for one receive or
//! send cycle and recycles it afterwards. Ownership moves into the pool on
//! [`Pool::recycle`] and back out on [`Pool::borrow`]; nothing is shared, so
//! no synchronization is involved.
//!
//! # Performance
//!
//! - borrow/recycle: a `Vec` pop/push, no allocation once warmed up

/// Default hard cap on pooled buffers.
pub const DEFAULT_POOL_CAPACITY: usize = 512;

/// Item that can live in a [`Pool`].
pub trait Recyclable {
    /// Allocate a fresh item.
    fn allocate() -> Self;

    /// Clear logical state, keeping backing memory.
    fn reset(&mut self);
}

/// Pool counters (diagnostic).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Items created because the free list was empty.
    pub allocations: u64,
    /// Borrows served from the free list.
    pub reuses: u64,
    /// Recycled items dropped because the pool was full.
    pub discards: u64,
    /// Items currently idle in the free list.
    pub idle: usize,
}

/// LIFO pool bounded by a hard capacity.
pub struct Pool<T: Recyclable> {
    free: Vec<T>,
    capacity: usize,
    allocations: u64,
    reuses: u64,
    discards: u64,
}

impl<T: Recyclable> Pool<T> {
    /// Create an empty pool holding at most `capacity` idle items.
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Vec::with_capacity(capacity.min(64)),
            capacity,
            allocations: 0,
            reuses: 0,
            discards: 0,
        }
    }

    /// Take the most recently recycled item, or allocate one.
    pub fn borrow(&mut self) -> T {
        match self.free.pop() {
            Some(item) => {
                self.reuses += 1;
                item
            }
            None => {
                self.allocations += 1;
                T::allocate()
            }
        }
    }

    /// Return an item. Dropped if the pool already holds `capacity` items.
    pub fn recycle(&mut self, mut item: T) {
        if self.free.len() >= self.capacity {
            self.discards += 1;
            return;
        }
        item.reset();
        self.free.push(item);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn idle(&self) -> usize {
        self.free.len()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            allocations: self.allocations,
            reuses: self.reuses,
            discards: self.discards,
            idle: self.free.len(),
        }
    }
}

impl<T: Recyclable> Default for Pool<T> {
    fn default() -> Self {
        Self::new(DEFAULT_POOL_CAPACITY)
    }
}
