// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Fixed-capacity ring of `(offset, element)` pairs for "poll since" readers.
//!
//! Every insert gets the next 64-bit offset (the first one is 1). Writers
//! serialize on a short mutex around the O(1) slot store; readers never
//! block. A reader remembers the last offset it saw and asks for everything
//! newer; if the ring has lapped it in the meantime it gets
//! [`PollResult::Overflow`] instead of stale or torn data.
//!
//! # Performance
//!
//! - push: one mutex acquire + one `ArcSwap` store
//! - poll_since: lock-free, one `ArcSwap` load per returned element

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Offset a reader passes to (re)start polling from the current head.
pub const RESTART: u64 = u64::MAX;

/// Result of [`OffsetQueue::poll_since`].
#[derive(Debug)]
pub enum PollResult<T> {
    /// Reply to [`RESTART`]: the current head offset, no elements.
    Start(u64),
    /// Elements between the caller's offset and the oldest resident one were
    /// overwritten. Resume from `head`.
    Overflow { head: u64 },
    /// Elements newer than the caller's offset, in increasing offset order.
    Batch(Vec<(u64, Arc<T>)>),
}

struct Entry<T> {
    offset: u64,
    value: Arc<T>,
}

/// Multi-writer, lock-free-reader offset ring.
pub struct OffsetQueue<T> {
    slots: Box<[ArcSwapOption<Entry<T>>]>,
    mask: u64,
    /// Offset of the newest element (0 when empty).
    head: AtomicU64,
    write_lock: Mutex<()>,
}

impl<T> OffsetQueue<T> {
    /// Create a queue; `capacity` is rounded up to a power of two (minimum 2).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let slots = (0..capacity)
            .map(|_| ArcSwapOption::empty())
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity as u64 - 1,
            head: AtomicU64::new(0),
            write_lock: Mutex::new(()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Offset of the newest element, 0 if nothing was ever pushed.
    pub fn head(&self) -> u64 {
        self.head.load(Ordering::Acquire)
    }

    /// Number of elements still resident.
    pub fn len(&self) -> usize {
        self.head().min(self.slots.len() as u64) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.head() == 0
    }

    /// Insert `value`, returning its offset.
    pub fn push(&self, value: T) -> u64 {
        let value = Arc::new(value);
        let _guard = self.write_lock.lock();
        let offset = self.head.load(Ordering::Relaxed) + 1;
        self.slot(offset).store(Some(Arc::new(Entry { offset, value })));
        self.head.store(offset, Ordering::Release);
        offset
    }

    /// Everything strictly newer than `last`, without blocking.
    pub fn poll_since(&self, last: u64) -> PollResult<T> {
        let head = self.head();
        if last == RESTART {
            return PollResult::Start(head);
        }
        // A reader ahead of the writer lost track; make it resync.
        if last > head {
            return PollResult::Overflow { head };
        }
        if last == head {
            return PollResult::Batch(Vec::new());
        }

        let oldest = head.saturating_sub(self.mask + 1) + 1;
        if last + 1 < oldest {
            return PollResult::Overflow { head };
        }

        let mut batch = Vec::with_capacity((head - last) as usize);
        for offset in last + 1..=head {
            match self.slot(offset).load_full() {
                Some(entry) if entry.offset == offset => {
                    batch.push((offset, Arc::clone(&entry.value)));
                }
                // Lapped by a writer while scanning.
                _ => {
                    return PollResult::Overflow {
                        head: self.head(),
                    }
                }
            }
        }
        PollResult::Batch(batch)
    }

    fn slot(&self, offset: u64) -> &ArcSwapOption<Entry<T>> {
        &self.slots[(offset & self.mask) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch_offsets<T>(result: PollResult<T>) -> Vec<u64> {
        match result {
            PollResult::Batch(items) => items.into_iter().map(|(offset, _)| offset).collect(),
            PollResult::Start(head) => panic!("unexpected start({})", head),
            PollResult::Overflow { head } => panic!("unexpected overflow at {}", head),
        }
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        assert_eq!(OffsetQueue::<u32>::with_capacity(0).capacity(), 2);
        assert_eq!(OffsetQueue::<u32>::with_capacity(5).capacity(), 8);
        assert_eq!(OffsetQueue::<u32>::with_capacity(64).capacity(), 64);
    }

    #[test]
    fn test_offsets_start_at_one() {
        let queue = OffsetQueue::with_capacity(4);
        assert!(queue.is_empty());
        assert_eq!(queue.push("a"), 1);
        assert_eq!(queue.push("b"), 2);
        assert_eq!(queue.head(), 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_restart_returns_head() {
        let queue = OffsetQueue::with_capacity(4);
        assert!(matches!(queue.poll_since(RESTART), PollResult::Start(0)));
        queue.push(10u32);
        assert!(matches!(queue.poll_since(RESTART), PollResult::Start(1)));
    }

    #[test]
    fn test_poll_returns_newer_elements_in_order() {
        let queue = OffsetQueue::with_capacity(8);
        for i in 0..5u32 {
            queue.push(i);
        }
        match queue.poll_since(2) {
            PollResult::Batch(items) => {
                let values: Vec<(u64, u32)> = items.iter().map(|(o, v)| (*o, **v)).collect();
                assert_eq!(values, vec![(3, 2), (4, 3), (5, 4)]);
            }
            _ => panic!("expected batch"),
        }
        assert!(batch_offsets(queue.poll_since(5)).is_empty());
    }

    #[test]
    fn test_lagging_reader_gets_overflow() {
        let queue = OffsetQueue::with_capacity(4);
        queue.push(0u32);
        let last = queue.head();
        // More than capacity inserts between two polls
        for i in 1..=5u32 {
            queue.push(i);
        }
        match queue.poll_since(last) {
            PollResult::Overflow { head } => assert_eq!(head, 6),
            _ => panic!("expected overflow"),
        }
    }

    #[test]
    fn test_exactly_capacity_behind_is_not_overflow() {
        let queue = OffsetQueue::with_capacity(4);
        for i in 0..4u32 {
            queue.push(i);
        }
        assert_eq!(batch_offsets(queue.poll_since(0)), vec![1, 2, 3, 4]);
        queue.push(4);
        assert!(matches!(queue.poll_since(0), PollResult::Overflow { head: 5 }));
        assert_eq!(batch_offsets(queue.poll_since(1)), vec![2, 3, 4, 5]);
    }

    #[test]
    fn test_reader_ahead_of_head_resyncs() {
        let queue = OffsetQueue::with_capacity(4);
        queue.push(1u32);
        assert!(matches!(queue.poll_since(7), PollResult::Overflow { head: 1 }));
    }

    #[test]
    fn test_concurrent_writers_observed_once_in_order() {
        let queue = Arc::new(OffsetQueue::with_capacity(1024));
        let per_writer = 300u64;

        std::thread::scope(|scope| {
            for w in 0..2u64 {
                let queue = Arc::clone(&queue);
                scope.spawn(move || {
                    for i in 0..per_writer {
                        queue.push(w * 1000 + i);
                    }
                });
            }

            let mut last = 0u64;
            let mut seen = Vec::new();
            let mut overflowed = false;
            while last < 2 * per_writer && !overflowed {
                match queue.poll_since(last) {
                    PollResult::Batch(items) => {
                        for (offset, value) in items {
                            assert_eq!(offset, last + 1, "gap without overflow");
                            last = offset;
                            seen.push(*value);
                        }
                    }
                    PollResult::Overflow { .. } => overflowed = true,
                    PollResult::Start(_) => unreachable!(),
                }
                std::thread::yield_now();
            }

            if !overflowed {
                assert_eq!(seen.len() as u64, 2 * per_writer);
                for w in 0..2u64 {
                    let mine: Vec<u64> = seen.iter().copied().filter(|v| v / 1000 == w).collect();
                    let expected: Vec<u64> = (0..per_writer).map(|i| w * 1000 + i).collect();
                    assert_eq!(mine, expected);
                }
            }
        });
    }

    #[test]
    fn test_small_ring_under_contention_never_gaps() {
        let queue = Arc::new(OffsetQueue::with_capacity(8));
        std::thread::scope(|scope| {
            for _ in 0..2 {
                let queue = Arc::clone(&queue);
                scope.spawn(move || {
                    for i in 0..2000u32 {
                        queue.push(i);
                    }
                });
            }

            let mut last = 0u64;
            while last < 4000 {
                match queue.poll_since(last) {
                    PollResult::Batch(items) => {
                        for (offset, _) in items {
                            assert_eq!(offset, last + 1);
                            last = offset;
                        }
                    }
                    PollResult::Overflow { head } => last = head,
                    PollResult::Start(_) => unreachable!(),
                }
            }
        });
    }
}
