// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics forwarding.
//!
//! Application threads push samples into an [`OffsetQueue`]; the exchange
//! thread drains it on each flush interval and packs the backlog into as
//! many `Metrics` datagrams as needed. A reader that falls a full ring
//! behind loses the overwritten samples, logs how many, and resyncs.

use crate::exchange::QueueControl;
use crate::protocol::{MetricEntry, Metrics};
use crate::rt::{OffsetQueue, PollResult};
use std::net::SocketAddr;
use std::sync::Arc;

/// Metric entry tagged with the peer that reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSample {
    pub source: SocketAddr,
    pub entry: MetricEntry,
}

/// Exchange-side reader of a metrics queue.
pub struct MetricsSink {
    queue: Arc<OffsetQueue<MetricEntry>>,
    last: u64,
    lost: u64,
}

impl MetricsSink {
    pub fn new(queue: Arc<OffsetQueue<MetricEntry>>) -> Self {
        Self {
            queue,
            last: 0,
            lost: 0,
        }
    }

    /// Samples lost to ring overflow so far.
    pub fn lost(&self) -> u64 {
        self.lost
    }

    /// Everything pushed since the previous drain that is still resident.
    pub fn drain(&mut self) -> Vec<Arc<MetricEntry>> {
        // Second attempt only after an overflow resync.
        for _ in 0..2 {
            match self.queue.poll_since(self.last) {
                PollResult::Batch(items) => {
                    if let Some((offset, _)) = items.last() {
                        self.last = *offset;
                    }
                    return items.into_iter().map(|(_, entry)| entry).collect();
                }
                PollResult::Start(head) => {
                    self.last = head;
                    return Vec::new();
                }
                PollResult::Overflow { head } => {
                    let oldest = head.saturating_sub(self.queue.capacity() as u64);
                    let dropped = oldest.saturating_sub(self.last);
                    self.lost += dropped;
                    log::warn!(
                        "[slave] metrics backlog overran the queue: {} samples lost, resyncing at {}",
                        dropped,
                        oldest
                    );
                    self.last = oldest.min(head);
                }
            }
        }
        Vec::new()
    }

    /// Drain and send to every remote. Returns the number of packets per remote.
    pub fn flush(&mut self, remotes: &[SocketAddr], queue: &mut QueueControl<'_>) -> usize {
        let entries = self.drain();
        if entries.is_empty() || remotes.is_empty() {
            return 0;
        }

        let mut rest = &entries[..];
        let mut packets = 0;
        while !rest.is_empty() {
            let mut packed = 0;
            for remote in remotes {
                queue.send_with(*remote, |buf| {
                    let (written, n) = Metrics::encode_entries(rest, buf)?;
                    packed = n;
                    Ok(written)
                });
            }
            if packed == 0 {
                log::warn!("[slave] could not pack {} metric samples", rest.len());
                break;
            }
            rest = &rest[packed..];
            packets += 1;
        }
        packets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::queue::TestQueues;
    use crate::protocol::Payload;

    fn remote(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    #[test]
    fn test_drain_returns_new_samples_once() {
        let queue = Arc::new(OffsetQueue::with_capacity(16));
        let mut sink = MetricsSink::new(Arc::clone(&queue));
        queue.push(MetricEntry::new("a", 1, 1.0));
        queue.push(MetricEntry::new("b", 2, 2.0));

        let drained = sink.drain();
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[1].path, "b");
        assert!(sink.drain().is_empty());
    }

    #[test]
    fn test_overflow_counts_lost_and_keeps_resident() {
        let queue = Arc::new(OffsetQueue::with_capacity(4));
        let mut sink = MetricsSink::new(Arc::clone(&queue));
        for i in 0..10 {
            queue.push(MetricEntry::new("m", i, i as f64));
        }

        let drained = sink.drain();
        assert_eq!(sink.lost(), 6);
        let timestamps: Vec<i64> = drained.iter().map(|e| e.timestamp).collect();
        assert_eq!(timestamps, vec![6, 7, 8, 9]);
    }

    #[test]
    fn test_flush_splits_backlog_into_packets() {
        let queue = Arc::new(OffsetQueue::with_capacity(512));
        let mut sink = MetricsSink::new(Arc::clone(&queue));
        for i in 0..200 {
            queue.push(MetricEntry::new(format!("service.latency.p{}", i), i, 0.25));
        }

        let mut queues = TestQueues::new();
        let remotes = [remote(1), remote(2)];
        let packets = sink.flush(&remotes, &mut queues.control());
        assert!(packets > 1);

        let sent = queues.take_outbound();
        assert_eq!(sent.len(), packets * remotes.len());

        let mut total = 0;
        for (to, payload) in &sent {
            if *to == remote(1) {
                match payload {
                    Payload::Metrics(metrics) => total += metrics.entries.len(),
                    other => panic!("unexpected {}", other.kind()),
                }
            }
        }
        assert_eq!(total, 200);
    }

    #[test]
    fn test_flush_without_samples_sends_nothing() {
        let queue = Arc::new(OffsetQueue::with_capacity(8));
        let mut sink = MetricsSink::new(queue);
        let mut queues = TestQueues::new();
        assert_eq!(sink.flush(&[remote(1)], &mut queues.control()), 0);
        assert!(queues.take_outbound().is_empty());
    }
}
