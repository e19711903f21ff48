// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Queen: relays announcements to dependents and answers dependency requests.
//!
//! - Announcement: forwarded unchanged to every known instance that depends
//!   on the announced route (never back to the announcer, never while the
//!   announcer is out of service).
//! - Dependency request: answered with every active instance of the
//!   requested route, round-robin from a random start index.
//! - First mapping from an instance: an `Invalidate` goes out before any
//!   reply so the newcomer drops stale peers.

use super::metrics_sink::MetricSample;
use super::Role;
use crate::config::InsectConfig;
use crate::error::{Error, Result};
use crate::exchange::{ExchangeHandle, ExchangeStatsSnapshot, MessageExchange, QueueControl};
use crate::membership::{
    Insect, InstanceKey, InstanceState, Membership, MergeOutcome, TrustPolicy,
};
use crate::protocol::{Invalidate, Mapping, Metrics, Payload, Shutdown};
use crate::rt::OffsetQueue;
use crate::worker::Worker;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

/// Idle wake-up of the Queen loop; it has no periodic work.
const QUEEN_TICK: Duration = Duration::from_secs(1);

/// Queen role hooks.
pub struct QueenRole {
    metrics_feed: Arc<OffsetQueue<MetricSample>>,
    rng: fastrand::Rng,
}

impl QueenRole {
    pub fn new(metrics_feed: Arc<OffsetQueue<MetricSample>>) -> Self {
        Self {
            metrics_feed,
            rng: fastrand::Rng::new(),
        }
    }

    /// Deterministic start indices (tests).
    pub fn with_seed(metrics_feed: Arc<OffsetQueue<MetricSample>>, seed: u64) -> Self {
        Self {
            metrics_feed,
            rng: fastrand::Rng::with_seed(seed),
        }
    }

    fn relay(&self, membership: &Membership, mapping: &Mapping, queue: &mut QueueControl<'_>) {
        let announcer = InstanceKey::new(mapping.host.clone(), mapping.port);
        let held = membership
            .table()
            .get(&mapping.route, &announcer)
            .map(|state| state.out_of_service)
            .unwrap_or(true);
        if held {
            log::debug!("[queen] {} at {} is out of service, not relaying", mapping.route, announcer);
            return;
        }

        let mut relayed = 0;
        for dependent in membership.table().dependents_of(&mapping.route) {
            if dependent.is_key(&announcer) {
                continue;
            }
            let Some(to) = dependent.socket_addr() else {
                continue;
            };
            if queue.send_with(to, |buf| mapping.encode(buf)) {
                relayed += 1;
            }
        }
        if relayed > 0 {
            log::trace!("[queen] relayed {} at {} to {} dependents", mapping.route, announcer, relayed);
        }
    }

    fn answer(
        &mut self,
        membership: &Membership,
        dependency: &str,
        from: SocketAddr,
        queue: &mut QueueControl<'_>,
    ) {
        let active = membership.table().active_instances(dependency);
        if active.is_empty() {
            log::debug!("[queen] no active instance of {} for {}", dependency, from);
            return;
        }
        let start = self.rng.usize(..active.len());
        for state in round_robin(&active, start) {
            let reply = state.to_mapping();
            queue.send_with(from, |buf| reply.encode(buf));
        }
    }
}

/// `items` rotated to begin at `start`.
fn round_robin<T>(items: &[T], start: usize) -> impl Iterator<Item = &T> {
    let (head, tail) = items.split_at(start % items.len().max(1));
    tail.iter().chain(head.iter())
}

impl Role for QueenRole {
    fn name(&self) -> &'static str {
        "queen"
    }

    fn post_handle_mapping(
        &mut self,
        membership: &Membership,
        mapping: &Mapping,
        from: SocketAddr,
        outcome: MergeOutcome,
        queue: &mut QueueControl<'_>,
    ) {
        if outcome == MergeOutcome::New {
            log::info!("[queen] new instance {}:{} serving {}", mapping.host, mapping.port, mapping.route);
            queue.send(&Payload::Invalidate(Invalidate), from);
        }

        if mapping.is_announcement() {
            self.relay(membership, mapping, queue);
        } else {
            self.answer(membership, &mapping.dependency, from, queue);
        }
    }

    fn handle_shutdown(
        &mut self,
        membership: &Membership,
        from: SocketAddr,
        _queue: &mut QueueControl<'_>,
    ) {
        let marked = membership.table().mark_address_out_of_service(from);
        log::info!("[queen] {} is leaving, {} entries out of service", from, marked);
    }

    fn handle_metrics(
        &mut self,
        _membership: &Membership,
        from: SocketAddr,
        metrics: Metrics,
        _queue: &mut QueueControl<'_>,
    ) {
        for entry in metrics.entries {
            self.metrics_feed.push(MetricSample {
                source: from,
                entry,
            });
        }
    }

    fn on_tick(&mut self, _membership: &Membership, _queue: &mut QueueControl<'_>) -> Duration {
        QUEEN_TICK
    }

    fn on_shutdown(&mut self, membership: &Membership, queue: &mut QueueControl<'_>) {
        let addresses = membership.table().addresses();
        for addr in &addresses {
            queue.send(&Payload::Shutdown(Shutdown), *addr);
        }
        log::info!("[queen] sent shutdown to {} instances", addresses.len());
    }
}

// ============================================================================
// Queen facade
// ============================================================================

/// Running Queen participant.
pub struct Queen {
    membership: Arc<Membership>,
    handle: ExchangeHandle,
    metrics_feed: Arc<OffsetQueue<MetricSample>>,
    exchange: Worker,
    shutdown_timeout: Duration,
    stopped: bool,
}

impl Queen {
    /// Bind and start the exchange thread.
    pub fn start(config: InsectConfig) -> Result<Self> {
        config.validate().map_err(Error::Config)?;

        let membership = Arc::new(Membership::new());
        let metrics_feed = Arc::new(OffsetQueue::with_capacity(config.metrics_queue_capacity));
        let (mut exchange, handle) = MessageExchange::bind(&config)?;

        let mut insect = Insect::new(
            Arc::clone(&membership),
            QueenRole::new(Arc::clone(&metrics_feed)),
            TrustPolicy::SelfAuthenticated,
        );
        let worker = Worker::spawn("insect-queen", config.startup_timeout, move |ctx| {
            exchange.run(&mut insect, || ctx.mark_running());
        })?;
        let shutdown_handle = handle.clone();
        let worker = worker.with_interrupt_hook(move || {
            shutdown_handle.shutdown();
        });

        log::info!("[queen] listening on {}", handle.local_addr());
        Ok(Self {
            membership,
            handle,
            metrics_feed,
            exchange: worker,
            shutdown_timeout: config.shutdown_timeout,
            stopped: false,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.handle.local_addr()
    }

    /// Known routes, sorted.
    pub fn routes(&self) -> Vec<String> {
        self.membership.table().routes()
    }

    /// Every instance registered under `route`.
    pub fn instances(&self, route: &str) -> Vec<InstanceState> {
        self.membership.table().instances(route)
    }

    /// Flip the out-of-service flag of one instance. Absent entries are a no-op.
    pub fn set_is_out_of_service(&self, route: &str, address: &InstanceKey, out_of_service: bool) -> bool {
        let found = self
            .membership
            .table()
            .set_out_of_service(route, address, out_of_service);
        if found {
            log::info!(
                "[queen] {} at {} marked {}",
                route,
                address,
                if out_of_service { "out of service" } else { "in service" }
            );
        }
        found
    }

    /// Metrics reported by Slaves; read with `poll_since`.
    pub fn metrics_feed(&self) -> Arc<OffsetQueue<MetricSample>> {
        Arc::clone(&self.metrics_feed)
    }

    pub fn membership(&self) -> &Arc<Membership> {
        &self.membership
    }

    pub fn stats(&self) -> ExchangeStatsSnapshot {
        self.handle.stats().snapshot()
    }

    /// Stop the exchange (bounded). Returns `true` if it terminated.
    pub fn stop(&mut self) -> bool {
        if self.stopped {
            return true;
        }
        self.stopped = true;
        self.exchange.stop(self.shutdown_timeout)
    }
}

impl Drop for Queen {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::queue::TestQueues;
    use crate::protocol::MetricEntry;
    use crate::rt::PollResult;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn announce(route: &str, port: u16) -> Payload {
        Payload::Mapping(Mapping::announcement(route, "127.0.0.1", port, port as i64))
    }

    fn request(route: &str, port: u16, dependency: &str) -> Payload {
        Payload::Mapping(Mapping::dependency_request(route, "127.0.0.1", port, 0, dependency))
    }

    fn queen() -> (Insect<QueenRole>, TestQueues) {
        let feed = Arc::new(OffsetQueue::with_capacity(64));
        let insect = Insect::new(
            Arc::new(Membership::new()),
            QueenRole::with_seed(feed, 7),
            TrustPolicy::SelfAuthenticated,
        );
        (insect, TestQueues::new())
    }

    fn process(insect: &mut Insect<QueenRole>, queues: &mut TestQueues) -> Vec<(SocketAddr, Payload)> {
        use crate::exchange::MessageHandler;
        insect.process_messages(&mut queues.control());
        queues.take_outbound()
    }

    #[test]
    fn test_new_instance_gets_invalidate_first() {
        let (mut insect, mut queues) = queen();
        queues.push_inbound(addr(2), announce("/db", 2));
        queues.push_inbound(addr(1), request("/web", 1, "/db"));

        let sent = process(&mut insect, &mut queues);
        assert_eq!(sent[0], (addr(2), Payload::Invalidate(Invalidate)));
        assert_eq!(sent[1], (addr(1), Payload::Invalidate(Invalidate)));
        match &sent[2] {
            (to, Payload::Mapping(reply)) => {
                assert_eq!(*to, addr(1));
                assert_eq!((reply.route.as_str(), reply.port), ("/db", 2));
                assert!(reply.is_announcement());
            }
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(sent.len(), 3);

        // Second request from a known instance: no invalidate
        queues.push_inbound(addr(1), request("/web", 1, "/db"));
        let sent = process(&mut insect, &mut queues);
        assert_eq!(sent.len(), 1);
    }

    #[test]
    fn test_announcement_relayed_to_dependents_only() {
        let (mut insect, mut queues) = queen();
        queues.push_inbound(addr(1), request("/web", 1, "/db"));
        queues.push_inbound(addr(3), announce("/other", 3));
        process(&mut insect, &mut queues);

        queues.push_inbound(addr(2), announce("/db", 2));
        let sent = process(&mut insect, &mut queues);
        // Invalidate to the newcomer, then the relay to /web
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].0, addr(1));
        assert_eq!(sent[1].1, announce("/db", 2));
    }

    #[test]
    fn test_announcer_not_relayed_to_itself() {
        let (mut insect, mut queues) = queen();
        // Depends on its own route
        queues.push_inbound(addr(1), request("/a", 1, "/a"));
        process(&mut insect, &mut queues);

        queues.push_inbound(addr(1), announce("/a", 1));
        assert!(process(&mut insect, &mut queues).is_empty());
    }

    #[test]
    fn test_out_of_service_announcer_not_relayed() {
        let (mut insect, mut queues) = queen();
        queues.push_inbound(addr(1), request("/web", 1, "/db"));
        queues.push_inbound(addr(2), announce("/db", 2));
        process(&mut insect, &mut queues);

        insect
            .membership()
            .table()
            .set_out_of_service("/db", &InstanceKey::new("127.0.0.1", 2), true);
        queues.push_inbound(addr(2), announce("/db", 2));
        assert!(process(&mut insect, &mut queues).is_empty());

        // Excluded from answers too
        queues.push_inbound(addr(1), request("/web", 1, "/db"));
        assert!(process(&mut insect, &mut queues).is_empty());
    }

    #[test]
    fn test_answer_contains_all_active_instances() {
        let (mut insect, mut queues) = queen();
        for port in 10..15 {
            queues.push_inbound(addr(port), announce("/db", port));
        }
        process(&mut insect, &mut queues);

        queues.push_inbound(addr(1), request("/web", 1, "/db"));
        let sent = process(&mut insect, &mut queues);
        let mut ports: Vec<u16> = sent
            .iter()
            .filter_map(|(_, payload)| match payload {
                Payload::Mapping(m) => Some(m.port),
                _ => None,
            })
            .collect();
        assert_eq!(ports.len(), 5);
        // Round-robin: consecutive (mod 5) from the random start
        for pair in ports.windows(2) {
            assert_eq!((pair[0] - 10 + 1) % 5, pair[1] - 10);
        }
        ports.sort();
        assert_eq!(ports, vec![10, 11, 12, 13, 14]);
    }

    #[test]
    fn test_start_index_is_uniform() {
        let (mut insect, mut queues) = queen();
        let n = 4u16;
        for port in 0..n {
            queues.push_inbound(addr(100 + port), announce("/db", 100 + port));
        }
        process(&mut insect, &mut queues);

        let trials = 4000;
        let mut counts = [0usize; 4];
        for _ in 0..trials {
            queues.push_inbound(addr(1), request("/web", 1, "/db"));
            let sent = process(&mut insect, &mut queues);
            let first = sent
                .iter()
                .find_map(|(_, payload)| match payload {
                    Payload::Mapping(m) => Some(m.port),
                    _ => None,
                })
                .expect("reply");
            counts[(first - 100) as usize] += 1;
        }
        let expected = trials / n as usize;
        for count in counts {
            // Loose bound: each bucket within 20% of uniform
            assert!(
                count > expected * 8 / 10 && count < expected * 12 / 10,
                "skewed start distribution: {:?}",
                counts
            );
        }
    }

    #[test]
    fn test_round_robin_helper() {
        let items = [1, 2, 3, 4];
        let rotated: Vec<i32> = round_robin(&items, 2).copied().collect();
        assert_eq!(rotated, vec![3, 4, 1, 2]);
        assert_eq!(round_robin::<i32>(&[], 0).count(), 0);
    }

    #[test]
    fn test_shutdown_marks_sender_out_of_service() {
        let (mut insect, mut queues) = queen();
        queues.push_inbound(addr(2), announce("/db", 2));
        queues.push_inbound(addr(2), Payload::Shutdown(Shutdown));
        process(&mut insect, &mut queues);
        assert!(insect.membership().table().active_instances("/db").is_empty());
        assert_eq!(insect.membership().table().instances("/db").len(), 1);
    }

    #[test]
    fn test_metrics_published_to_feed() {
        let feed = Arc::new(OffsetQueue::with_capacity(16));
        let mut insect = Insect::new(
            Arc::new(Membership::new()),
            QueenRole::new(Arc::clone(&feed)),
            TrustPolicy::SelfAuthenticated,
        );
        let mut queues = TestQueues::new();
        queues.push_inbound(addr(2), announce("/db", 2));
        queues.push_inbound(
            addr(2),
            Payload::Metrics(Metrics::new(vec![
                MetricEntry::new("qps", 1, 10.0),
                MetricEntry::new("p99", 1, 0.2),
            ])),
        );
        process(&mut insect, &mut queues);

        match feed.poll_since(0) {
            PollResult::Batch(items) => {
                assert_eq!(items.len(), 2);
                assert_eq!(items[0].1.source, addr(2));
                assert_eq!(items[1].1.entry.path, "p99");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_on_shutdown_notifies_every_instance() {
        use crate::exchange::MessageHandler;
        let (mut insect, mut queues) = queen();
        queues.push_inbound(addr(2), announce("/db", 2));
        queues.push_inbound(addr(3), announce("/web", 3));
        process(&mut insect, &mut queues);

        insect.on_shutdown(&mut queues.control());
        let sent = queues.take_outbound();
        assert_eq!(
            sent,
            vec![
                (addr(2), Payload::Shutdown(Shutdown)),
                (addr(3), Payload::Shutdown(Shutdown))
            ]
        );
    }
}
