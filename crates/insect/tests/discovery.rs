// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

#![allow(clippy::uninlined_format_args)] // Test/bench code readability over pedantic
#![allow(clippy::missing_panics_doc)] // Tests/examples panic on failure
#![allow(clippy::too_many_lines)] // Example/test code
#![allow(clippy::similar_names)] // Test variable naming
#![allow(clippy::float_cmp)] // Test assertions with constants

//! Queen/Slave discovery over real UDP sockets on loopback.

use insect::membership::InstanceKey;
use insect::{InsectConfig, PollResult, Queen, Slave};
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

fn loopback() -> SocketAddr {
    "127.0.0.1:0".parse().expect("addr")
}

fn start_queen() -> Queen {
    Queen::start(InsectConfig::new(loopback())).expect("queen start")
}

fn slave_config(queen: &Queen) -> InsectConfig {
    InsectConfig::new(loopback())
        .with_remote(queen.local_addr())
        .with_pulse_interval(Duration::from_millis(50))
        .with_metrics_flush_interval(Duration::from_millis(20))
}

fn start_slave(queen: &Queen, route: &str) -> Slave {
    Slave::start(slave_config(queen), route).expect("slave start")
}

fn key_of(slave: &Slave) -> InstanceKey {
    let (host, port) = slave.advertised_address();
    InstanceKey::new(host, port)
}

/// Poll `condition` until it holds or `timeout` elapses.
fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Start `route` 200ms after a waiter began resolving it with `timeout`.
/// Returns the found key, the announcer's key and the time from the
/// announcer's start to the waiter's return.
fn resolve_late_announcer(
    queen: &Queen,
    client: &Slave,
    route: &str,
    timeout: Duration,
) -> (Option<InstanceKey>, InstanceKey, Duration) {
    thread::scope(|scope| {
        let waiter = scope.spawn(|| {
            let found = client.find_service_timeout(route, timeout);
            (found, Instant::now())
        });

        thread::sleep(Duration::from_millis(200));
        let announced_at = Instant::now();
        let server = start_slave(queen, route);
        let (found, resolved_at) = waiter.join().expect("waiter");
        (found, key_of(&server), resolved_at.duration_since(announced_at))
    })
}

#[test]
fn test_waiting_slave_resolves_late_announcer() {
    let queen = start_queen();
    let client = start_slave(&queen, "/svc-b");

    let (found, server, latency) =
        resolve_late_announcer(&queen, &client, "/svc-a", Duration::from_secs(5));

    assert_eq!(found, Some(server));
    assert!(latency < Duration::from_millis(500), "resolution took {:?}", latency);
}

#[test]
fn test_wait_without_deadline_resolves_late_announcer() {
    let queen = start_queen();
    let client = start_slave(&queen, "/svc-b");

    let (found, server, latency) =
        resolve_late_announcer(&queen, &client, "/svc-a", Duration::MAX);

    assert_eq!(found, Some(server));
    assert!(latency < Duration::from_millis(500), "resolution took {:?}", latency);
}

#[test]
fn test_already_known_route_resolves_immediately() {
    let queen = start_queen();
    let server = start_slave(&queen, "/db");
    let client = start_slave(&queen, "/web");

    let found = client
        .find_services("/db", Duration::from_secs(5))
        .expect("resolved");
    assert_eq!(found, vec![key_of(&server)]);

    // Second lookup is served from the local table
    let started = Instant::now();
    assert_eq!(client.find_service("/db"), Some(key_of(&server)));
    assert!(started.elapsed() < Duration::from_millis(100));
    assert!(!client.membership().pending().contains("/db"));
}

#[test]
fn test_unknown_route_times_out() {
    let queen = start_queen();
    let client = start_slave(&queen, "/web");

    let started = Instant::now();
    assert_eq!(client.find_service_timeout("/nobody", Duration::from_millis(300)), None);
    assert!(started.elapsed() >= Duration::from_millis(300));
}

#[test]
fn test_queen_registers_dependencies_and_announcements() {
    let queen = start_queen();
    let server = start_slave(&queen, "/db");
    let client = start_slave(&queen, "/web");
    client.find_service_timeout("/db", Duration::from_secs(5));

    assert!(eventually(Duration::from_secs(2), || {
        queen.routes() == vec!["/db".to_string(), "/web".to_string()]
    }));
    let web = queen.instances("/web");
    assert_eq!(web.len(), 1);
    assert!(web[0].dependencies.contains("/db"));
    assert!(queen.instances("/db")[0].is_key(&key_of(&server)));
    assert!(queen.stats().received > 0);
}

#[test]
fn test_held_instance_is_not_discoverable_until_released() {
    let queen = start_queen();
    let server = start_slave(&queen, "/db");
    assert!(eventually(Duration::from_secs(2), || !queen.instances("/db").is_empty()));
    assert!(queen.set_is_out_of_service("/db", &key_of(&server), true));

    let client = start_slave(&queen, "/web");
    assert_eq!(client.find_service_timeout("/db", Duration::from_millis(300)), None);

    // Still held after further heartbeats
    thread::sleep(Duration::from_millis(150));
    assert!(queen.instances("/db")[0].out_of_service);

    assert!(queen.set_is_out_of_service("/db", &key_of(&server), false));
    assert_eq!(
        client.find_service_timeout("/db", Duration::from_secs(5)),
        Some(key_of(&server))
    );

    assert!(!queen.set_is_out_of_service("/missing", &key_of(&server), true));
}

#[test]
fn test_queen_stop_clears_slave_tables() {
    let mut queen = start_queen();
    let server = start_slave(&queen, "/db");
    let client = start_slave(&queen, "/web");
    assert!(client.find_service_timeout("/db", Duration::from_secs(5)).is_some());

    assert!(queen.stop());
    assert!(eventually(Duration::from_secs(2), || client.membership().table().is_empty()));
    drop(server);
}

#[test]
fn test_slave_stop_marks_it_out_of_service() {
    let queen = start_queen();
    let mut server = start_slave(&queen, "/db");
    assert!(eventually(Duration::from_secs(2), || !queen.instances("/db").is_empty()));

    assert!(server.stop());
    assert!(eventually(Duration::from_secs(2), || {
        queen.instances("/db").iter().all(|state| state.out_of_service)
    }));
}

#[test]
fn test_forwarded_metrics_reach_queen_feed() {
    let queen = start_queen();
    let server = start_slave(&queen, "/db");
    assert!(eventually(Duration::from_secs(2), || !queen.instances("/db").is_empty()));

    server.forward("db.connections", 12.0);
    server.forward("db.latency_ms", 0.75);

    let feed = queen.metrics_feed();
    let mut last = 0;
    let mut seen = Vec::new();
    assert!(eventually(Duration::from_secs(2), || {
        if let PollResult::Batch(items) = feed.poll_since(last) {
            for (offset, sample) in items {
                last = offset;
                seen.push(sample);
            }
        }
        seen.len() >= 2
    }));

    assert_eq!(seen[0].source, server.local_addr());
    assert_eq!(seen[0].entry.path, "db.connections");
    assert_eq!(seen[1].entry.value, 0.75);
}
