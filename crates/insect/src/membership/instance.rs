// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Instance identity and per-instance state.

use crate::protocol::Mapping;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

/// Table identity of an instance: its announced `(host, port)`.
///
/// `host` is kept as announced. Only a literal IP can match a UDP peer, so
/// Slaves must announce one (see [`crate::InsectConfig::validate_for_slave`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub host: String,
    pub port: u16,
}

impl InstanceKey {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Socket address when `host` is a literal IP.
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.host
            .parse::<IpAddr>()
            .ok()
            .map(|ip| SocketAddr::new(ip, self.port))
    }

    /// Whether this key is the UDP peer `addr`. Never true for a host name.
    pub fn matches(&self, addr: SocketAddr) -> bool {
        self.port == addr.port()
            && self
                .host
                .parse::<IpAddr>()
                .map(|ip| ip == addr.ip())
                .unwrap_or(false)
    }
}

impl From<SocketAddr> for InstanceKey {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Mutable record stored under an [`InstanceKey`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceState {
    pub route: String,
    pub host: String,
    pub port: u16,
    /// Sender clock, for freshness ordering only.
    pub timestamp: i64,
    /// Path collaborators redirect to; not carried on the wire.
    pub internal_path: String,
    pub dependencies: BTreeSet<String>,
    pub out_of_service: bool,
    /// Out of service by administrative decision; survives re-announcements.
    pub(crate) held: bool,
}

impl InstanceState {
    pub fn new(route: impl Into<String>, host: impl Into<String>, port: u16, timestamp: i64) -> Self {
        Self {
            route: route.into(),
            host: host.into(),
            port,
            timestamp,
            internal_path: String::new(),
            dependencies: BTreeSet::new(),
            out_of_service: false,
            held: false,
        }
    }

    /// State described by an accepted mapping.
    pub fn from_mapping(mapping: &Mapping) -> Self {
        let mut state = Self::new(&mapping.route, &mapping.host, mapping.port, mapping.timestamp);
        if !mapping.is_announcement() {
            state.dependencies.insert(mapping.dependency.clone());
        }
        state.out_of_service = mapping.is_out_of_service();
        state
    }

    pub fn with_dependency(mut self, dependency: impl Into<String>) -> Self {
        self.dependencies.insert(dependency.into());
        self
    }

    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.host.clone(), self.port)
    }

    pub fn is_key(&self, key: &InstanceKey) -> bool {
        self.port == key.port && self.host == key.host
    }

    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.key().socket_addr()
    }

    /// Whether an administrative hold keeps this instance out of service.
    pub fn is_held(&self) -> bool {
        self.held
    }

    /// Synthetic announcement describing this instance.
    pub fn to_mapping(&self) -> Mapping {
        Mapping::announcement(&self.route, &self.host, self.port, self.timestamp)
            .with_out_of_service(self.out_of_service)
    }
}

/// Wall-clock milliseconds used as the mapping timestamp.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_matches_socket_addr() {
        let key = InstanceKey::new("127.0.0.1", 4000);
        assert!(key.matches("127.0.0.1:4000".parse().expect("addr")));
        assert!(!key.matches("127.0.0.1:4001".parse().expect("addr")));
        assert!(!key.matches("127.0.0.2:4000".parse().expect("addr")));
        assert!(!InstanceKey::new("localhost", 4000).matches("127.0.0.1:4000".parse().expect("addr")));
    }

    #[test]
    fn test_key_display() {
        assert_eq!(InstanceKey::new("10.0.0.1", 80).to_string(), "10.0.0.1:80");
        assert_eq!(InstanceKey::new("::1", 80).to_string(), "[::1]:80");
        let v6: SocketAddr = "[::1]:80".parse().expect("addr");
        assert_eq!(InstanceKey::from(v6).socket_addr(), Some(v6));
    }

    #[test]
    fn test_from_dependency_request() {
        let mapping = Mapping::dependency_request("/me", "10.0.0.1", 1, 5, "/db");
        let state = InstanceState::from_mapping(&mapping);
        assert_eq!(state.route, "/me");
        assert!(state.dependencies.contains("/db"));
        assert!(!state.out_of_service);
        assert!(state.internal_path.is_empty());
    }

    #[test]
    fn test_from_announcement_carries_flag() {
        let mapping = Mapping::announcement("/me", "10.0.0.1", 1, 5).with_out_of_service(true);
        let state = InstanceState::from_mapping(&mapping);
        assert!(state.dependencies.is_empty());
        assert!(state.out_of_service);
        assert!(!state.is_held());
    }

    #[test]
    fn test_to_mapping_is_announcement() {
        let state = InstanceState::new("/a", "10.0.0.9", 81, 123).with_dependency("/b");
        let mapping = state.to_mapping();
        assert!(mapping.is_announcement());
        assert_eq!((mapping.host.as_str(), mapping.port), ("10.0.0.9", 81));
        assert_eq!(mapping.timestamp, 123);
    }
}
