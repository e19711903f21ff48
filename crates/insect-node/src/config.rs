// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Node configuration file.

use insect::config::parse_remotes;
use insect::InsectConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Which participant the node runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Queen,
    Slave,
}

/// Node configuration (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Role to run (default: slave)
    #[serde(default = "default_role")]
    pub role: NodeRole,

    /// UDP bind address (default: 0.0.0.0:7979 for a Queen, 0.0.0.0:0 otherwise)
    #[serde(default)]
    pub bind: Option<SocketAddr>,

    /// Host announced to peers (default: the bound IP)
    #[serde(default)]
    pub advertise_host: Option<String>,

    /// Upstream remotes, each `host:port[,host:port...]`
    #[serde(default)]
    pub remotes: Vec<String>,

    /// Route announced by a Slave
    #[serde(default)]
    pub route: Option<String>,

    /// Routes a Slave resolves at start-up
    #[serde(default)]
    pub depends: Vec<String>,

    /// Heartbeat interval in milliseconds
    #[serde(default = "default_pulse_ms")]
    pub pulse_ms: u64,

    /// Default discovery timeout in milliseconds
    #[serde(default = "default_discovery_timeout_ms")]
    pub discovery_timeout_ms: u64,

    /// Metrics flush interval in milliseconds
    #[serde(default = "default_metrics_flush_ms")]
    pub metrics_flush_ms: u64,

    /// Metrics queue capacity (rounded up to a power of two)
    #[serde(default = "default_metrics_queue_capacity")]
    pub metrics_queue_capacity: usize,

    /// Pooled datagram buffers kept for reuse
    #[serde(default = "default_pool_capacity")]
    pub pool_capacity: usize,

    /// Re-send dependency requests on every heartbeat
    #[serde(default = "default_true")]
    pub republish_dependencies: bool,

    /// Status log interval in seconds (0 disables)
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

pub const DEFAULT_QUEEN_PORT: u16 = 7979;

fn default_role() -> NodeRole {
    NodeRole::Slave
}

fn default_pulse_ms() -> u64 {
    1000
}

fn default_discovery_timeout_ms() -> u64 {
    5000
}

fn default_metrics_flush_ms() -> u64 {
    1000
}

fn default_metrics_queue_capacity() -> usize {
    4096
}

fn default_pool_capacity() -> usize {
    512
}

fn default_true() -> bool {
    true
}

fn default_status_interval_secs() -> u64 {
    30
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: default_role(),
            bind: None,
            advertise_host: None,
            remotes: Vec::new(),
            route: None,
            depends: Vec::new(),
            pulse_ms: default_pulse_ms(),
            discovery_timeout_ms: default_discovery_timeout_ms(),
            metrics_flush_ms: default_metrics_flush_ms(),
            metrics_queue_capacity: default_metrics_queue_capacity(),
            pool_capacity: default_pool_capacity(),
            republish_dependencies: true,
            status_interval_secs: default_status_interval_secs(),
        }
    }
}

impl NodeConfig {
    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;

        serde_json::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Save configuration to a JSON file.
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))
    }

    /// Bind address, with the role's default port when unset.
    pub fn bind_address(&self) -> SocketAddr {
        self.bind.unwrap_or_else(|| {
            let port = match self.role {
                NodeRole::Queen => DEFAULT_QUEEN_PORT,
                NodeRole::Slave => 0,
            };
            SocketAddr::from(([0, 0, 0, 0], port))
        })
    }

    pub fn status_interval(&self) -> Option<Duration> {
        (self.status_interval_secs > 0).then(|| Duration::from_secs(self.status_interval_secs))
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pulse_ms == 0 {
            return Err(ConfigError::InvalidValue("pulse_ms cannot be 0".into()));
        }
        if self.role == NodeRole::Slave {
            if self.route.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::InvalidValue("a slave needs a route".into()));
            }
            if self.remotes.is_empty() {
                return Err(ConfigError::InvalidValue(
                    "a slave needs at least one remote".into(),
                ));
            }
        }
        Ok(())
    }

    /// Library configuration; resolves the remote list.
    pub fn to_insect_config(&self) -> Result<InsectConfig, ConfigError> {
        self.validate()?;

        let mut remotes = Vec::new();
        for list in &self.remotes {
            remotes.extend(parse_remotes(list).map_err(|e| ConfigError::InvalidValue(e.to_string()))?);
        }

        let mut config = InsectConfig::new(self.bind_address())
            .with_remotes(remotes)
            .with_pulse_interval(Duration::from_millis(self.pulse_ms))
            .with_pool_capacity(self.pool_capacity)
            .with_discovery_timeout(Duration::from_millis(self.discovery_timeout_ms))
            .with_metrics_flush_interval(Duration::from_millis(self.metrics_flush_ms))
            .with_metrics_queue_capacity(self.metrics_queue_capacity);
        if let Some(host) = &self.advertise_host {
            config = config.with_advertise_host(host.clone());
        }
        if !self.republish_dependencies {
            config = config.without_dependency_republish();
        }

        config
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))?;
        Ok(config)
    }
}

/// Configuration error types.
#[derive(Debug, Clone)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IoError(s) => write!(f, "I/O error: {}", s),
            Self::ParseError(s) => write!(f, "Parse error: {}", s),
            Self::SerializeError(s) => write!(f, "Serialize error: {}", s),
            Self::InvalidValue(s) => write!(f, "Invalid value: {}", s),
        }
    }
}

impl std::error::Error for ConfigError {}
