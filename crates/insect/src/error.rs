// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Library error type.
//!
//! Only start-up problems surface as `Err`: bad configuration, bind failure,
//! a worker that cannot be spawned. Everything that happens once the loop
//! runs (malformed datagrams, untrusted senders, transient I/O) is absorbed
//! and logged.

use crate::protocol::CodecError;

#[derive(Debug)]
pub enum Error {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Configuration rejected by `validate()`.
    Config(&'static str),
    /// A remote in `host:port[,host:port...]` form could not be parsed or resolved.
    InvalidRemote(String),

    // ========================================================================
    // Transport Errors
    // ========================================================================
    /// I/O error with underlying cause.
    IoError(std::io::Error),
    /// Failed to bind the UDP socket.
    BindFailed(String),

    // ========================================================================
    // Protocol Errors
    // ========================================================================
    /// Payload could not be encoded or decoded.
    Codec(CodecError),

    // ========================================================================
    // Lifecycle Errors
    // ========================================================================
    /// Operation not valid in the current state (e.g. already stopped).
    InvalidState(String),
    /// Worker thread could not be spawned.
    SpawnFailed(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Config(msg) => write!(f, "Invalid configuration: {}", msg),
            Error::InvalidRemote(remote) => write!(f, "Invalid remote address: {}", remote),
            Error::IoError(e) => write!(f, "I/O error: {}", e),
            Error::BindFailed(msg) => write!(f, "Bind failed: {}", msg),
            Error::Codec(e) => write!(f, "Codec error: {}", e),
            Error::InvalidState(msg) => write!(f, "Invalid state: {}", msg),
            Error::SpawnFailed(msg) => write!(f, "Worker spawn failed: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::IoError(e) => Some(e),
            Error::Codec(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::IoError(e)
    }
}

impl From<CodecError> for Error {
    fn from(e: CodecError) -> Self {
        Error::Codec(e)
    }
}

/// Convenient alias for API results using the public `Error` type.
pub type Result<T> = core::result::Result<T, Error>;
