// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Insect wire protocol.
//!
//! One UDP datagram carries exactly one payload. Every payload starts with a
//! one-byte type tag; multi-byte integers are big-endian and variable-length
//! strings are prefixed by a one-byte UTF-8 length.
//!
//! | Tag | Payload | Size |
//! |-----|---------|------|
//! | `0x1` | [`Mapping`] (announce / dependency request / discovery reply) | <= 780 B |
//! | `0x2` | [`Shutdown`] (magic `0x86`) | 2 B |
//! | `0x3` | [`Invalidate`] (magic `0x73`) | 2 B |
//! | `0x4` | [`Metrics`] batch | <= 1472 B |

pub mod control;
pub mod cursor;
pub mod mapping;
pub mod metrics;

pub use control::{Invalidate, Shutdown};
pub use cursor::{truncate_utf8, Cursor, CursorMut};
pub use mapping::{Mapping, FLAG_OUT_OF_SERVICE};
pub use metrics::{MetricEntry, Metrics};

use std::fmt;

/// Type tag of a [`Mapping`] payload.
pub const TYPE_MAPPING: u8 = 0x1;
/// Type tag of a [`Shutdown`] payload.
pub const TYPE_SHUTDOWN: u8 = 0x2;
/// Type tag of an [`Invalidate`] payload.
pub const TYPE_INVALIDATE: u8 = 0x3;
/// Type tag of a [`Metrics`] payload.
pub const TYPE_METRICS: u8 = 0x4;

/// Largest datagram any payload kind may occupy (MTU-safe UDP payload).
pub const MAX_DATAGRAM_SIZE: usize = metrics::METRICS_MAX_SIZE;

/// Codec error.
///
/// Every decode failure is a malformed-message condition: the datagram is
/// dropped and logged, never propagated further.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Not enough bytes left for a fixed-size field.
    Truncated { offset: usize, needed: usize },
    /// Declared lengths exceed the payload kind's maximum size.
    Oversized { declared: usize, max: usize },
    /// Control packet magic byte does not match.
    BadMagic { expected: u8, found: u8 },
    /// String field is not valid UTF-8.
    InvalidUtf8 { offset: usize },
    /// Output buffer too small for the encoded payload.
    BufferTooSmall { offset: usize, needed: usize },
    /// No decoder recognises the type tag.
    UnknownType(u8),
    /// Empty datagram.
    Empty,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CodecError::Truncated { offset, needed } => {
                write!(f, "truncated at offset {}: {} more bytes needed", offset, needed)
            }
            CodecError::Oversized { declared, max } => {
                write!(f, "declared size {} exceeds maximum {}", declared, max)
            }
            CodecError::BadMagic { expected, found } => {
                write!(f, "bad magic 0x{:02x} (expected 0x{:02x})", found, expected)
            }
            CodecError::InvalidUtf8 { offset } => write!(f, "invalid UTF-8 at offset {}", offset),
            CodecError::BufferTooSmall { offset, needed } => {
                write!(f, "buffer too small at offset {}: {} bytes needed", offset, needed)
            }
            CodecError::UnknownType(tag) => write!(f, "unknown payload type 0x{:02x}", tag),
            CodecError::Empty => write!(f, "empty datagram"),
        }
    }
}

impl std::error::Error for CodecError {}

pub type CodecResult<T> = core::result::Result<T, CodecError>;

/// Decoded payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Mapping(Mapping),
    Metrics(Metrics),
    Invalidate(Invalidate),
    Shutdown(Shutdown),
}

impl Payload {
    /// Type tag written as the first byte.
    pub fn type_tag(&self) -> u8 {
        match self {
            Payload::Mapping(_) => TYPE_MAPPING,
            Payload::Metrics(_) => TYPE_METRICS,
            Payload::Invalidate(_) => TYPE_INVALIDATE,
            Payload::Shutdown(_) => TYPE_SHUTDOWN,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Payload::Mapping(_) => "mapping",
            Payload::Metrics(_) => "metrics",
            Payload::Invalidate(_) => "invalidate",
            Payload::Shutdown(_) => "shutdown",
        }
    }

    /// Encode into `buf`, returning the number of bytes written.
    ///
    /// Strings longer than 255 bytes are truncated on a code point boundary;
    /// metric entries that do not fit are dropped.
    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        match self {
            Payload::Mapping(m) => m.encode(buf),
            Payload::Metrics(m) => m.encode(buf).map(|(written, _)| written),
            Payload::Invalidate(i) => i.encode(buf),
            Payload::Shutdown(s) => s.encode(buf),
        }
    }

    /// Encode into a freshly allocated vector (tests and tooling).
    pub fn to_vec(&self) -> CodecResult<Vec<u8>> {
        let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
        let len = self.encode(&mut buf)?;
        buf.truncate(len);
        Ok(buf)
    }

    /// Decode one datagram.
    ///
    /// Known kinds are probed most frequent first; the first decoder that
    /// claims the type tag decides the outcome.
    pub fn decode(buf: &[u8]) -> CodecResult<Payload> {
        if buf.is_empty() {
            return Err(CodecError::Empty);
        }
        for probe in PROBES {
            if let Some(result) = probe(buf) {
                return result;
            }
        }
        Err(CodecError::UnknownType(buf[0]))
    }
}

type Probe = fn(&[u8]) -> Option<CodecResult<Payload>>;

const PROBES: &[Probe] = &[
    |buf| (buf[0] == TYPE_MAPPING).then(|| Mapping::decode(buf).map(Payload::Mapping)),
    |buf| (buf[0] == TYPE_METRICS).then(|| Metrics::decode(buf).map(Payload::Metrics)),
    |buf| (buf[0] == TYPE_INVALIDATE).then(|| Invalidate::decode(buf).map(Payload::Invalidate)),
    |buf| (buf[0] == TYPE_SHUTDOWN).then(|| Shutdown::decode(buf).map(Payload::Shutdown)),
];

impl From<Mapping> for Payload {
    fn from(m: Mapping) -> Self {
        Payload::Mapping(m)
    }
}

impl From<Metrics> for Payload {
    fn from(m: Metrics) -> Self {
        Payload::Metrics(m)
    }
}
