// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Metrics batch payload.
//!
//! `type(1) count(1) { pathLen(1) path ts(i64) value(f64) }*count`, sized to
//! one MTU-safe datagram. Entries that do not fit are left to the caller.

use super::cursor::{truncate_utf8, Cursor, CursorMut, MAX_SHORT_STR};
use super::{CodecError, CodecResult, TYPE_METRICS};

/// Maximum encoded size of a metrics batch.
pub const METRICS_MAX_SIZE: usize = 1472;
/// Maximum entries per batch (one-byte count).
pub const METRICS_MAX_ENTRIES: usize = u8::MAX as usize;

const METRICS_HEADER_SIZE: usize = 2;
const ENTRY_FIXED_SIZE: usize = 1 + 8 + 8;

/// One time-series sample.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEntry {
    pub path: String,
    pub timestamp: i64,
    pub value: f64,
}

impl MetricEntry {
    pub fn new(path: impl Into<String>, timestamp: i64, value: f64) -> Self {
        Self {
            path: path.into(),
            timestamp,
            value,
        }
    }

    fn encoded_len(&self) -> usize {
        ENTRY_FIXED_SIZE + truncate_utf8(&self.path, MAX_SHORT_STR).len()
    }
}

/// Metrics payload.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Metrics {
    pub entries: Vec<MetricEntry>,
}

impl Metrics {
    pub fn new(entries: Vec<MetricEntry>) -> Self {
        Self { entries }
    }

    /// Encode, returning `(bytes_written, entries_packed)`.
    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<(usize, usize)> {
        Self::encode_entries(&self.entries, buf)
    }

    /// Greedily pack a prefix of `entries` into `buf`.
    ///
    /// Stops at the first entry that would overflow the buffer, the
    /// [`METRICS_MAX_SIZE`] limit or the entry count limit. The caller can
    /// resume with `&entries[packed..]` in a new packet.
    pub fn encode_entries<E>(entries: &[E], buf: &mut [u8]) -> CodecResult<(usize, usize)>
    where
        E: std::borrow::Borrow<MetricEntry>,
    {
        let limit = buf.len().min(METRICS_MAX_SIZE);
        let mut cursor = CursorMut::new(&mut buf[..limit]);
        cursor.write_u8(TYPE_METRICS)?;
        cursor.write_u8(0)?;

        let mut packed = 0usize;
        for entry in entries.iter().take(METRICS_MAX_ENTRIES) {
            let entry = entry.borrow();
            if entry.encoded_len() > cursor.remaining() {
                break;
            }
            let path = truncate_utf8(&entry.path, MAX_SHORT_STR);
            cursor.write_u8(path.len() as u8)?;
            cursor.write_bytes(path.as_bytes())?;
            cursor.write_i64_be(entry.timestamp)?;
            cursor.write_f64_be(entry.value)?;
            packed += 1;
        }

        cursor.patch_u8(1, packed as u8)?;
        Ok((cursor.offset(), packed))
    }

    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() > METRICS_MAX_SIZE {
            return Err(CodecError::Oversized {
                declared: buf.len(),
                max: METRICS_MAX_SIZE,
            });
        }

        let mut cursor = Cursor::new(buf);
        let tag = cursor.read_u8()?;
        if tag != TYPE_METRICS {
            return Err(CodecError::UnknownType(tag));
        }
        let count = cursor.read_u8()? as usize;

        // Cheapest possible body is count * ENTRY_FIXED_SIZE
        let minimum = METRICS_HEADER_SIZE + count * ENTRY_FIXED_SIZE;
        if minimum > METRICS_MAX_SIZE {
            return Err(CodecError::Oversized {
                declared: minimum,
                max: METRICS_MAX_SIZE,
            });
        }
        if minimum > buf.len() {
            return Err(CodecError::Truncated {
                offset: cursor.offset(),
                needed: minimum - buf.len(),
            });
        }

        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let path_len = cursor.read_u8()? as usize;
            let path = cursor.read_str(path_len)?;
            let timestamp = cursor.read_i64_be()?;
            let value = cursor.read_f64_be()?;
            entries.push(MetricEntry {
                path,
                timestamp,
                value,
            });
        }

        Ok(Self { entries })
    }
}
