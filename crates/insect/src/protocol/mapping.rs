// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Mapping payload: announcement, dependency request and discovery reply.
//!
//! ```text
//! 0      1      2        3         4            12     14      15
//! +------+------+--------+---------+------------+------+-------+------+-------+------------+
//! | type | flags| hostLen| routeLen| timestamp  | port | depLen| host | route | dependency |
//! +------+------+--------+---------+------------+------+-------+------+-------+------------+
//! ```

use super::cursor::{truncate_utf8, Cursor, CursorMut, MAX_SHORT_STR};
use super::{CodecError, CodecResult, TYPE_MAPPING};

/// Fixed header size in bytes.
pub const MAPPING_HEADER_SIZE: usize = 15;
/// Maximum encoded size (header + three 255-byte strings).
pub const MAPPING_MAX_SIZE: usize = MAPPING_HEADER_SIZE + 3 * MAX_SHORT_STR;

/// Sender declares itself out of service.
pub const FLAG_OUT_OF_SERVICE: u8 = 0x01;

/// Mapping payload.
///
/// An empty `dependency` marks a pure announcement; otherwise the sender asks
/// for every instance of the `dependency` route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mapping {
    pub flags: u8,
    pub timestamp: i64,
    pub port: u16,
    pub host: String,
    pub route: String,
    pub dependency: String,
}

impl Mapping {
    /// Announcement of `host:port` serving `route`.
    pub fn announcement(route: &str, host: &str, port: u16, timestamp: i64) -> Self {
        Self {
            flags: 0,
            timestamp,
            port,
            host: host.to_string(),
            route: route.to_string(),
            dependency: String::new(),
        }
    }

    /// Request for all instances of `dependency`, sent by `host:port` (serving `route`).
    pub fn dependency_request(
        route: &str,
        host: &str,
        port: u16,
        timestamp: i64,
        dependency: &str,
    ) -> Self {
        Self {
            dependency: dependency.to_string(),
            ..Self::announcement(route, host, port, timestamp)
        }
    }

    pub fn with_out_of_service(mut self, out_of_service: bool) -> Self {
        if out_of_service {
            self.flags |= FLAG_OUT_OF_SERVICE;
        } else {
            self.flags &= !FLAG_OUT_OF_SERVICE;
        }
        self
    }

    pub fn is_announcement(&self) -> bool {
        self.dependency.is_empty()
    }

    pub fn is_out_of_service(&self) -> bool {
        self.flags & FLAG_OUT_OF_SERVICE != 0
    }

    /// Exact number of bytes [`Mapping::encode`] will write.
    pub fn encoded_len(&self) -> usize {
        MAPPING_HEADER_SIZE
            + truncate_utf8(&self.host, MAX_SHORT_STR).len()
            + truncate_utf8(&self.route, MAX_SHORT_STR).len()
            + truncate_utf8(&self.dependency, MAX_SHORT_STR).len()
    }

    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        let host = truncate_utf8(&self.host, MAX_SHORT_STR);
        let route = truncate_utf8(&self.route, MAX_SHORT_STR);
        let dependency = truncate_utf8(&self.dependency, MAX_SHORT_STR);

        let mut cursor = CursorMut::new(buf);
        cursor.write_u8(TYPE_MAPPING)?;
        cursor.write_u8(self.flags)?;
        cursor.write_u8(host.len() as u8)?;
        cursor.write_u8(route.len() as u8)?;
        cursor.write_i64_be(self.timestamp)?;
        cursor.write_u16_be(self.port)?;
        cursor.write_u8(dependency.len() as u8)?;
        cursor.write_bytes(host.as_bytes())?;
        cursor.write_bytes(route.as_bytes())?;
        cursor.write_bytes(dependency.as_bytes())?;
        Ok(cursor.offset())
    }

    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        if buf.len() > MAPPING_MAX_SIZE {
            return Err(CodecError::Oversized {
                declared: buf.len(),
                max: MAPPING_MAX_SIZE,
            });
        }

        let mut cursor = Cursor::new(buf);
        let tag = cursor.read_u8()?;
        if tag != TYPE_MAPPING {
            return Err(CodecError::UnknownType(tag));
        }
        let flags = cursor.read_u8()?;
        let host_len = cursor.read_u8()? as usize;
        let route_len = cursor.read_u8()? as usize;
        let timestamp = cursor.read_i64_be()?;
        let port = cursor.read_u16_be()?;
        let dep_len = cursor.read_u8()? as usize;

        // Reject before touching the variable section.
        let declared = MAPPING_HEADER_SIZE + host_len + route_len + dep_len;
        if declared > buf.len() {
            return Err(CodecError::Truncated {
                offset: cursor.offset(),
                needed: declared - buf.len(),
            });
        }

        let host = cursor.read_str(host_len)?;
        let route = cursor.read_str(route_len)?;
        let dependency = cursor.read_str(dep_len)?;

        Ok(Self {
            flags,
            timestamp,
            port,
            host,
            route,
            dependency,
        })
    }
}
