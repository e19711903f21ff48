// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bounds-checked big-endian cursors for the Insect wire format.

use super::{CodecError, CodecResult};

/// Longest string a one-byte length prefix can describe.
pub const MAX_SHORT_STR: usize = u8::MAX as usize;

/// Generate big-endian write methods for primitive types.
macro_rules! impl_write_be {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self, value: $type) -> CodecResult<()> {
            if self.offset + $size > self.buffer.len() {
                return Err(CodecError::BufferTooSmall {
                    offset: self.offset,
                    needed: $size,
                });
            }
            self.buffer[self.offset..self.offset + $size].copy_from_slice(&value.to_be_bytes());
            self.offset += $size;
            Ok(())
        }
    };
}

/// Generate big-endian read methods for primitive types.
macro_rules! impl_read_be {
    ($name:ident, $type:ty, $size:expr) => {
        pub fn $name(&mut self) -> CodecResult<$type> {
            let mut bytes = [0u8; $size];
            bytes.copy_from_slice(self.read_bytes($size)?);
            Ok(<$type>::from_be_bytes(bytes))
        }
    };
}

/// Return the longest prefix of `s` that fits in `max` bytes without
/// splitting a multi-byte code point.
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Mutable cursor for writing
pub struct CursorMut<'a> {
    buffer: &'a mut [u8],
    offset: usize,
}

impl<'a> CursorMut<'a> {
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn write_u8(&mut self, value: u8) -> CodecResult<()> {
        self.write_bytes(&[value])
    }

    impl_write_be!(write_u16_be, u16, 2);
    impl_write_be!(write_i64_be, i64, 8);

    pub fn write_f64_be(&mut self, value: f64) -> CodecResult<()> {
        self.write_bytes(&value.to_bits().to_be_bytes())
    }

    pub fn write_bytes(&mut self, data: &[u8]) -> CodecResult<()> {
        if self.offset + data.len() > self.buffer.len() {
            return Err(CodecError::BufferTooSmall {
                offset: self.offset,
                needed: data.len(),
            });
        }
        self.buffer[self.offset..self.offset + data.len()].copy_from_slice(data);
        self.offset += data.len();
        Ok(())
    }

    /// Overwrite a single byte already written (used to patch counts).
    pub fn patch_u8(&mut self, at: usize, value: u8) -> CodecResult<()> {
        if at >= self.offset {
            return Err(CodecError::BufferTooSmall {
                offset: at,
                needed: 1,
            });
        }
        self.buffer[at] = value;
        Ok(())
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }
}

/// Immutable cursor for reading
pub struct Cursor<'a> {
    buffer: &'a [u8],
    offset: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self { buffer, offset: 0 }
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        Ok(self.read_bytes(1)?[0])
    }

    impl_read_be!(read_u16_be, u16, 2);
    impl_read_be!(read_i64_be, i64, 8);

    pub fn read_f64_be(&mut self) -> CodecResult<f64> {
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(self.read_bytes(8)?);
        Ok(f64::from_bits(u64::from_be_bytes(bytes)))
    }

    pub fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if self.offset + len > self.buffer.len() {
            return Err(CodecError::Truncated {
                offset: self.offset,
                needed: self.offset + len - self.buffer.len(),
            });
        }
        let slice = &self.buffer[self.offset..self.offset + len];
        self.offset += len;
        Ok(slice)
    }

    /// Read `len` bytes as UTF-8.
    pub fn read_str(&mut self, len: usize) -> CodecResult<String> {
        let offset = self.offset;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| CodecError::InvalidUtf8 { offset })
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn remaining(&self) -> usize {
        self.buffer.len().saturating_sub(self.offset)
    }
}
