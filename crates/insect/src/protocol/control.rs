// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Two-byte control packets: `type(1) magic(1)`.

use super::{CodecError, CodecResult, TYPE_INVALIDATE, TYPE_SHUTDOWN};

/// Encoded size of every control packet.
pub const CONTROL_SIZE: usize = 2;

/// Magic byte of [`Shutdown`].
pub const SHUTDOWN_MAGIC: u8 = 0x86;
/// Magic byte of [`Invalidate`].
pub const INVALIDATE_MAGIC: u8 = 0x73;

/// Drop any locally cached peer list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Invalidate;

/// Sender is leaving the fleet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Shutdown;

fn encode_control(tag: u8, magic: u8, buf: &mut [u8]) -> CodecResult<usize> {
    if buf.len() < CONTROL_SIZE {
        return Err(CodecError::BufferTooSmall {
            offset: 0,
            needed: CONTROL_SIZE,
        });
    }
    buf[0] = tag;
    buf[1] = magic;
    Ok(CONTROL_SIZE)
}

fn decode_control(tag: u8, magic: u8, buf: &[u8]) -> CodecResult<()> {
    match buf.len() {
        0 => return Err(CodecError::Empty),
        1 => {
            return Err(CodecError::Truncated {
                offset: 1,
                needed: 1,
            })
        }
        CONTROL_SIZE => {}
        n => {
            return Err(CodecError::Oversized {
                declared: n,
                max: CONTROL_SIZE,
            })
        }
    }
    if buf[0] != tag {
        return Err(CodecError::UnknownType(buf[0]));
    }
    if buf[1] != magic {
        return Err(CodecError::BadMagic {
            expected: magic,
            found: buf[1],
        });
    }
    Ok(())
}

impl Invalidate {
    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        encode_control(TYPE_INVALIDATE, INVALIDATE_MAGIC, buf)
    }

    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        decode_control(TYPE_INVALIDATE, INVALIDATE_MAGIC, buf).map(|()| Invalidate)
    }
}

impl Shutdown {
    pub fn encode(&self, buf: &mut [u8]) -> CodecResult<usize> {
        encode_control(TYPE_SHUTDOWN, SHUTDOWN_MAGIC, buf)
    }

    pub fn decode(buf: &[u8]) -> CodecResult<Self> {
        decode_control(TYPE_SHUTDOWN, SHUTDOWN_MAGIC, buf).map(|()| Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_bytes() {
        let mut buf = [0u8; 4];
        assert_eq!(Invalidate.encode(&mut buf).expect("encode"), 2);
        assert_eq!(&buf[..2], &[0x03, 0x73]);
        assert_eq!(Shutdown.encode(&mut buf).expect("encode"), 2);
        assert_eq!(&buf[..2], &[0x02, 0x86]);
    }

    #[test]
    fn test_decode_valid() {
        assert_eq!(Invalidate::decode(&[0x03, 0x73]), Ok(Invalidate));
        assert_eq!(Shutdown::decode(&[0x02, 0x86]), Ok(Shutdown));
    }

    #[test]
    fn test_decode_wrong_magic() {
        assert_eq!(
            Shutdown::decode(&[0x02, 0x73]),
            Err(CodecError::BadMagic {
                expected: SHUTDOWN_MAGIC,
                found: 0x73
            })
        );
    }

    #[test]
    fn test_decode_wrong_length() {
        assert!(matches!(
            Invalidate::decode(&[0x03]),
            Err(CodecError::Truncated { .. })
        ));
        assert!(matches!(
            Invalidate::decode(&[0x03, 0x73, 0x00]),
            Err(CodecError::Oversized { .. })
        ));
    }

    #[test]
    fn test_encode_needs_two_bytes() {
        let mut buf = [0u8; 1];
        assert!(Shutdown.encode(&mut buf).is_err());
    }
}
