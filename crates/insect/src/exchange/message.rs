// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Pooled datagram buffer.

use crate::protocol::{Payload, MAX_DATAGRAM_SIZE};
use crate::rt::{Pool, Recyclable};
use std::net::SocketAddr;

/// One spare byte so an oversized datagram is detected instead of silently truncated.
pub(crate) const RECV_BUFFER_SIZE: usize = MAX_DATAGRAM_SIZE + 1;

/// Fixed-size datagram buffer with its decoded payload and peer address.
///
/// Borrowed from the [`MessagePool`] for exactly one receive or send cycle.
pub struct MessageBuffer {
    data: Box<[u8]>,
    len: usize,
    payload: Option<Payload>,
    remote: Option<SocketAddr>,
}

impl MessageBuffer {
    pub(crate) fn storage_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub(crate) fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn remote(&self) -> Option<SocketAddr> {
        self.remote
    }

    pub(crate) fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = Some(remote);
    }

    pub(crate) fn set_payload(&mut self, payload: Payload) {
        self.payload = Some(payload);
    }

    pub(crate) fn take_payload(&mut self) -> Option<Payload> {
        self.payload.take()
    }
}

impl Recyclable for MessageBuffer {
    fn allocate() -> Self {
        Self {
            data: vec![0u8; RECV_BUFFER_SIZE].into_boxed_slice(),
            len: 0,
            payload: None,
            remote: None,
        }
    }

    fn reset(&mut self) {
        self.len = 0;
        self.payload = None;
        self.remote = None;
    }
}

/// Pool of datagram buffers owned by the exchange thread.
pub type MessagePool = Pool<MessageBuffer>;

/// Payload handed to the exchange from another thread.
#[derive(Debug)]
pub(crate) struct Submission {
    pub payload: Payload,
    pub to: SocketAddr,
}
