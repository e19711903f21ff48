// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Handler-facing view of the exchange queues.

use super::message::{MessageBuffer, MessagePool};
use super::stats::ExchangeStats;
use crate::protocol::{CodecResult, Payload, MAX_DATAGRAM_SIZE};
use std::collections::VecDeque;
use std::net::SocketAddr;

/// Access to the inbound and outbound queues during one
/// [`MessageHandler::process_messages`](super::MessageHandler::process_messages) call.
///
/// Consumed inbound buffers are recycled by the exchange once the handler
/// returns; outbound buffers are flushed right after.
pub struct QueueControl<'a> {
    pub(crate) inbound: &'a mut VecDeque<MessageBuffer>,
    pub(crate) consumed: &'a mut Vec<MessageBuffer>,
    pub(crate) outbound: &'a mut VecDeque<MessageBuffer>,
    pub(crate) pool: &'a mut MessagePool,
    pub(crate) stats: &'a ExchangeStats,
}

impl<'a> QueueControl<'a> {
    /// Next decoded datagram and its sender.
    pub fn poll_inbound(&mut self) -> Option<(SocketAddr, Payload)> {
        while let Some(mut buf) = self.inbound.pop_front() {
            let item = buf.take_payload().zip(buf.remote());
            self.consumed.push(buf);
            if let Some((payload, remote)) = item {
                return Some((remote, payload));
            }
        }
        None
    }

    pub fn pending_inbound(&self) -> usize {
        self.inbound.len()
    }

    pub fn pending_outbound(&self) -> usize {
        self.outbound.len()
    }

    /// Queue `payload` for `to`. Returns `false` if it could not be encoded.
    pub fn send(&mut self, payload: &Payload, to: SocketAddr) -> bool {
        self.send_with(to, |buf| payload.encode(buf))
    }

    /// Queue a datagram for `to`, encoded in place into a pooled buffer.
    ///
    /// `encode` gets a buffer of [`MAX_DATAGRAM_SIZE`] bytes and returns the
    /// number of bytes written.
    pub fn send_with<F>(&mut self, to: SocketAddr, encode: F) -> bool
    where
        F: FnOnce(&mut [u8]) -> CodecResult<usize>,
    {
        let mut buf = self.pool.borrow();
        match encode(&mut buf.storage_mut()[..MAX_DATAGRAM_SIZE]) {
            Ok(len) => {
                buf.set_len(len);
                buf.set_remote(to);
                self.outbound.push_back(buf);
                true
            }
            Err(e) => {
                log::warn!("[exchange] dropping outbound payload for {}: {}", to, e);
                self.stats.record_submission_dropped();
                self.pool.recycle(buf);
                false
            }
        }
    }
}

/// Queue fixture for driving handlers without a socket.
#[cfg(test)]
pub(crate) struct TestQueues {
    pub inbound: VecDeque<MessageBuffer>,
    pub consumed: Vec<MessageBuffer>,
    pub outbound: VecDeque<MessageBuffer>,
    pub pool: MessagePool,
    pub stats: ExchangeStats,
}

#[cfg(test)]
impl TestQueues {
    pub fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            consumed: Vec::new(),
            outbound: VecDeque::new(),
            pool: MessagePool::new(16),
            stats: ExchangeStats::new(),
        }
    }

    pub fn push_inbound(&mut self, from: SocketAddr, payload: Payload) {
        let mut buf = self.pool.borrow();
        buf.set_remote(from);
        buf.set_payload(payload);
        self.inbound.push_back(buf);
    }

    pub fn control(&mut self) -> QueueControl<'_> {
        QueueControl {
            inbound: &mut self.inbound,
            consumed: &mut self.consumed,
            outbound: &mut self.outbound,
            pool: &mut self.pool,
            stats: &self.stats,
        }
    }

    /// Decode and drain everything queued for sending.
    pub fn take_outbound(&mut self) -> Vec<(SocketAddr, Payload)> {
        for buf in self.consumed.drain(..) {
            self.pool.recycle(buf);
        }
        let mut sent = Vec::new();
        while let Some(buf) = self.outbound.pop_front() {
            let payload = Payload::decode(buf.bytes()).expect("outbound payload should decode");
            sent.push((buf.remote().expect("outbound has a remote"), payload));
            self.pool.recycle(buf);
        }
        sent
    }
}
