// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Single-threaded UDP message exchange.
//!
//! One non-blocking socket and one `mio::Poll` per participant. The loop
//! owns the buffer pool and both queues; other threads reach it only
//! through an [`ExchangeHandle`] (channel + waker).
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------------------------+
//! |                      MessageExchange                           |
//! |                                                                |
//! |   ExchangeHandle::send --> submissions --+                     |
//! |                                          v                     |
//! |   +-----------+   process_messages   +----------+              |
//! |   |  inbound  | -------------------> | outbound |              |
//! |   +-----------+    (role handler)    +----------+              |
//! |         ^                                  |                   |
//! |         |   recv_from        send_to       v                   |
//! |   +---------------------------------------------------------+  |
//! |   |          mio::Poll (UdpSocket + Waker)                  |  |
//! |   +---------------------------------------------------------+  |
//! +---------------------------------------------------------------+
//! ```
//!
//! Each iteration: drain submissions, run the handler, recycle consumed
//! inbound buffers, flush outbound, update the interest set, poll, then
//! alternate receive and send until both would block or the batch cap is hit.

pub mod message;
pub mod queue;
pub mod stats;

mod error_log;

pub use message::{MessageBuffer, MessagePool};
pub use queue::QueueControl;
pub use stats::{ExchangeStats, ExchangeStatsSnapshot};

use crate::config::InsectConfig;
use crate::error::{Error, Result};
use crate::protocol::{Payload, MAX_DATAGRAM_SIZE};
use error_log::ErrorDeduper;
use message::Submission;

use crossbeam::channel::{unbounded, Receiver, Sender};
use mio::net::UdpSocket;
use mio::{Events, Interest, Poll, Token, Waker};
use socket2::{Domain, Protocol, Socket, Type};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Constants
// ============================================================================

/// Token for the UDP socket
const SOCKET_TOKEN: Token = Token(0);

/// Token for the waker (cross-thread submissions, shutdown)
const WAKER_TOKEN: Token = Token(1);

/// Maximum events to process per poll
const MAX_EVENTS: usize = 64;

/// Receive/send steps per iteration before yielding back to the handler
const MAX_BATCH: usize = 256;

/// Upper bound on the pause after consecutive poll failures
const MAX_POLL_BACKOFF: Duration = Duration::from_millis(100);

// ============================================================================
// Handler and state
// ============================================================================

/// Role logic driven by the exchange thread.
pub trait MessageHandler {
    /// Drain inbound messages, queue outbound ones, and return the longest
    /// the loop may wait before calling again.
    fn process_messages(&mut self, queue: &mut QueueControl<'_>) -> Duration;

    /// Last chance to queue datagrams before the socket closes.
    fn on_shutdown(&mut self, _queue: &mut QueueControl<'_>) {}
}

/// Exchange lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ExchangeState {
    NotStarted = 0,
    Running = 1,
    ShuttingDown = 2,
    Stopped = 3,
}

impl ExchangeState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ExchangeState::NotStarted,
            1 => ExchangeState::Running,
            2 => ExchangeState::ShuttingDown,
            _ => ExchangeState::Stopped,
        }
    }
}

// ============================================================================
// Exchange Handle
// ============================================================================

/// Thread-safe handle to a [`MessageExchange`].
#[derive(Clone)]
pub struct ExchangeHandle {
    submit_tx: Sender<Submission>,
    waker: Arc<Waker>,
    state: Arc<AtomicU8>,
    local_addr: SocketAddr,
    stats: Arc<ExchangeStats>,
}

impl ExchangeHandle {
    /// Queue `payload` for `to` from any thread.
    pub fn send(&self, payload: Payload, to: SocketAddr) -> Result<()> {
        match self.state() {
            ExchangeState::NotStarted | ExchangeState::Running => {}
            state => {
                self.stats.record_submission_dropped();
                return Err(Error::InvalidState(format!("exchange is {:?}", state)));
            }
        }
        self.submit_tx
            .send(Submission { payload, to })
            .map_err(|_| Error::InvalidState("exchange loop is gone".to_string()))?;
        self.waker.wake()?;
        Ok(())
    }

    /// Ask the loop to exit. Returns `false` if it was already stopping.
    pub fn shutdown(&self) -> bool {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let next = match ExchangeState::from_u8(current) {
                ExchangeState::NotStarted => ExchangeState::Stopped,
                ExchangeState::Running => ExchangeState::ShuttingDown,
                _ => return false,
            };
            match self.state.compare_exchange(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        if let Err(e) = self.waker.wake() {
            log::debug!("[exchange] waker failed during shutdown: {}", e);
        }
        true
    }

    pub fn state(&self) -> ExchangeState {
        ExchangeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> Arc<ExchangeStats> {
        Arc::clone(&self.stats)
    }
}

impl std::fmt::Debug for ExchangeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExchangeHandle")
            .field("local_addr", &self.local_addr)
            .field("state", &self.state())
            .finish()
    }
}

// ============================================================================
// Message Exchange
// ============================================================================

/// Event loop state. Created bound, run on a dedicated thread.
pub struct MessageExchange {
    poll: Poll,
    socket: UdpSocket,
    interest: Interest,
    submit_rx: Receiver<Submission>,
    state: Arc<AtomicU8>,
    stats: Arc<ExchangeStats>,

    pool: MessagePool,
    inbound: VecDeque<MessageBuffer>,
    consumed: Vec<MessageBuffer>,
    outbound: VecDeque<MessageBuffer>,

    recv_errors: ErrorDeduper,
    send_errors: ErrorDeduper,
    malformed: ErrorDeduper,
    poll_errors: ErrorDeduper,
}

impl MessageExchange {
    /// Bind the socket and register it with a new poll.
    pub fn bind(config: &InsectConfig) -> Result<(Self, ExchangeHandle)> {
        let std_socket = create_socket(config.bind, config.socket_buffer_size)
            .map_err(|e| Error::BindFailed(format!("{}: {}", config.bind, e)))?;
        let local_addr = std_socket.local_addr()?;
        let mut socket = UdpSocket::from_std(std_socket);

        let poll = Poll::new()?;
        poll.registry()
            .register(&mut socket, SOCKET_TOKEN, Interest::READABLE)?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);

        let (submit_tx, submit_rx) = unbounded();
        let state = Arc::new(AtomicU8::new(ExchangeState::NotStarted as u8));
        let stats = Arc::new(ExchangeStats::new());

        log::debug!("[exchange] bound to {}", local_addr);

        let exchange = Self {
            poll,
            socket,
            interest: Interest::READABLE,
            submit_rx,
            state: Arc::clone(&state),
            stats: Arc::clone(&stats),
            pool: MessagePool::new(config.pool_capacity),
            inbound: VecDeque::new(),
            consumed: Vec::new(),
            outbound: VecDeque::new(),
            recv_errors: ErrorDeduper::new("receive failed", log::Level::Warn),
            send_errors: ErrorDeduper::new("send failed", log::Level::Warn),
            malformed: ErrorDeduper::new("malformed datagram", log::Level::Debug),
            poll_errors: ErrorDeduper::new("poll failed", log::Level::Error),
        };

        let handle = ExchangeHandle {
            submit_tx,
            waker,
            state,
            local_addr,
            stats,
        };

        Ok((exchange, handle))
    }

    pub fn state(&self) -> ExchangeState {
        ExchangeState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Run the loop until shutdown. `on_running` fires once the loop owns
    /// the `Running` state. A second call is a no-op.
    pub fn run<H: MessageHandler>(&mut self, handler: &mut H, on_running: impl FnOnce()) {
        if self
            .state
            .compare_exchange(
                ExchangeState::NotStarted as u8,
                ExchangeState::Running as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            log::debug!("[exchange] run() ignored in state {:?}", self.state());
            return;
        }
        on_running();
        log::info!("[exchange] running on {:?}", self.socket.local_addr().ok());

        let mut events = Events::with_capacity(MAX_EVENTS);
        let mut rx_pending = false;
        let mut poll_failures = 0u32;

        while self.state() == ExchangeState::Running {
            self.drain_submissions();

            let timeout = handler.process_messages(&mut self.queue_control());
            self.recycle_consumed();
            self.flush_outbound();
            self.update_interest();
            self.stats.mirror_pool(self.pool.stats());

            let poll_timeout = if rx_pending { Duration::ZERO } else { timeout };
            if let Err(e) = self.poll.poll(&mut events, Some(poll_timeout)) {
                if e.kind() != io::ErrorKind::Interrupted {
                    self.poll_errors.report(e.to_string());
                    poll_failures = poll_failures.saturating_add(1);
                    std::thread::sleep(poll_backoff(poll_failures));
                }
                continue;
            }
            poll_failures = 0;

            let mut readable = rx_pending;
            let mut writable = false;
            for event in events.iter() {
                if event.token() == SOCKET_TOKEN {
                    readable |= event.is_readable();
                    writable |= event.is_writable();
                }
            }

            rx_pending = self.pump(readable, writable);
        }

        // Best effort: let the handler say goodbye, then flush once.
        self.drain_submissions();
        handler.on_shutdown(&mut self.queue_control());
        self.flush_outbound();
        self.recv_errors.flush();
        self.send_errors.flush();
        self.malformed.flush();
        self.poll_errors.flush();

        self.outbound.clear();
        self.inbound.clear();
        if let Err(e) = self.poll.registry().deregister(&mut self.socket) {
            log::debug!("[exchange] deregister failed: {}", e);
        }
        self.state
            .store(ExchangeState::Stopped as u8, Ordering::Release);
        log::info!("[exchange] stopped");
    }

    fn queue_control(&mut self) -> QueueControl<'_> {
        QueueControl {
            inbound: &mut self.inbound,
            consumed: &mut self.consumed,
            outbound: &mut self.outbound,
            pool: &mut self.pool,
            stats: &self.stats,
        }
    }

    fn drain_submissions(&mut self) {
        while let Ok(Submission { payload, to }) = self.submit_rx.try_recv() {
            self.queue_control().send(&payload, to);
        }
    }

    fn recycle_consumed(&mut self) {
        for buf in self.consumed.drain(..) {
            self.pool.recycle(buf);
        }
    }

    fn update_interest(&mut self) {
        let wanted = if self.outbound.is_empty() {
            Interest::READABLE
        } else {
            Interest::READABLE | Interest::WRITABLE
        };
        if wanted == self.interest {
            return;
        }
        match self
            .poll
            .registry()
            .reregister(&mut self.socket, SOCKET_TOKEN, wanted)
        {
            Ok(()) => self.interest = wanted,
            Err(e) => log::error!("[exchange] reregister failed: {}", e),
        }
    }

    /// Send until the queue is empty or the socket would block.
    fn flush_outbound(&mut self) {
        while !self.outbound.is_empty() {
            if !self.send_one() {
                break;
            }
        }
    }

    /// Alternate receive and send. Returns `true` if reading stopped at the
    /// batch cap with data possibly still pending.
    fn pump(&mut self, mut readable: bool, mut writable: bool) -> bool {
        writable |= !self.outbound.is_empty();
        for _ in 0..MAX_BATCH {
            let mut progressed = false;
            if readable {
                if self.receive_one() {
                    progressed = true;
                } else {
                    readable = false;
                }
            }
            if writable {
                if !self.outbound.is_empty() && self.send_one() {
                    progressed = true;
                } else {
                    writable = false;
                }
            }
            if !progressed {
                return false;
            }
        }
        readable
    }

    /// Receive one datagram. Returns `false` once the socket would block.
    fn receive_one(&mut self) -> bool {
        let mut buf = self.pool.borrow();
        let (len, from) = match self.socket.recv_from(buf.storage_mut()) {
            Ok(received) => received,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.pool.recycle(buf);
                return false;
            }
            Err(e) => {
                self.pool.recycle(buf);
                if e.kind() != io::ErrorKind::Interrupted {
                    self.stats.record_receive_error();
                    self.recv_errors.report(e.to_string());
                }
                return true;
            }
        };

        if len > MAX_DATAGRAM_SIZE {
            self.stats.record_malformed();
            self.malformed
                .report(format!("{} sent more than {} bytes", from, MAX_DATAGRAM_SIZE));
            self.pool.recycle(buf);
            return true;
        }

        buf.set_len(len);
        match Payload::decode(buf.bytes()) {
            Ok(payload) => {
                buf.set_remote(from);
                buf.set_payload(payload);
                self.inbound.push_back(buf);
                self.stats.record_received();
            }
            Err(e) => {
                self.stats.record_malformed();
                self.malformed.report(format!("from {}: {}", from, e));
                self.pool.recycle(buf);
            }
        }
        true
    }

    /// Send the head of the outbound queue. Returns `false` if the socket would block.
    fn send_one(&mut self) -> bool {
        let Some(buf) = self.outbound.pop_front() else {
            return false;
        };
        let Some(to) = buf.remote() else {
            self.pool.recycle(buf);
            return true;
        };
        match self.socket.send_to(buf.bytes(), to) {
            Ok(_) => {
                self.stats.record_sent();
                self.pool.recycle(buf);
                true
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                self.outbound.push_front(buf);
                false
            }
            Err(e) => {
                self.stats.record_send_error();
                self.send_errors.report(format!("to {}: {}", to, e));
                self.pool.recycle(buf);
                true
            }
        }
    }
}

/// Pause after the `failures`-th consecutive poll error: 1ms doubling up to
/// [`MAX_POLL_BACKOFF`].
fn poll_backoff(failures: u32) -> Duration {
    let shift = failures.saturating_sub(1).min(16);
    Duration::from_millis(1u64 << shift).min(MAX_POLL_BACKOFF)
}

/// Create the non-blocking UDP socket with SO_REUSEADDR and enlarged buffers.
fn create_socket(bind: SocketAddr, buffer_size: usize) -> io::Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::for_address(bind), Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    if buffer_size > 0 {
        if let Err(e) = socket.set_recv_buffer_size(buffer_size) {
            log::debug!("[exchange] SO_RCVBUF {} rejected: {}", buffer_size, e);
        }
        if let Err(e) = socket.set_send_buffer_size(buffer_size) {
            log::debug!("[exchange] SO_SNDBUF {} rejected: {}", buffer_size, e);
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&bind.into())?;
    Ok(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Invalidate, Mapping, Shutdown};
    use std::net::UdpSocket as StdUdpSocket;
    use std::thread;

    /// Replies to every datagram with the same payload and counts calls.
    struct Echo {
        calls: usize,
    }

    impl MessageHandler for Echo {
        fn process_messages(&mut self, queue: &mut QueueControl<'_>) -> Duration {
            self.calls += 1;
            while let Some((from, payload)) = queue.poll_inbound() {
                queue.send(&payload, from);
            }
            Duration::from_millis(50)
        }

        fn on_shutdown(&mut self, _queue: &mut QueueControl<'_>) {}
    }

    fn loopback_config() -> InsectConfig {
        InsectConfig::new("127.0.0.1:0".parse().expect("addr"))
    }

    fn start_echo() -> (ExchangeHandle, thread::JoinHandle<MessageExchange>) {
        let (mut exchange, handle) = MessageExchange::bind(&loopback_config()).expect("bind");
        let (ready_tx, ready_rx) = crossbeam::channel::bounded(1);
        let join = thread::spawn(move || {
            let mut echo = Echo { calls: 0 };
            exchange.run(&mut echo, move || {
                let _ = ready_tx.send(());
            });
            exchange
        });
        ready_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("exchange should start");
        (handle, join)
    }

    fn client() -> StdUdpSocket {
        let socket = StdUdpSocket::bind("127.0.0.1:0").expect("client bind");
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .expect("timeout");
        socket
    }

    #[test]
    fn test_poll_backoff_grows_then_caps() {
        assert_eq!(poll_backoff(1), Duration::from_millis(1));
        assert_eq!(poll_backoff(2), Duration::from_millis(2));
        assert_eq!(poll_backoff(5), Duration::from_millis(16));
        assert_eq!(poll_backoff(8), MAX_POLL_BACKOFF);
        assert_eq!(poll_backoff(u32::MAX), MAX_POLL_BACKOFF);
    }

    #[test]
    fn test_echo_roundtrip() {
        let (handle, join) = start_echo();
        assert_eq!(handle.state(), ExchangeState::Running);

        let socket = client();
        let mapping = Payload::Mapping(Mapping::announcement("/echo", "127.0.0.1", 1, 7));
        socket
            .send_to(&mapping.to_vec().expect("encode"), handle.local_addr())
            .expect("send");

        let mut buf = [0u8; MAX_DATAGRAM_SIZE];
        let (len, from) = socket.recv_from(&mut buf).expect("reply");
        assert_eq!(from, handle.local_addr());
        assert_eq!(Payload::decode(&buf[..len]).expect("decode"), mapping);

        assert!(handle.shutdown());
        let exchange = join.join().expect("exchange thread");
        assert_eq!(exchange.state(), ExchangeState::Stopped);

        let stats = handle.stats().snapshot();
        assert_eq!(stats.received, 1);
        assert_eq!(stats.sent, 1);
    }

    #[test]
    fn test_malformed_datagram_is_dropped() {
        let (handle, join) = start_echo();
        let socket = client();

        socket
            .send_to(&[0x03, 0x00], handle.local_addr())
            .expect("send bad magic");
        socket
            .send_to(&[0x02, 0x86], handle.local_addr())
            .expect("send shutdown");

        // Only the valid one comes back
        let mut buf = [0u8; 16];
        let (len, _) = socket.recv_from(&mut buf).expect("reply");
        assert_eq!(Payload::decode(&buf[..len]), Ok(Payload::Shutdown(Shutdown)));

        handle.shutdown();
        join.join().expect("exchange thread");
        let stats = handle.stats().snapshot();
        assert_eq!(stats.malformed, 1);
        assert_eq!(stats.received, 1);
    }

    #[test]
    fn test_cross_thread_send() {
        let (handle, join) = start_echo();
        let socket = client();
        let target = socket.local_addr().expect("addr");

        let sender = handle.clone();
        thread::spawn(move || {
            sender
                .send(Payload::Invalidate(Invalidate), target)
                .expect("submit");
        })
        .join()
        .expect("sender thread");

        let mut buf = [0u8; 16];
        let (len, _) = socket.recv_from(&mut buf).expect("datagram");
        assert_eq!(&buf[..len], &[0x03, 0x73]);

        handle.shutdown();
        join.join().expect("exchange thread");
    }

    #[test]
    fn test_second_run_is_noop() {
        let (handle, join) = start_echo();
        handle.shutdown();
        let mut exchange = join.join().expect("exchange thread");

        let mut called = false;
        let mut echo = Echo { calls: 0 };
        exchange.run(&mut echo, || called = true);
        assert!(!called);
        assert_eq!(echo.calls, 0);
        assert_eq!(exchange.state(), ExchangeState::Stopped);
    }

    #[test]
    fn test_send_after_shutdown_is_rejected() {
        let (handle, join) = start_echo();
        handle.shutdown();
        join.join().expect("exchange thread");

        let err = handle
            .send(Payload::Shutdown(Shutdown), "127.0.0.1:9".parse().expect("addr"))
            .expect_err("stopped exchange");
        assert!(matches!(err, Error::InvalidState(_)));
        assert!(!handle.shutdown());
    }

    #[test]
    fn test_shutdown_before_run() {
        let (mut exchange, handle) = MessageExchange::bind(&loopback_config()).expect("bind");
        assert_eq!(handle.state(), ExchangeState::NotStarted);
        assert!(handle.shutdown());
        assert_eq!(handle.state(), ExchangeState::Stopped);

        let mut echo = Echo { calls: 0 };
        exchange.run(&mut echo, || {});
        assert_eq!(echo.calls, 0);
    }

    #[test]
    fn test_handler_timeout_drives_periodic_calls() {
        let (mut exchange, handle) = MessageExchange::bind(&loopback_config()).expect("bind");
        let join = thread::spawn(move || {
            let mut echo = Echo { calls: 0 };
            exchange.run(&mut echo, || {});
            echo.calls
        });
        thread::sleep(Duration::from_millis(300));
        handle.shutdown();
        let calls = join.join().expect("exchange thread");
        // 50 ms ticks over ~300 ms, with generous slack for slow CI
        assert!(calls >= 2, "handler called {} times", calls);
    }
}
