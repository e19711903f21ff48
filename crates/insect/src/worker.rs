// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Background worker threads with bounded start-up and shutdown.
//!
//! `spawn` returns once the body called [`WorkerContext::mark_running`] (or
//! the start-up bound elapsed). `stop` interrupts cooperatively and waits a
//! bounded time for the thread to exit; a thread that does not exit is
//! reported, never killed.

use crate::error::{Error, Result};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle, Thread};
use std::time::{Duration, Instant};

/// Handed to the worker body.
pub struct WorkerContext {
    name: String,
    started_tx: Sender<()>,
    interrupted: Arc<AtomicBool>,
}

impl WorkerContext {
    /// Signal the spawning thread that start-up is complete.
    pub fn mark_running(&self) {
        // The spawner may have given up already; that is fine.
        let _ = self.started_tx.try_send(());
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::Acquire)
    }

    /// Sleep up to `duration`. Returns `false` if interrupted.
    ///
    /// A duration too large for an `Instant` sleeps until interrupted.
    pub fn park_interruptibly(&self, duration: Duration) -> bool {
        let deadline = Instant::now().checked_add(duration);
        loop {
            if self.is_interrupted() {
                return false;
            }
            match deadline {
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return true;
                    }
                    thread::park_timeout(deadline - now);
                }
                None => thread::park(),
            }
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Sends the exit signal when the worker thread unwinds or returns.
struct ExitGuard(Sender<()>);

impl Drop for ExitGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

type InterruptHook = Box<dyn Fn() + Send + Sync>;

/// Handle to a running worker thread.
pub struct Worker {
    name: String,
    interrupted: Arc<AtomicBool>,
    exit_rx: Receiver<()>,
    thread: Thread,
    join: Option<JoinHandle<()>>,
    on_interrupt: Option<InterruptHook>,
    exited: bool,
}

impl Worker {
    /// Spawn `body` on a thread named `name` and wait until it reports running.
    pub fn spawn<F>(name: &str, startup_timeout: Duration, body: F) -> Result<Self>
    where
        F: FnOnce(WorkerContext) + Send + 'static,
    {
        let (started_tx, started_rx) = bounded(1);
        let (exit_tx, exit_rx) = bounded(1);
        let interrupted = Arc::new(AtomicBool::new(false));

        let context = WorkerContext {
            name: name.to_string(),
            started_tx,
            interrupted: Arc::clone(&interrupted),
        };

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _exit = ExitGuard(exit_tx);
                body(context);
            })
            .map_err(|e| Error::SpawnFailed(format!("{}: {}", name, e)))?;

        match started_rx.recv_timeout(startup_timeout) {
            Ok(()) => log::debug!("[worker] {} running", name),
            Err(RecvTimeoutError::Timeout) => log::warn!(
                "[worker] {} did not report running within {:?}, continuing",
                name,
                startup_timeout
            ),
            Err(RecvTimeoutError::Disconnected) => {
                log::warn!("[worker] {} exited before reporting running", name)
            }
        }

        Ok(Self {
            name: name.to_string(),
            interrupted,
            exit_rx,
            thread: join.thread().clone(),
            join: Some(join),
            on_interrupt: None,
            exited: false,
        })
    }

    /// Extra action run on interrupt (e.g. shutting down an exchange).
    pub fn with_interrupt_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_interrupt = Some(Box::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the thread has not exited yet.
    pub fn is_alive(&self) -> bool {
        !self.exited && self.join.as_ref().map(|j| !j.is_finished()).unwrap_or(false)
    }

    /// Cooperative interruption: flag, unpark, hook.
    pub fn interrupt(&self) {
        self.interrupted.store(true, Ordering::Release);
        self.thread.unpark();
        if let Some(hook) = &self.on_interrupt {
            hook();
        }
    }

    /// Interrupt and wait up to `timeout`. Returns `true` if the thread terminated.
    pub fn stop(&mut self, timeout: Duration) -> bool {
        if self.exited {
            return true;
        }
        self.interrupt();

        match self.exit_rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if let Some(join) = self.join.take() {
                    if join.join().is_err() {
                        log::warn!("[worker] {} panicked", self.name);
                    }
                }
                self.exited = true;
                log::debug!("[worker] {} stopped", self.name);
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "[worker] {} did not terminate within {:?}, leaving it detached",
                    self.name,
                    timeout
                );
                false
            }
        }
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        if !self.exited && self.join.is_some() {
            self.interrupt();
        }
    }
}
