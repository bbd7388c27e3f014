//! Cooperative polling of connections.
//!
//! Two renditions of the same loop: [`PollDriver`] for blocking callers,
//! yielding the thread between steps, and [`Drive`] for async callers,
//! yielding to the executor between steps. Both re-invoke
//! [`Connection::run`] until [`Connection::is_running`] reports `false`;
//! failures are then read from the connection state, not from the driver.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::thread;
use std::time::Duration;

use crate::client::Connection;
use crate::protocol::DriverError;

/// Blocking cooperative scheduler for one or more connections.
#[derive(Debug, Clone)]
pub struct PollDriver {
    idle_wait: Duration,
}

impl Default for PollDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl PollDriver {
    pub fn new() -> Self {
        Self {
            idle_wait: Duration::ZERO,
        }
    }

    /// Parks the thread for `idle_wait` between polls instead of a bare
    /// yield, trading latency for CPU.
    pub fn with_idle_wait(idle_wait: Duration) -> Self {
        Self { idle_wait }
    }

    /// Polls one connection until it leaves the running state. Returns
    /// `Err` only on API misuse; transport failures are reported through
    /// the connection's `Failed` state.
    pub fn drive(&self, conn: &mut Connection) -> Result<(), DriverError> {
        loop {
            conn.run()?;
            if !conn.is_running() {
                return Ok(());
            }
            self.pause();
        }
    }

    /// Round-robins a set of armed connections so each makes interleaved
    /// progress, until none is running.
    pub fn drive_all(&self, conns: &mut [Connection]) -> Result<(), DriverError> {
        loop {
            let mut any_running = false;
            for conn in conns.iter_mut() {
                if conn.is_running() || conn.mode() == crate::client::Mode::Armed {
                    conn.run()?;
                    any_running |= conn.is_running();
                }
            }
            if !any_running {
                return Ok(());
            }
            self.pause();
        }
    }

    fn pause(&self) {
        if self.idle_wait.is_zero() {
            thread::yield_now();
        } else {
            thread::sleep(self.idle_wait);
        }
    }
}

/// Future returned by [`Connection::drive`]: performs one bounded step per
/// poll and reschedules itself until the connection reaches a terminal
/// state. Runtime-agnostic; it never blocks the executor.
pub struct Drive<'a> {
    conn: &'a mut Connection,
}

impl<'a> Drive<'a> {
    pub(crate) fn new(conn: &'a mut Connection) -> Self {
        Self { conn }
    }
}

impl Future for Drive<'_> {
    type Output = Result<(), DriverError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if let Err(err) = this.conn.run() {
            return Poll::Ready(Err(err));
        }
        if this.conn.is_running() {
            cx.waker().wake_by_ref();
            Poll::Pending
        } else {
            Poll::Ready(Ok(()))
        }
    }
}
