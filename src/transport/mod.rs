//! Transport sessions: framed request/response over a network channel,
//! advanced one bounded increment at a time.
//!
//! Sockets are non-blocking; a step performs at most one bounded syscall
//! (`STEP_CHUNK` bytes), so control returns to the caller promptly no matter
//! how large the response is. A session enforces a total-duration deadline
//! and reports `Timeout` once it expires.

mod http;
mod stream;

pub(crate) use http::HttpSession;
pub(crate) use stream::StreamSession;

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};

use crate::protocol::{DriverError, ResponseHead};

/// Transport kind, resolved from the server URL scheme at arm time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Http,
    Stream,
}

impl TransportKind {
    pub fn from_scheme(scheme: &str) -> Result<Self, DriverError> {
        match scheme {
            "http" => Ok(TransportKind::Http),
            "stream" => Ok(TransportKind::Stream),
            other => Err(DriverError::UnsupportedTransport(other.to_string())),
        }
    }
}

/// Session channel state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Unconnected,
    Connecting,
    Sending,
    Receiving,
    Closed,
}

/// Outcome of one bounded transport step.
#[derive(Debug)]
pub(crate) enum Step {
    /// The peer was not ready; no bytes moved.
    Pending,
    /// Some bounded progress was made.
    Progress,
    /// The full response has been assembled.
    Done(ResponseHead, Bytes),
}

/// One live network channel, owned exclusively by one connection.
pub(crate) trait TransportSession: Send {
    fn kind(&self) -> TransportKind;
    fn state(&self) -> ConnState;
    /// One bounded connect increment.
    fn connect_step(&mut self) -> Result<Step, DriverError>;
    /// One bounded outbound increment; flips the state to `Receiving` once
    /// the full request is on the wire.
    fn send_step(&mut self) -> Result<Step, DriverError>;
    /// One bounded inbound increment; yields `Step::Done` once a complete
    /// response has been assembled.
    fn recv_step(&mut self) -> Result<Step, DriverError>;
    /// Releases the underlying socket and buffers, valid mid-flight.
    fn close(&mut self);
}

/// Upper bound on bytes moved per step.
pub(crate) const STEP_CHUNK: usize = 8 * 1024;

/// Cap on the blocking window of a single connect attempt.
const CONNECT_STEP_CAP: Duration = Duration::from_millis(250);

/// Total-duration deadline for a session.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Deadline {
    start: Instant,
    total: Duration,
}

impl Deadline {
    pub(crate) fn new(total: Duration) -> Self {
        Self {
            start: Instant::now(),
            total,
        }
    }

    pub(crate) fn remaining(&self) -> Duration {
        self.total.saturating_sub(self.start.elapsed())
    }

    pub(crate) fn check(&self) -> Result<(), DriverError> {
        if self.start.elapsed() >= self.total {
            Err(DriverError::Timeout(self.total))
        } else {
            Ok(())
        }
    }
}

/// One bounded connect attempt. `Ok(None)` means the peer did not answer
/// within this step's window; the caller retries until the deadline expires.
pub(crate) fn connect_step(
    host: &str,
    port: u16,
    deadline: &Deadline,
) -> Result<Option<TcpStream>, DriverError> {
    deadline.check()?;
    let addr = (host, port)
        .to_socket_addrs()
        .map_err(|e| DriverError::Transport(format!("failed to resolve {host}:{port}: {e}")))?
        .next()
        .ok_or_else(|| DriverError::Transport(format!("no address for {host}:{port}")))?;
    let window = deadline.remaining().min(CONNECT_STEP_CAP);
    if window.is_zero() {
        return Ok(None);
    }
    match TcpStream::connect_timeout(&addr, window) {
        Ok(stream) => {
            stream
                .set_nodelay(true)
                .map_err(|e| DriverError::Transport(format!("failed to set TCP_NODELAY: {e}")))?;
            stream.set_nonblocking(true).map_err(|e| {
                DriverError::Transport(format!("failed to set non-blocking mode: {e}"))
            })?;
            Ok(Some(stream))
        }
        Err(e) if e.kind() == io::ErrorKind::TimedOut || e.kind() == io::ErrorKind::WouldBlock => {
            Ok(None)
        }
        Err(e) => Err(DriverError::Transport(format!(
            "failed to connect to {addr}: {e}"
        ))),
    }
}

/// Writes at most one chunk. `Ok(None)` means the socket was not writable.
pub(crate) fn write_chunk(
    stream: &mut TcpStream,
    buf: &[u8],
) -> Result<Option<usize>, DriverError> {
    let len = buf.len().min(STEP_CHUNK);
    match stream.write(&buf[..len]) {
        Ok(0) => Err(DriverError::Transport(
            "connection closed while sending".to_string(),
        )),
        Ok(n) => Ok(Some(n)),
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
            Ok(None)
        }
        Err(e) => Err(DriverError::Transport(format!("write failed: {e}"))),
    }
}

/// Reads at most one chunk into `into`. `Ok(None)` means the socket was not
/// readable; `Ok(Some(0))` is a clean end of stream.
pub(crate) fn read_chunk(
    stream: &mut TcpStream,
    into: &mut BytesMut,
) -> Result<Option<usize>, DriverError> {
    let mut chunk = [0u8; STEP_CHUNK];
    match stream.read(&mut chunk) {
        Ok(0) => Ok(Some(0)),
        Ok(n) => {
            into.extend_from_slice(&chunk[..n]);
            Ok(Some(n))
        }
        Err(e) if e.kind() == io::ErrorKind::WouldBlock || e.kind() == io::ErrorKind::Interrupted => {
            Ok(None)
        }
        Err(e) => Err(DriverError::Transport(format!("read failed: {e}"))),
    }
}
