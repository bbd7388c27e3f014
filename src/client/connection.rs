//! The connection execution state machine.
//!
//! A connection is configured through setters, frozen and resourced by
//! `set_buffer` (arming), then stepped by `run` until it reaches `Complete`
//! or `Failed`. In asynchronous mode every `run` call performs exactly one
//! bounded transport step and returns; runtime failures never surface as
//! errors from `run`, only through the `Failed` state.

use std::thread;
use std::time::Duration;

use bytes::Bytes;
use tracing::debug;

use crate::poll::Drive;
use crate::protocol::{DriverError, ResponseHead};
use crate::transport::{
    ConnState, HttpSession, Step, StreamSession, TransportKind, TransportSession,
};

use super::request::{HeaderOpts, RequestDescriptor, RequestTarget, Verb};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Idle,
    Configuring,
    Armed,
    Running,
    Complete,
    Failed,
}

/// A single-request execution primitive, reusable across sequential
/// requests via [`reset`](Connection::reset).
pub struct Connection {
    mode: Mode,
    target: Option<RequestTarget>,
    verb: Verb,
    headers: HeaderOpts,
    body: Option<Bytes>,
    asynchronous: bool,
    timeout: Duration,
    descriptor: Option<RequestDescriptor>,
    session: Option<Box<dyn TransportSession>>,
    result: Option<Bytes>,
    response: Option<ResponseHead>,
    error: Option<DriverError>,
}

impl Default for Connection {
    fn default() -> Self {
        Self::new()
    }
}

impl Connection {
    pub fn new() -> Self {
        Self {
            mode: Mode::Idle,
            target: None,
            verb: Verb::Get,
            headers: HeaderOpts::new(),
            body: None,
            asynchronous: false,
            timeout: DEFAULT_TIMEOUT,
            descriptor: None,
            session: None,
            result: None,
            response: None,
            error: None,
        }
    }

    /// Returns the connection to `Idle`, releasing the transport session and
    /// discarding descriptor, result and error. Idempotent; safe as the
    /// first call on a fresh connection.
    pub fn reset(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        self.target = None;
        self.verb = Verb::Get;
        self.headers = HeaderOpts::new();
        self.body = None;
        self.descriptor = None;
        self.result = None;
        self.response = None;
        self.error = None;
        self.mode = Mode::Idle;
        debug!("connection reset");
    }

    /// Guard for descriptor setters: configuration is frozen once armed.
    fn configuring(&mut self) -> Result<(), DriverError> {
        match self.mode {
            Mode::Idle => {
                self.mode = Mode::Configuring;
                Ok(())
            }
            Mode::Configuring => Ok(()),
            other => Err(DriverError::InvalidState(format!(
                "configuration is frozen in state {other:?}; call reset first"
            ))),
        }
    }

    /// Attaches the request target (server URL, database name, path).
    pub fn set_url(&mut self, target: RequestTarget) -> Result<(), DriverError> {
        self.configuring()?;
        self.target = Some(target);
        Ok(())
    }

    /// Merges header options into the request; last write wins per key,
    /// compared case-insensitively.
    pub fn set_header_opts(
        &mut self,
        opts: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), DriverError> {
        self.configuring()?;
        self.headers.merge(opts);
        Ok(())
    }

    /// Sets the request verb; overwrites any previously set verb. Switching
    /// to a verb that cannot carry a body drops any attached body.
    pub fn set_verb(&mut self, verb: Verb) -> Result<(), DriverError> {
        self.configuring()?;
        self.verb = verb;
        if !verb.carries_body() {
            self.body = None;
        }
        Ok(())
    }

    pub fn set_get(&mut self) -> Result<(), DriverError> {
        self.set_verb(Verb::Get)
    }

    pub fn set_post(&mut self) -> Result<(), DriverError> {
        self.set_verb(Verb::Post)
    }

    pub fn set_put(&mut self) -> Result<(), DriverError> {
        self.set_verb(Verb::Put)
    }

    pub fn set_delete(&mut self) -> Result<(), DriverError> {
        self.set_verb(Verb::Delete)
    }

    pub fn set_patch(&mut self) -> Result<(), DriverError> {
        self.set_verb(Verb::Patch)
    }

    pub fn set_head(&mut self) -> Result<(), DriverError> {
        self.set_verb(Verb::Head)
    }

    pub fn set_options(&mut self) -> Result<(), DriverError> {
        self.set_verb(Verb::Options)
    }

    /// Attaches the request payload. Valid only for body-bearing verbs;
    /// leaving it unset sends an empty body.
    pub fn set_body(&mut self, body: impl Into<Bytes>) -> Result<(), DriverError> {
        self.configuring()?;
        if !self.verb.carries_body() {
            return Err(DriverError::InvalidState(format!(
                "verb {} does not carry a request body",
                self.verb.as_str()
            )));
        }
        self.body = Some(body.into());
        Ok(())
    }

    /// Total-duration timeout for the armed session.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), DriverError> {
        self.configuring()?;
        self.timeout = timeout;
        Ok(())
    }

    /// Asynchronous mode: `run` performs one bounded step per call instead
    /// of looping to a terminal state. May be toggled until `run` starts.
    pub fn set_asynchronous(&mut self, asynchronous: bool) -> Result<(), DriverError> {
        match self.mode {
            Mode::Idle | Mode::Configuring | Mode::Armed => {
                self.asynchronous = asynchronous;
                Ok(())
            }
            other => Err(DriverError::InvalidState(format!(
                "cannot change scheduling mode in state {other:?}"
            ))),
        }
    }

    /// Arms the connection: validates descriptor completeness, freezes the
    /// configuration, resolves the transport kind from the URL scheme and
    /// allocates a fresh session and result buffer.
    pub fn set_buffer(&mut self) -> Result<(), DriverError> {
        match self.mode {
            Mode::Idle | Mode::Configuring => {}
            other => {
                return Err(DriverError::InvalidState(format!(
                    "cannot arm in state {other:?}; call reset first"
                )))
            }
        }
        let Some(target) = self.target.as_ref() else {
            return Err(DriverError::IncompleteRequest("serverUrl"));
        };
        let descriptor = RequestDescriptor::from_parts(
            target,
            self.verb,
            self.headers.clone(),
            self.body.clone(),
        )?;
        let kind = TransportKind::from_scheme(descriptor.server_url().scheme())?;
        let session: Box<dyn TransportSession> = match kind {
            TransportKind::Http => Box::new(HttpSession::new(&descriptor, self.timeout)),
            TransportKind::Stream => Box::new(StreamSession::new(&descriptor, self.timeout)?),
        };
        self.result = None;
        self.response = None;
        self.error = None;
        self.descriptor = Some(descriptor);
        self.session = Some(session);
        self.mode = Mode::Armed;
        debug!(kind = ?kind, "connection armed");
        Ok(())
    }

    /// Executes the armed request.
    ///
    /// In synchronous mode this loops bounded steps until a terminal state
    /// is reached. In asynchronous mode it performs exactly one bounded
    /// step and returns; the caller polls again while
    /// [`is_running`](Connection::is_running) reports `true`. Transport
    /// failures are never returned from `run`; they land in the `Failed`
    /// state.
    pub fn run(&mut self) -> Result<(), DriverError> {
        match self.mode {
            Mode::Armed => {
                self.mode = Mode::Running;
                debug!("connection running");
            }
            Mode::Running => {}
            other => {
                return Err(DriverError::InvalidState(format!(
                    "run called in state {other:?}"
                )))
            }
        }
        if self.asynchronous {
            self.step();
        } else {
            loop {
                let progressed = self.step();
                if self.mode != Mode::Running {
                    break;
                }
                if !progressed {
                    thread::yield_now();
                }
            }
        }
        Ok(())
    }

    /// True iff a `run` loop is still in flight.
    pub fn is_running(&self) -> bool {
        self.mode == Mode::Running
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// The raw result buffer. Only available once the connection reports
    /// `Complete`; the buffer is immutable from that point on.
    pub fn result(&self) -> Result<Bytes, DriverError> {
        match (&self.mode, &self.result) {
            (Mode::Complete, Some(buffer)) => Ok(buffer.clone()),
            _ => Err(DriverError::NotReady),
        }
    }

    /// Status and header metadata retained alongside the result buffer.
    pub fn response(&self) -> Option<&ResponseHead> {
        self.response.as_ref()
    }

    /// The failure recorded when the connection reached `Failed`.
    pub fn error(&self) -> Option<&DriverError> {
        self.error.as_ref()
    }

    /// The frozen request descriptor, present from arming until `reset`.
    pub fn descriptor(&self) -> Option<&RequestDescriptor> {
        self.descriptor.as_ref()
    }

    /// Future that polls this connection to a terminal state, yielding to
    /// the executor between steps.
    pub fn drive(&mut self) -> Drive<'_> {
        Drive::new(self)
    }

    /// One bounded step. Returns whether any forward progress was made.
    fn step(&mut self) -> bool {
        let Some(session) = self.session.as_mut() else {
            self.fail(DriverError::InvalidState(
                "running without a transport session".to_string(),
            ));
            return true;
        };
        let outcome = match session.state() {
            ConnState::Unconnected | ConnState::Connecting => session.connect_step(),
            ConnState::Sending => session.send_step(),
            ConnState::Receiving => session.recv_step(),
            ConnState::Closed => Err(DriverError::Transport(
                "session closed while running".to_string(),
            )),
        };
        match outcome {
            Ok(Step::Done(head, body)) => {
                self.finish(head, body);
                true
            }
            Ok(Step::Progress) => true,
            Ok(Step::Pending) => false,
            Err(err) => {
                self.fail(err);
                true
            }
        }
    }

    fn finish(&mut self, head: ResponseHead, body: Bytes) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        if head.is_success() {
            debug!(status = head.status, len = body.len(), "request complete");
            self.response = Some(head);
            self.result = Some(body);
            self.mode = Mode::Complete;
        } else {
            let status = head.status;
            self.response = Some(head);
            self.fail(DriverError::Server { status, body });
        }
    }

    fn fail(&mut self, err: DriverError) {
        if let Some(mut session) = self.session.take() {
            session.close();
        }
        debug!(error = %err, "request failed");
        self.error = Some(err);
        self.mode = Mode::Failed;
    }

    #[cfg(test)]
    pub(crate) fn arm_with_session(&mut self, session: Box<dyn TransportSession>) {
        self.session = Some(session);
        self.mode = Mode::Armed;
    }
}
