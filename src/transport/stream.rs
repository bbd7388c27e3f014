//! Persistent stream transport session.
//!
//! Opens with the protocol magic preamble, then exchanges length-prefixed
//! MessagePack envelopes (`WireRequest`/`WireResponse`). The channel could
//! multiplex many logical requests; a session only carries the single
//! request it was armed with.

use std::net::TcpStream;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::client::RequestDescriptor;
use crate::protocol::{
    codec, DriverError, ResponseHead, WireRequest, WireResponse, MAX_MESSAGE_SIZE, STREAM_MAGIC,
};

use super::{
    connect_step, read_chunk, write_chunk, ConnState, Deadline, Step, TransportKind,
    TransportSession,
};

pub(crate) struct StreamSession {
    host: String,
    port: u16,
    state: ConnState,
    stream: Option<TcpStream>,
    out: Bytes,
    sent: usize,
    inbuf: BytesMut,
    deadline: Deadline,
}

impl StreamSession {
    pub(crate) fn new(desc: &RequestDescriptor, timeout: Duration) -> Result<Self, DriverError> {
        let request = WireRequest {
            verb: desc.verb().as_str().to_string(),
            path: desc.wire_path(),
            headers: desc
                .headers()
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            body: desc.body().map(|b| b.to_vec()).unwrap_or_default(),
        };
        let payload = codec::encode(&request)?;
        if payload.len() > MAX_MESSAGE_SIZE {
            return Err(DriverError::MessageTooLarge(payload.len()));
        }
        let mut out = BytesMut::with_capacity(STREAM_MAGIC.len() + 4 + payload.len());
        out.extend_from_slice(STREAM_MAGIC);
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(&payload);
        Ok(Self {
            host: desc.server_url().host().to_string(),
            port: desc.server_url().port(),
            state: ConnState::Unconnected,
            stream: None,
            out: out.freeze(),
            sent: 0,
            inbuf: BytesMut::new(),
            deadline: Deadline::new(timeout),
        })
    }

    /// Tries to lift a complete response frame out of the inbound buffer.
    fn try_decode(&mut self) -> Result<Option<(ResponseHead, Bytes)>, DriverError> {
        if self.inbuf.len() < 4 {
            return Ok(None);
        }
        let frame_len = u32::from_be_bytes([self.inbuf[0], self.inbuf[1], self.inbuf[2], self.inbuf[3]]) as usize;
        if frame_len > MAX_MESSAGE_SIZE {
            return Err(DriverError::MessageTooLarge(frame_len));
        }
        if self.inbuf.len() < 4 + frame_len {
            return Ok(None);
        }
        let envelope: WireResponse =
            rmp_serde::from_slice(&self.inbuf[4..4 + frame_len]).map_err(|e| {
                DriverError::Transport(format!("malformed response frame: {e}"))
            })?;
        Ok(Some((
            ResponseHead {
                status: envelope.status,
                headers: envelope.headers,
            },
            Bytes::from(envelope.body),
        )))
    }
}

impl TransportSession for StreamSession {
    fn kind(&self) -> TransportKind {
        TransportKind::Stream
    }

    fn state(&self) -> ConnState {
        self.state
    }

    fn connect_step(&mut self) -> Result<Step, DriverError> {
        self.state = ConnState::Connecting;
        match connect_step(&self.host, self.port, &self.deadline)? {
            Some(stream) => {
                trace!(host = %self.host, port = self.port, "stream transport connected");
                self.stream = Some(stream);
                self.state = ConnState::Sending;
                Ok(Step::Progress)
            }
            None => Ok(Step::Pending),
        }
    }

    fn send_step(&mut self) -> Result<Step, DriverError> {
        self.deadline.check()?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(DriverError::Transport("send on a closed session".to_string()));
        };
        match write_chunk(stream, &self.out[self.sent..])? {
            Some(n) => {
                self.sent += n;
                trace!(sent = self.sent, total = self.out.len(), "stream send step");
                if self.sent == self.out.len() {
                    self.state = ConnState::Receiving;
                }
                Ok(Step::Progress)
            }
            None => Ok(Step::Pending),
        }
    }

    fn recv_step(&mut self) -> Result<Step, DriverError> {
        self.deadline.check()?;
        let Some(stream) = self.stream.as_mut() else {
            return Err(DriverError::Transport("receive on a closed session".to_string()));
        };
        match read_chunk(stream, &mut self.inbuf)? {
            None => Ok(Step::Pending),
            Some(0) => Err(DriverError::Transport(
                "connection closed before response frame".to_string(),
            )),
            Some(_) => match self.try_decode()? {
                Some((head, body)) => {
                    self.stream = None;
                    self.state = ConnState::Closed;
                    trace!(status = head.status, len = body.len(), "stream response complete");
                    Ok(Step::Done(head, body))
                }
                None => Ok(Step::Progress),
            },
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.inbuf.clear();
        self.state = ConnState::Closed;
    }
}
