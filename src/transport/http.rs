//! HTTP/1.1 transport session.
//!
//! Frames exactly one request/response pair per session: the request is sent
//! with `Connection: close`, the response is a status line, headers and a
//! `Content-Length` (or close-delimited) body. Chunked transfer encoding is
//! not supported; the stream transport is the path for incremental bodies.

use std::net::TcpStream;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::client::{RequestDescriptor, Verb};
use crate::protocol::{DriverError, ResponseHead, MAX_MESSAGE_SIZE};

use super::{
    connect_step, read_chunk, write_chunk, ConnState, Deadline, Step, TransportKind,
    TransportSession,
};

/// How the response body length is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BodyFraming {
    Length(usize),
    UntilClose,
}

pub(crate) struct HttpSession {
    host: String,
    port: u16,
    state: ConnState,
    stream: Option<TcpStream>,
    out: Bytes,
    sent: usize,
    inbuf: BytesMut,
    head: Option<(ResponseHead, BodyFraming)>,
    body_start: usize,
    // HEAD responses advertise a Content-Length but carry no body
    head_request: bool,
    deadline: Deadline,
}

impl HttpSession {
    pub(crate) fn new(desc: &RequestDescriptor, timeout: Duration) -> Self {
        Self {
            host: desc.server_url().host().to_string(),
            port: desc.server_url().port(),
            state: ConnState::Unconnected,
            stream: None,
            out: build_request(desc),
            sent: 0,
            inbuf: BytesMut::new(),
            head: None,
            body_start: 0,
            head_request: desc.verb() == Verb::Head,
            deadline: Deadline::new(timeout),
        }
    }

    fn try_finish(&mut self, eof: bool) -> Result<Step, DriverError> {
        let (complete, body_len) = match self.head.as_ref() {
            None => {
                if eof {
                    return Err(DriverError::Transport(
                        "connection closed before response head".to_string(),
                    ));
                }
                return Ok(Step::Progress);
            }
            Some((_, BodyFraming::Length(len))) => {
                let end = self.body_start.checked_add(*len).ok_or_else(|| {
                    DriverError::Transport("response body length overflows".to_string())
                })?;
                (self.inbuf.len() >= end, *len)
            }
            Some((_, BodyFraming::UntilClose)) => {
                (eof, self.inbuf.len().saturating_sub(self.body_start))
            }
        };
        if !complete {
            if eof {
                return Err(DriverError::Transport(
                    "connection closed mid-body".to_string(),
                ));
            }
            return Ok(Step::Progress);
        }
        let Some((head, _)) = self.head.take() else {
            return Err(DriverError::Transport("response head lost".to_string()));
        };
        let body = Bytes::copy_from_slice(&self.inbuf[self.body_start..self.body_start + body_len]);
        self.stream = None;
        self.state = ConnState::Closed;
        trace!(status = head.status, len = body.len(), "http response complete");
        Ok(Step::Done(head, body))
    }
}

impl TransportSession for HttpSession {
    fn kind(&self) -> TransportKind {
        TransportKind::Http
    }

    fn state(&self) -> ConnState {
        self.state
    }

    fn connect_step(&mut self) -> Result<Step, DriverError> {
        self.state = ConnState::Connecting;
        match connect_step(&self.host, self.port, &self.deadline)? {
            Some(stream) => {
                trace!(host = %self.host, port = self.port, "http transport connected");
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
                trace!(sent = self.sent, total = self.out.len(), "http send step");
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
            Some(0) => self.try_finish(true),
            Some(_) => {
                if self.head.is_none() {
                    if let Some((head, framing, body_start)) = parse_head(&self.inbuf)? {
                        let framing = if self.head_request {
                            BodyFraming::Length(0)
                        } else {
                            framing
                        };
                        self.head = Some((head, framing));
                        self.body_start = body_start;
                    }
                }
                self.try_finish(false)
            }
        }
    }

    fn close(&mut self) {
        self.stream = None;
        self.inbuf.clear();
        self.state = ConnState::Closed;
    }
}

/// Serializes the request head and body into one outbound buffer.
fn build_request(desc: &RequestDescriptor) -> Bytes {
    let body = desc.body().cloned().unwrap_or_default();
    let mut head = String::new();
    head.push_str(&format!(
        "{} {} HTTP/1.1\r\n",
        desc.verb().as_str(),
        desc.wire_path()
    ));
    head.push_str(&format!(
        "Host: {}:{}\r\n",
        desc.server_url().host(),
        desc.server_url().port()
    ));
    if desc.verb().carries_body() {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }
    head.push_str("Connection: close\r\n");
    for (name, value) in desc.headers().iter() {
        // reserved for the framing above
        if name.eq_ignore_ascii_case("host")
            || name.eq_ignore_ascii_case("content-length")
            || name.eq_ignore_ascii_case("connection")
        {
            continue;
        }
        head.push_str(&format!("{name}: {value}\r\n"));
    }
    head.push_str("\r\n");

    let mut out = BytesMut::with_capacity(head.len() + body.len());
    out.extend_from_slice(head.as_bytes());
    out.extend_from_slice(&body);
    out.freeze()
}

/// Parses the response head once `\r\n\r\n` has arrived. Returns `None`
/// while the head is still incomplete.
fn parse_head(buf: &[u8]) -> Result<Option<(ResponseHead, BodyFraming, usize)>, DriverError> {
    let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") else {
        return Ok(None);
    };
    let text = std::str::from_utf8(&buf[..end])
        .map_err(|_| DriverError::Transport("response head is not valid UTF-8".to_string()))?;
    let mut lines = text.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| DriverError::Transport("empty response head".to_string()))?;
    let status = parse_status_line(status_line)?;

    let mut headers = Vec::new();
    let mut framing = BodyFraming::UntilClose;
    for line in lines {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line.split_once(':').ok_or_else(|| {
            DriverError::Transport(format!("malformed response header line: {line:?}"))
        })?;
        let name = name.trim().to_string();
        let value = value.trim().to_string();
        if name.eq_ignore_ascii_case("content-length") {
            let len = value.parse::<usize>().map_err(|_| {
                DriverError::Transport(format!("invalid Content-Length: {value:?}"))
            })?;
            if len > MAX_MESSAGE_SIZE {
                return Err(DriverError::Transport(format!(
                    "Content-Length {len} exceeds the maximum response size"
                )));
            }
            framing = BodyFraming::Length(len);
        } else if name.eq_ignore_ascii_case("transfer-encoding")
            && value.to_ascii_lowercase().contains("chunked")
        {
            return Err(DriverError::Transport(
                "chunked transfer encoding is not supported".to_string(),
            ));
        }
        headers.push((name, value));
    }
    Ok(Some((ResponseHead { status, headers }, framing, end + 4)))
}

fn parse_status_line(line: &str) -> Result<u16, DriverError> {
    let mut parts = line.split_whitespace();
    let version = parts
        .next()
        .ok_or_else(|| DriverError::Transport("empty status line".to_string()))?;
    if !version.starts_with("HTTP/") {
        return Err(DriverError::Transport(format!(
            "malformed status line: {line:?}"
        )));
    }
    parts
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .ok_or_else(|| DriverError::Transport(format!("malformed status line: {line:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{HeaderOpts, RequestTarget, Verb};

    fn descriptor(verb: Verb, body: Option<&[u8]>) -> RequestDescriptor {
        let mut target = RequestTarget::new();
        target.set_server_url("http://127.0.0.1:8529").expect("url");
        target.set_db_name("testdb").expect("db");
        target.set_path("/_api/document/testcol/123456");
        let mut headers = HeaderOpts::new();
        headers.set("x-strata-test", "1");
        RequestDescriptor::from_parts(&target, verb, headers, body.map(Bytes::copy_from_slice))
            .expect("descriptor")
    }

    #[test]
    fn builds_get_request_without_body() {
        let out = build_request(&descriptor(Verb::Get, None));
        let text = std::str::from_utf8(&out).expect("utf8");
        assert!(text.starts_with("GET /_db/testdb/_api/document/testcol/123456 HTTP/1.1\r\n"));
        assert!(text.contains("Host: 127.0.0.1:8529\r\n"));
        assert!(text.contains("Connection: close\r\n"));
        assert!(text.contains("x-strata-test: 1\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn builds_post_request_with_body_and_length() {
        let out = build_request(&descriptor(Verb::Post, Some(b"\x81\xa1a\x01")));
        let text = String::from_utf8_lossy(&out);
        assert!(text.starts_with("POST "));
        assert!(text.contains("Content-Length: 4\r\n"));
        assert!(out.ends_with(b"\x81\xa1a\x01"));
    }

    #[test]
    fn user_headers_cannot_override_framing() {
        let mut target = RequestTarget::new();
        target.set_server_url("http://127.0.0.1:8529").expect("url");
        target.set_db_name("testdb").expect("db");
        target.set_path("/_api/version");
        let mut headers = HeaderOpts::new();
        headers.set("Content-Length", "9999");
        headers.set("Connection", "keep-alive");
        let desc = RequestDescriptor::from_parts(&target, Verb::Get, headers, None).expect("desc");
        let text = String::from_utf8_lossy(&build_request(&desc)).to_string();
        assert!(!text.contains("9999"));
        assert!(!text.contains("keep-alive"));
    }

    #[test]
    fn parses_head_with_content_length() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Type: application/x-msgpack\r\nContent-Length: 5\r\n\r\nhello";
        let (head, framing, body_start) = parse_head(raw).expect("parse").expect("complete");
        assert_eq!(head.status, 200);
        assert_eq!(head.header("content-type"), Some("application/x-msgpack"));
        assert_eq!(framing, BodyFraming::Length(5));
        assert_eq!(&raw[body_start..], b"hello");
    }

    #[test]
    fn incomplete_head_is_not_an_error() {
        assert!(parse_head(b"HTTP/1.1 200 OK\r\nContent-").expect("parse").is_none());
    }

    #[test]
    fn missing_content_length_means_until_close() {
        let raw = b"HTTP/1.1 204 No Content\r\n\r\n";
        let (head, framing, _) = parse_head(raw).expect("parse").expect("complete");
        assert_eq!(head.status, 204);
        assert_eq!(framing, BodyFraming::UntilClose);
    }

    #[test]
    fn huge_content_length_is_rejected() {
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 18446744073709551615\r\n\r\nabc";
        assert!(matches!(parse_head(raw), Err(DriverError::Transport(_))));
        let raw = b"HTTP/1.1 200 OK\r\nContent-Length: 16777217\r\n\r\n";
        assert!(matches!(parse_head(raw), Err(DriverError::Transport(_))));
    }

    #[test]
    fn chunked_encoding_is_rejected() {
        let raw = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n";
        assert!(matches!(parse_head(raw), Err(DriverError::Transport(_))));
    }

    #[test]
    fn malformed_status_line_is_rejected() {
        assert!(parse_head(b"ICMP nope\r\n\r\n").is_err());
        assert!(parse_head(b"HTTP/1.1 abc OK\r\n\r\n").is_err());
    }
}
