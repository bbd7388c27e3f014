//! Thread-backed mock servers for transport tests.

#![allow(dead_code)]

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::mpsc::{self, Receiver};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use strata_client::protocol::{codec, WireRequest, WireResponse, STREAM_MAGIC};

/// Serves exactly one HTTP request with a canned response, then closes.
pub fn http_server(status: u16, body: Vec<u8>) -> (String, JoinHandle<()>) {
    let (url, _rx, handle) = http_server_capture(status, body);
    (url, handle)
}

/// Like [`http_server`], also handing back the raw request bytes received.
pub fn http_server_capture(
    status: u16,
    body: Vec<u8>,
) -> (String, Receiver<Vec<u8>>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let (mut conn, _) = listener.accept().expect("accept");
        let request = read_http_request(&mut conn);
        tx.send(request).ok();
        write_http_response(&mut conn, status, &body, true);
    });
    (format!("http://{addr}"), rx, handle)
}

/// Serves one HTTP request, dribbling the response body out in small
/// delayed chunks to simulate a slow peer.
pub fn http_server_slow(
    body: Vec<u8>,
    chunk: usize,
    delay: Duration,
) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let (mut conn, _) = listener.accept().expect("accept");
        read_http_request(&mut conn);
        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        );
        conn.write_all(head.as_bytes()).expect("write head");
        for piece in body.chunks(chunk) {
            conn.write_all(piece).expect("write chunk");
            conn.flush().ok();
            thread::sleep(delay);
        }
    });
    (format!("http://{addr}"), handle)
}

/// Serves exactly one stream transport request, handing back the decoded
/// request envelope.
pub fn stream_server(
    status: u16,
    body: Vec<u8>,
) -> (String, Receiver<WireRequest>, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let (tx, rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let (mut conn, _) = listener.accept().expect("accept");

        let mut magic = vec![0u8; STREAM_MAGIC.len()];
        conn.read_exact(&mut magic).expect("read magic");
        assert_eq!(magic, STREAM_MAGIC, "client must open with the magic preamble");

        let mut len_buf = [0u8; 4];
        conn.read_exact(&mut len_buf).expect("read frame length");
        let mut payload = vec![0u8; u32::from_be_bytes(len_buf) as usize];
        conn.read_exact(&mut payload).expect("read frame");
        let request: WireRequest = codec::decode(&payload).expect("decode request envelope");
        tx.send(request).ok();

        let response = WireResponse {
            status,
            headers: vec![(
                "content-type".to_string(),
                "application/x-msgpack".to_string(),
            )],
            body,
        };
        let payload = codec::encode(&response).expect("encode response envelope");
        conn.write_all(&(payload.len() as u32).to_be_bytes())
            .expect("write frame length");
        conn.write_all(&payload).expect("write frame");
    });
    (format!("stream://{addr}"), rx, handle)
}

/// Serves one HTTP request with a verbatim, possibly malformed response.
pub fn http_server_raw(response: Vec<u8>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let (mut conn, _) = listener.accept().expect("accept");
        read_http_request(&mut conn);
        conn.write_all(&response).expect("write raw response");
    });
    (format!("http://{addr}"), handle)
}

/// Accepts one HTTP request and then goes silent for `hold` without ever
/// answering.
pub fn http_server_silent(hold: Duration) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
    let addr = listener.local_addr().expect("local addr");
    let handle = thread::spawn(move || {
        let (mut conn, _) = listener.accept().expect("accept");
        read_http_request(&mut conn);
        thread::sleep(hold);
    });
    (format!("http://{addr}"), handle)
}

/// A loopback address with no listener behind it.
pub fn unreachable_url() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);
    format!("http://{addr}")
}

fn read_http_request(conn: &mut TcpStream) -> Vec<u8> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            let total = pos + 4 + content_length(&buf[..pos]);
            while buf.len() < total {
                let n = conn.read(&mut chunk).expect("read request body");
                if n == 0 {
                    break;
                }
                buf.extend_from_slice(&chunk[..n]);
            }
            return buf;
        }
        let n = conn.read(&mut chunk).expect("read request");
        if n == 0 {
            return buf;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

fn write_http_response(conn: &mut TcpStream, status: u16, body: &[u8], msgpack: bool) {
    let content_type = if msgpack {
        "application/x-msgpack"
    } else {
        "text/plain"
    };
    let head = format!(
        "HTTP/1.1 {status} Mock\r\nContent-Type: {content_type}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    );
    conn.write_all(head.as_bytes()).expect("write head");
    conn.write_all(body).expect("write body");
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn content_length(head: &[u8]) -> usize {
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    text.lines()
        .find_map(|line| line.strip_prefix("content-length:"))
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(0)
}
