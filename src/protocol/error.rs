use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;

/// Driver error taxonomy.
///
/// Configuration errors (`InvalidState`, `IncompleteRequest`,
/// `UnsupportedTransport`, `InvalidUrl`) surface synchronously from the call
/// that caused them. Runtime errors (`Transport`, `Timeout`, `Server`) only
/// surface through the `Failed` connection state and are read back via
/// [`Connection::error`](crate::Connection::error).
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("incomplete request: missing {0}")]
    IncompleteRequest(&'static str),

    #[error("unsupported transport scheme '{0}'")]
    UnsupportedTransport(String),

    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("server returned status {status}")]
    Server { status: u16, body: Bytes },

    #[error("message of {0} bytes exceeds the maximum frame size")]
    MessageTooLarge(usize),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("result not ready")]
    NotReady,
}
