//! Stream transport wire protocol.
//!
//! A session opens with a magic preamble, then each logical message is a
//! 4-byte big-endian length prefix followed by a MessagePack envelope.

use serde::{Deserialize, Serialize};

/// Magic preamble sent at the start of a stream transport session.
pub const STREAM_MAGIC: &[u8] = b"strata-drv-v1\0";

/// Maximum envelope size (16 MB).
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Request envelope for the stream transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRequest {
    pub verb: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}

/// Response envelope for the stream transport. The body is the raw result
/// buffer; status follows HTTP semantics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    #[serde(with = "serde_bytes")]
    pub body: Vec<u8>,
}
