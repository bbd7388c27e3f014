//! MessagePack codec boundary.
//!
//! Pure, stateless transforms between structured values and the compact
//! binary wire format. `decode(encode(v))` returns `v` for every value
//! `encode` accepts.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::error::DriverError;

/// Encodes a structured value into the binary wire format.
///
/// Struct fields are written as named map entries so the result is
/// self-describing and decodable into loosely typed values.
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, DriverError> {
    rmp_serde::to_vec_named(value).map_err(|e| DriverError::Encode(e.to_string()))
}

/// Decodes the binary wire format back into a structured value.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, DriverError> {
    rmp_serde::from_slice(bytes).map_err(|e| DriverError::Decode(e.to_string()))
}

/// Decodes into a loosely typed JSON value, the common shape for document
/// payloads.
pub fn decode_value(bytes: &[u8]) -> Result<Value, DriverError> {
    decode(bytes)
}
