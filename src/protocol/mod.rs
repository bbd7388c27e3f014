//! Wire-level types shared by both transports: the error taxonomy, the
//! MessagePack codec boundary, response metadata and the stream envelope.

pub mod codec;
mod error;
mod response;
mod wire;

pub use error::DriverError;
pub use response::ResponseHead;
pub use wire::{WireRequest, WireResponse, MAX_MESSAGE_SIZE, STREAM_MAGIC};
