mod connection;
mod request;

pub use connection::{Connection, Mode};
pub use request::{HeaderOpts, RequestDescriptor, RequestTarget, ServerUrl, Verb};
