//! Connection core for the StrataDB native Rust driver.
//!
//! The request/response execution primitive the higher-level driver is built
//! on: a [`Connection`] is configured once, armed, and then polled to
//! completion one bounded step at a time, over either an HTTP or a
//! persistent stream transport. Payload bodies travel in MessagePack; the
//! [`protocol::codec`] module is the encode/decode boundary.
//!
//! # Example
//!
//! ```no_run
//! use strata_client::{Connection, PollDriver, RequestTarget};
//!
//! fn main() -> Result<(), strata_client::DriverError> {
//!     let mut target = RequestTarget::new();
//!     target.set_server_url("http://127.0.0.1:8529")?;
//!     target.set_db_name("testdb")?;
//!     target.set_path("/_api/document/testcol/123456");
//!
//!     let mut conn = Connection::new();
//!     conn.reset();
//!     conn.set_url(target)?;
//!     conn.set_get()?;
//!     conn.set_asynchronous(true)?;
//!     conn.set_buffer()?;
//!
//!     PollDriver::new().drive(&mut conn)?;
//!     match conn.error() {
//!         None => {
//!             let doc: serde_json::Value = strata_client::protocol::codec::decode(&conn.result()?)?;
//!             println!("result: {doc}");
//!         }
//!         Some(err) => eprintln!("request failed: {err}"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod poll;
pub mod protocol;
pub mod transport;

pub use client::{Connection, HeaderOpts, Mode, RequestDescriptor, RequestTarget, ServerUrl, Verb};
pub use poll::{Drive, PollDriver};
pub use protocol::{DriverError, ResponseHead};
pub use transport::{ConnState, TransportKind};
