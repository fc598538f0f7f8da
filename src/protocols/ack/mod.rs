//! Acknowledgement protocol implementation.
//!
//! A single-shot service for connectivity checks:
//! - Client connects and sends up to 4000 bytes of UTF-8 text
//! - Server answers with the same text behind an `ACK ` marker
//! - Server closes the connection after a grace period
//!
//! ## Protocol Format
//!
//! ```text
//! Request:  <text>
//! Response: ACK <text>\r\n
//!
//! Example:
//! Request:  ping
//! Response: ACK ping\r\n
//! ```
//!
//! There is no framing on the request side. Whatever the first read
//! returns is the message; a peer that closes without sending anything
//! gets `ACK \r\n`. Invalid UTF-8 is replaced with U+FFFD before echoing.

pub mod handler;
pub mod reply;

pub use handler::{AckHandler, Outcome};
pub use reply::READ_BUFFER_SIZE;
