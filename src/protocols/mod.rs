//! Protocol implementations.
//!
//! - `ack`: read once, answer `ACK <text>\r\n`, close after a grace period

pub mod ack;
