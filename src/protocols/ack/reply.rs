//! Acknowledgement reply formatting.

use bytes::BytesMut;
use std::borrow::Cow;

/// Marker placed in front of the received text.
pub const ACK_PREFIX: &str = "ACK ";

/// Terminator appended to every reply.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Upper bound on bytes taken from a client in its single read.
pub const READ_BUFFER_SIZE: usize = 4000;

/// Decode received bytes as text, replacing invalid UTF-8 sequences.
pub fn decode(received: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(received)
}

/// Build `ACK <text>\r\n`.
pub fn build_reply(text: &str) -> BytesMut {
    let mut reply = BytesMut::with_capacity(ACK_PREFIX.len() + text.len() + LINE_TERMINATOR.len());
    reply.extend_from_slice(ACK_PREFIX.as_bytes());
    reply.extend_from_slice(text.as_bytes());
    reply.extend_from_slice(LINE_TERMINATOR.as_bytes());
    reply
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply_to(received: &[u8]) -> BytesMut {
        build_reply(&decode(received))
    }

    #[test]
    fn test_reply_ping() {
        assert_eq!(&reply_to(b"ping")[..], b"ACK ping\r\n");
    }

    #[test]
    fn test_reply_empty() {
        assert_eq!(&reply_to(b"")[..], b"ACK \r\n");
    }

    #[test]
    fn test_reply_keeps_line_endings() {
        // The received text is echoed verbatim, including its own CRLF.
        assert_eq!(&reply_to(b"hello\r\n")[..], b"ACK hello\r\n\r\n");
    }

    #[test]
    fn test_reply_multibyte() {
        let text = "привет, мир";
        let reply = reply_to(text.as_bytes());
        assert_eq!(reply.len(), 4 + text.len() + 2);
        assert_eq!(&reply[..], format!("ACK {text}\r\n").as_bytes());
    }

    #[test]
    fn test_reply_invalid_utf8() {
        let reply = reply_to(&[b'o', b'k', 0xff]);
        assert_eq!(&reply[..], "ACK ok\u{FFFD}\r\n".as_bytes());
    }

    #[test]
    fn test_reply_full_buffer() {
        let payload = vec![b'x'; READ_BUFFER_SIZE];
        let reply = reply_to(&payload);
        assert_eq!(reply.len(), READ_BUFFER_SIZE + 6);
        assert!(reply.starts_with(b"ACK xxx"));
        assert!(reply.ends_with(b"x\r\n"));
    }
}
