//! Acknowledgement protocol handler for the Tokio runtime.

use bytes::BytesMut;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::reply::{build_reply, decode};
use crate::config::ConnectionSettings;

/// How a connection ended when no I/O error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Reply sent, grace period elapsed, connection closed.
    Completed,
    /// Cancellation was observed before the exchange finished.
    Cancelled,
}

/// Handles exactly one accepted connection.
///
/// Holds only immutable settings, so one instance can serve any number of
/// concurrent connections.
#[derive(Debug, Clone, Copy)]
pub struct AckHandler {
    settings: ConnectionSettings,
}

impl AckHandler {
    pub fn new(settings: ConnectionSettings) -> Self {
        Self { settings }
    }

    /// Run the exchange: one read, one reply, a grace delay, then close.
    ///
    /// Every suspension point races against `cancel`. The stream is dropped
    /// (and therefore closed) on every return path.
    pub async fn handle<S>(&self, mut stream: S, cancel: &CancellationToken) -> io::Result<Outcome>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let mut buffer = BytesMut::zeroed(self.settings.read_buffer_size);

        let n = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
            result = stream.read(&mut buffer[..]) => result?,
        };

        let text = decode(&buffer[..n]);
        if n == 0 {
            debug!("Peer closed before sending");
        }
        info!(bytes = n, "Received: {}", text);

        let reply = build_reply(&text);
        let send = async {
            stream.write_all(&reply).await?;
            stream.flush().await
        };
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
            result = send => result?,
        }
        info!("ACK sent");

        // Give the peer time to drain the reply before the close.
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(Outcome::Cancelled),
            _ = tokio::time::sleep(self.settings.grace_period) => {}
        }

        if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "Shutdown after ACK failed");
        }
        debug!("Connection closed");
        Ok(Outcome::Completed)
    }
}
