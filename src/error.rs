//! Startup and runtime errors surfaced to the binary entry point.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to resolve listen address '{addr}': {source}")]
    Resolve { addr: String, source: io::Error },

    #[error("Listen address '{0}' resolved to nothing")]
    NoAddress(String),

    #[error("Failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },

    #[error("Failed to start async runtime: {0}")]
    Runtime(#[source] io::Error),
}
