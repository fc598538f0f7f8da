//! TCP listener and connection dispatcher.
//!
//! Owns the listening socket, accepts connections in a loop and hands each
//! one to an [`AckHandler`] running on its own task. A shared
//! [`CancellationToken`] stops the accept loop and every in-flight handler.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::config::ServerSettings;
use crate::error::ServerError;
use crate::protocols::ack::{AckHandler, Outcome};

/// Pending connection queue length passed to `listen(2)`
const LISTEN_BACKLOG: i32 = 1024;

/// Dispatcher lifecycle.
///
/// `Accepting` and `Dispatching` alternate for every accepted connection;
/// `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Created,
    Listening,
    Accepting,
    Dispatching,
    Stopping,
    Stopped,
}

/// Why the accept loop ended.
#[derive(Debug)]
pub enum LoopExit {
    /// The cancellation token fired.
    Cancelled,
    /// Accept failed for a reason other than shutdown. The listener is not
    /// restarted.
    AcceptFailed(io::Error),
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    handler: AckHandler,
    connection_limit: Option<Arc<Semaphore>>,
    shutdown_timeout: Duration,
    state: watch::Sender<State>,
}

impl Server {
    /// Resolve the configured address and start listening.
    ///
    /// A failure here is fatal for the service: no accept loop exists until
    /// this returns `Ok`.
    pub async fn bind(settings: &ServerSettings) -> Result<Self, ServerError> {
        let (state, _) = watch::channel(State::Created);

        let listen = settings.listen_addr();
        let addr = tokio::net::lookup_host(&listen)
            .await
            .map_err(|source| ServerError::Resolve {
                addr: listen.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ServerError::NoAddress(listen.clone()))?;

        let listener = create_listener(addr)
            .and_then(TcpListener::from_std)
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        state.send_replace(State::Listening);
        info!(address = %local_addr, "Server listening");

        Ok(Server {
            listener,
            local_addr,
            handler: AckHandler::new(settings.connection),
            connection_limit: settings
                .max_connections
                .map(|max| Arc::new(Semaphore::new(max))),
            shutdown_timeout: settings.shutdown_timeout,
            state,
        })
    }

    /// Address the listener is actually bound to.
    #[cfg(test)]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Watch the dispatcher state.
    #[cfg(test)]
    pub fn state(&self) -> watch::Receiver<State> {
        self.state.subscribe()
    }

    /// Accept connections until `cancel` fires or accept fails.
    ///
    /// Each connection runs on its own task with a child of `cancel`; the
    /// loop never waits for a handler. After the loop ends the listener is
    /// closed and in-flight handlers get `shutdown_timeout` to finish.
    pub async fn run(self, cancel: CancellationToken) -> LoopExit {
        let Server {
            listener,
            local_addr,
            handler,
            connection_limit,
            shutdown_timeout,
            state,
        } = self;

        info!(address = %local_addr, "Starting");
        let dispatcher = Dispatcher {
            handler,
            connection_limit,
            shutdown_timeout,
            state,
        };
        dispatcher.serve(listener, cancel).await
    }
}

/// Source of accepted connections for the dispatch loop.
pub(crate) trait Acceptor {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn next_connection(
        &mut self,
    ) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Acceptor for TcpListener {
    type Stream = TcpStream;

    fn next_connection(
        &mut self,
    ) -> impl Future<Output = io::Result<(TcpStream, SocketAddr)>> + Send {
        TcpListener::accept(self)
    }
}

/// Everything the accept loop needs besides the acceptor itself.
struct Dispatcher {
    handler: AckHandler,
    connection_limit: Option<Arc<Semaphore>>,
    shutdown_timeout: Duration,
    state: watch::Sender<State>,
}

impl Dispatcher {
    async fn serve<A>(self, mut acceptor: A, cancel: CancellationToken) -> LoopExit
    where
        A: Acceptor + Send,
    {
        let Dispatcher {
            handler,
            connection_limit,
            shutdown_timeout,
            state,
        } = self;
        let tracker = TaskTracker::new();

        let exit = loop {
            state.send_replace(State::Accepting);

            // Wait for a connection slot
            let permit = match &connection_limit {
                Some(limit) => tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break LoopExit::Cancelled,
                    permit = Arc::clone(limit).acquire_owned() => match permit {
                        Ok(permit) => Some(permit),
                        Err(_) => break LoopExit::Cancelled,
                    },
                },
                None => None,
            };

            let accepted = tokio::select! {
                biased;
                _ = cancel.cancelled() => break LoopExit::Cancelled,
                accepted = acceptor.next_connection() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    state.send_replace(State::Dispatching);
                    info!(peer = %peer, "Got client");

                    let token = cancel.child_token();
                    let connection = async move {
                        match handler.handle(stream, &token).await {
                            Ok(Outcome::Completed) => debug!("Connection complete"),
                            Ok(Outcome::Cancelled) => debug!("Connection abandoned on shutdown"),
                            Err(e) => warn!(error = %e, "Connection error"),
                        }
                        drop(permit);
                    }
                    .instrument(info_span!("connection", peer = %peer));

                    // The inner task isolates a panicking handler; the outer
                    // one reports it and keeps the tracker count accurate.
                    tracker.spawn(async move {
                        if let Err(e) = tokio::spawn(connection).await {
                            if e.is_panic() {
                                error!(peer = %peer, "Connection handler panicked");
                            }
                        }
                    });
                }
                Err(e) if cancel.is_cancelled() => {
                    debug!(error = %e, "Accept aborted by shutdown");
                    break LoopExit::Cancelled;
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    break LoopExit::AcceptFailed(e);
                }
            }
        };

        state.send_replace(State::Stopping);
        drop(acceptor);

        tracker.close();
        if tokio::time::timeout(shutdown_timeout, tracker.wait())
            .await
            .is_err()
        {
            warn!(
                in_flight = tracker.len(),
                "Connections still open after shutdown timeout"
            );
        }

        info!("Stopping");
        state.send_replace(State::Stopped);
        exit
    }
}

/// Create a TCP listener with SO_REUSEADDR so restarts can rebind while old
/// connections sit in TIME_WAIT. SO_REUSEPORT stays off: a second server on
/// the same port must fail to bind.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
