//! ack-server: a TCP acknowledgement server
//!
//! Every client gets exactly one exchange:
//! - the server reads up to 4000 bytes once
//! - it answers `ACK <text>\r\n`
//! - it closes the connection after a grace period
//!
//! Features:
//! - One task per connection, no shared state between connections
//! - Cooperative shutdown on Ctrl+C / SIGTERM via a cancellation token
//! - Optional cap on concurrently handled connections
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod protocols;
mod server;
mod shutdown;

use std::process::ExitCode;

use config::Config;
use error::ServerError;
use server::{LoopExit, Server};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    // Load configuration
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.server.host,
        port = config.server.port,
        workers = config.workers.unwrap_or_else(num_cpus),
        max_connections = ?config.server.max_connections,
        grace_period_ms = config.server.connection.grace_period.as_millis() as u64,
        "Starting ack-server"
    );

    match run(config) {
        Ok(exit) => {
            if let LoopExit::AcceptFailed(e) = exit {
                warn!(error = %e, "Accept loop ended early");
            }
            println!("That's all, folks!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

/// Build the runtime, bind, and serve until shutdown.
fn run(config: Config) -> Result<LoopExit, ServerError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers.unwrap_or_else(num_cpus))
        .enable_all()
        .build()
        .map_err(ServerError::Runtime)?;

    runtime.block_on(async {
        let server = Server::bind(&config.server).await?;

        let cancel = CancellationToken::new();
        tokio::spawn(shutdown::watch(cancel.clone()));

        let exit = server.run(cancel.clone()).await;
        // Releases the signal watcher if the loop ended on its own.
        cancel.cancel();
        Ok(exit)
    })
}

fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
