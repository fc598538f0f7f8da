//! Process signal handling.
//!
//! Turns Ctrl+C (and SIGTERM on Unix) into a cancellation of the root token.
//! The token is one-shot: nothing ever resets it.

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Cancel `cancel` on the first shutdown signal.
///
/// Returns early, without cancelling anything new, if the token is
/// cancelled by someone else first.
pub async fn watch(cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        _ = wait_for_signal() => {
            info!("Shutdown signal received");
            cancel.cancel();
        }
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_watch_returns_when_cancelled_elsewhere() {
        let cancel = CancellationToken::new();
        let watcher = tokio::spawn(watch(cancel.clone()));

        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), watcher)
            .await
            .expect("watcher should exit")
            .unwrap();
        assert!(cancel.is_cancelled());
    }
}
