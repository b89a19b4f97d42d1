//! Shutdown signal handling.

use tokio::signal;
use tracing::{info, warn};

/// Resolves on SIGINT or SIGTERM. Never resolves if no handler could be
/// installed.
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c() => {}
                    _ = sigterm.recv() => {
                        info!("Received SIGTERM, shutting down");
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "SIGTERM handler unavailable");
                ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    ctrl_c().await;
}

async fn ctrl_c() {
    match signal::ctrl_c().await {
        Ok(()) => info!("Received SIGINT, shutting down"),
        Err(e) => {
            warn!(error = %e, "Ctrl-C handler unavailable");
            std::future::pending::<()>().await;
        }
    }
}
