use std::time::Duration;

use tokio::signal;

use crate::dispatch::TaskRegistry;

/// Wait for a shutdown signal (SIGINT or SIGTERM).
pub async fn wait_for_shutdown() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown...");
        }
    }
}

/// Cancel every in-flight workflow and wait up to `grace` for them to reach a
/// state boundary and release their keys.
///
/// Returns the number of workflows still running when the grace period ends.
pub async fn graceful_shutdown(registry: &TaskRegistry, grace: Duration) -> usize {
    tracing::info!("Starting graceful shutdown...");

    let in_flight = registry.in_flight();
    if in_flight.is_empty() {
        tracing::info!("No in-flight workflows");
        return 0;
    }

    for key in &in_flight {
        tracing::info!(key = %key, "Cancelling in-flight workflow");
    }
    registry.cancel_all();

    let deadline = tokio::time::Instant::now() + grace;
    loop {
        let remaining = registry.in_flight().len();
        if remaining == 0 {
            tracing::info!("Graceful shutdown complete");
            return 0;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(remaining, "Shutdown grace period elapsed with workflows still running");
            return remaining;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
