//! Signal-driven graceful shutdown

use probe_lib::{health::HealthRegistry, StructuredLogger};
use std::future::Future;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Wait for SIGINT or SIGTERM and return the name of the signal received
pub async fn shutdown_signal() -> &'static str {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
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
        () = ctrl_c => "SIGINT",
        () = terminate => "SIGTERM",
    }
}

/// Once `signal` resolves, mark the probe unready and cancel `token`
///
/// Cancelling the token stops the API server and aborts in-flight
/// readiness waits of running remediations.
pub async fn shutdown_on<F>(
    signal: F,
    health_registry: &HealthRegistry,
    logger: &StructuredLogger,
    token: &CancellationToken,
) -> &'static str
where
    F: Future<Output = &'static str>,
{
    let name = signal.await;
    info!(signal = name, "Received shutdown signal, shutting down gracefully");
    logger.log_shutdown(&format!("{} received", name));
    health_registry.set_ready(false).await;
    token.cancel();
    name
}
