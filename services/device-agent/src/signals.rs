use edgecred_core::CancellationToken;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

/// Cancel `shutdown` on SIGINT or SIGTERM.
///
/// SIGTERM is what service managers send when the agent is unloaded.
pub async fn handle(shutdown: CancellationToken) -> anyhow::Result<()> {
    let mut sigterm = signal(SignalKind::terminate()).inspect_err(|error| {
        error!(?error, "Failed to register a SIGTERM signal handler");
    })?;
    let mut sigint = signal(SignalKind::interrupt()).inspect_err(|error| {
        error!(?error, "Failed to register a SIGINT signal handler");
    })?;

    tokio::select! {
        _ = sigterm.recv() => info!("SIGTERM received, shutting down"),
        _ = sigint.recv() => info!("SIGINT received, shutting down"),
        _ = shutdown.cancelled() => return Ok(()),
    }
    shutdown.cancel();
    Ok(())
}
