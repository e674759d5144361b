use anyhow::Result;
use tokio::signal;

/// Wait for termination signals (Ctrl+C, SIGTERM).
pub async fn wait_for_shutdown() -> Result<()> {
    #[cfg(unix)]
    let terminate = async {
        let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())
            .inspect_err(|e| tracing::error!(%e, "Failed to install SIGTERM handler"))?;
        sigterm.recv().await;
        Ok::<_, std::io::Error>("SIGTERM")
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<std::io::Result<&'static str>>();

    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .inspect_err(|e| tracing::error!(%e, "Failed to install Ctrl+C handler"))?;
        Ok::<_, std::io::Error>("Ctrl+C")
    };

    let received = tokio::select! {
        result = ctrl_c => result?,
        result = terminate => result?,
    };

    tracing::info!(signal = received, "Shutdown signal received, initiating graceful shutdown");
    Ok(())
}
