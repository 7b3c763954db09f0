//! Signal handling for graceful service shutdown.
//!
//! Cross-platform signal handling so the service can drain its write-behind
//! queues before exiting: SIGINT and SIGTERM on Unix, Ctrl+C on Windows.

use hearth_registry::ShutdownState;
use tokio::signal;
use tracing::info;

/// Waits for a termination signal and initiates shutdown.
///
/// # Returns
///
/// `Ok(shutdown_state)` when a shutdown signal is received, containing the
/// shutdown coordination state, or an error if signal handling setup failed.
pub async fn setup_signal_handlers() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = setup_signal_handlers_silent().await?;
    info!("📡 Received shutdown signal - initiating graceful shutdown");
    Ok(shutdown_state)
}

pub async fn setup_signal_handlers_silent() -> Result<ShutdownState, Box<dyn std::error::Error>> {
    let shutdown_state = ShutdownState::new();

    #[cfg(unix)]
    {
        use signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        tokio::select! {
            _ = sigint.recv() => (),
            _ = sigterm.recv() => ()
        }
    }

    #[cfg(windows)]
    signal::ctrl_c().await?;

    shutdown_state.initiate_shutdown();
    Ok(shutdown_state)
}
