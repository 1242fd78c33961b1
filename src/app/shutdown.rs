use tokio::signal;
#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal as unix_signal};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

/// Cancel `token` on SIGINT or SIGTERM. Workers stop at their next
/// cancellation point and the run reports `Cancelled`.
pub fn spawn_signal_listener(token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::select! {
            _ = token.cancelled() => {}
            name = wait_for_signal() => {
                info!("Received {}, cancelling the run after in-flight records", name);
                token.cancel();
            }
        }
    })
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    let mut sigterm = match unix_signal(SignalKind::terminate()) {
        Ok(sigterm) => sigterm,
        Err(err) => {
            tracing::warn!(
                "Failed to create SIGTERM handler, listening for Ctrl+C only: {}",
                err
            );
            return ctrl_c().await;
        }
    };

    tokio::select! {
        name = ctrl_c() => name,
        _ = sigterm.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    ctrl_c().await
}

async fn ctrl_c() -> &'static str {
    match signal::ctrl_c().await {
        Ok(()) => "SIGINT (Ctrl+C)",
        Err(err) => {
            // Without a working Ctrl+C listener only SIGTERM (or nothing) can cancel.
            error!("Failed to listen for SIGINT: {}", err);
            std::future::pending().await
        }
    }
}
