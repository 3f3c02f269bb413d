use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Install a shutdown handler that listens for SIGTERM and SIGINT.
///
/// Returns a `CancellationToken` that is cancelled when either signal is received.
/// Every long-running loop (API server, schedule engine, workers) watches this token.
pub fn install_shutdown_handler() -> std::io::Result<CancellationToken> {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT, initiating graceful shutdown");
            }
        }

        token_clone.cancel();
    });

    Ok(token)
}

/// Wait for supervised tasks to finish, up to `grace`.
///
/// Tasks still running after the grace period are detached and abandoned
/// at process exit. Returns how many were abandoned.
pub async fn drain_tasks(tasks: &mut JoinSet<()>, grace: Duration, what: &str) -> usize {
    if tasks.is_empty() {
        return 0;
    }
    tracing::info!(in_flight = tasks.len(), what, "Draining in-flight tasks");

    let drained = tokio::time::timeout(grace, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tracing::error!(what, error = %e, "Task failed while draining");
            }
        }
    })
    .await;

    match drained {
        Ok(()) => 0,
        Err(_) => {
            let abandoned = tasks.len();
            tracing::warn!(abandoned, what, "Grace period elapsed, abandoning tasks");
            tasks.detach_all();
            abandoned
        }
    }
}
