//! Signal plumbing: SIGTERM/SIGINT shut the daemon down, SIGHUP requests a
//! config reload. Reloads coalesce through a capacity-1 channel; any number
//! of SIGHUPs while one is pending collapse into a single reload.

use common::Result;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Channels produced by the signal listener.
pub struct SignalHandles {
    /// Flips to `true` once on SIGTERM/SIGINT.
    pub shutdown: watch::Receiver<bool>,
    /// One `()` per coalesced SIGHUP.
    pub reload: mpsc::Receiver<()>,
}

/// Install the signal handlers and spawn the listener task.
#[cfg(unix)]
pub fn spawn_signal_listener() -> Result<SignalHandles> {
    use tokio::signal::unix::{SignalKind, signal};

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (reload_tx, reload_rx) = mpsc::channel(1);

    let mut sighup = signal(SignalKind::hangup())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    // Full channel means a reload is already pending.
                    let _ = reload_tx.try_send(());
                }
                _ = sigterm.recv() => {
                    info!(signal = "SIGTERM", "termination signal received");
                    let _ = shutdown_tx.send(true);
                    return;
                }
                _ = sigint.recv() => {
                    info!(signal = "SIGINT", "termination signal received");
                    let _ = shutdown_tx.send(true);
                    return;
                }
            }
        }
    });

    Ok(SignalHandles {
        shutdown: shutdown_rx,
        reload: reload_rx,
    })
}
