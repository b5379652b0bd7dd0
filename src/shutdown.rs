//! Cooperative shutdown signal
//!
//! Long-running tasks either poll [`ShutdownSignal::is_triggered`] at loop
//! boundaries or use [`ShutdownSignal::sleep`], which races a timer against the
//! signal and returns early instead of erroring.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::info;

/// Clonable shutdown flag shared by the orchestrator and every task it spawns
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once shutdown has been requested
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        // Sender outlives every clone of self
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_triggered() {
            return false;
        }
        tokio::select! {
            _ = self.wait() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    /// Trigger this signal on SIGINT or SIGTERM
    pub fn install_os_handlers(&self) -> std::io::Result<tokio::task::JoinHandle<()>> {
        let signal = self.clone();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal as unix_signal, SignalKind};
            let mut sigint = unix_signal(SignalKind::interrupt())?;
            let mut sigterm = unix_signal(SignalKind::terminate())?;

            Ok(tokio::spawn(async move {
                tokio::select! {
                    _ = sigint.recv() => info!("Received SIGINT, shutting down gracefully"),
                    _ = sigterm.recv() => info!("Received SIGTERM, shutting down gracefully"),
                    _ = signal.wait() => return,
                }
                signal.trigger();
            }))
        }

        #[cfg(not(unix))]
        {
            Ok(tokio::spawn(async move {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            tracing::warn!("Failed to listen for Ctrl-C: {}", e);
                            return;
                        }
                        info!("Received Ctrl-C, shutting down gracefully");
                    }
                    _ = signal.wait() => return,
                }
                signal.trigger();
            }))
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}
