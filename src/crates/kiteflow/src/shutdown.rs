//! Graceful shutdown handling
//!
//! On SIGINT or SIGTERM the scheduler stops admitting new accounts. Accounts
//! already running finish their current plan; there is no mid-task
//! cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::{error, info, warn};

/// Shared stop flag for the account scheduler
#[derive(Clone)]
pub struct ShutdownCoordinator {
    requested: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl std::fmt::Debug for ShutdownCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShutdownCoordinator")
            .field("requested", &self.requested.load(Ordering::SeqCst))
            .finish()
    }
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            requested: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Stop admitting new accounts; idempotent
    pub fn request_shutdown(&self) {
        if !self.requested.swap(true, Ordering::SeqCst) {
            info!("Shutdown requested, no new accounts will start");
            self.notify.notify_waiters();
        }
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Resolve once shutdown is requested
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Spawn a task that requests shutdown on SIGINT or SIGTERM
    pub fn install_signal_handlers(&self) -> tokio::task::JoinHandle<()> {
        let coordinator = self.clone();

        tokio::spawn(async move {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{signal, SignalKind};

                let (mut sigint, mut sigterm) =
                    match (signal(SignalKind::interrupt()), signal(SignalKind::terminate())) {
                        (Ok(sigint), Ok(sigterm)) => (sigint, sigterm),
                        (Err(e), _) | (_, Err(e)) => {
                            error!(error = %e, "Failed to install signal handlers");
                            return;
                        }
                    };

                tokio::select! {
                    _ = sigint.recv() => warn!("Received SIGINT, finishing running accounts"),
                    _ = sigterm.recv() => warn!("Received SIGTERM, finishing running accounts"),
                }
                coordinator.request_shutdown();
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "Failed to install Ctrl+C handler");
                    return;
                }
                warn!("Received Ctrl+C, finishing running accounts");
                coordinator.request_shutdown();
            }
        })
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
