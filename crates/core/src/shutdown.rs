//! Cooperative cancellation for in-flight runs
//!
//! A [`ShutdownFlag`] is raised once by the interrupt collaborator and
//! stays raised for the remainder of the run. Pipelines poll it between
//! items and at every suspension point; the current atomic write or batch
//! commit is always allowed to finish.

use tokio_util::sync::CancellationToken;
use tracing::info;

/// Process-wide shutdown flag, set by an interrupt source and read-only to
/// the pipelines. Cloning shares the underlying flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    token: CancellationToken,
}

impl ShutdownFlag {
    /// Create an unraised flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent; the flag never clears.
    pub fn raise(&self) {
        if !self.token.is_cancelled() {
            info!("Shutdown requested");
            self.token.cancel();
        }
    }

    /// Whether the flag has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve once the flag is raised. Returns immediately if it already
    /// is.
    pub async fn raised(&self) {
        self.token.cancelled().await;
    }
}

/// Install SIGINT/SIGTERM handlers (Ctrl-C and Ctrl-Break on Windows) that
/// raise the returned flag.
///
/// Must be called from within a tokio runtime. The handler task runs for
/// the life of the process; repeated signals simply find the flag already
/// raised.
#[must_use]
pub fn install_signal_handlers() -> ShutdownFlag {
    let flag = ShutdownFlag::new();
    let raised = flag.clone();

    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};

            let Ok(mut sigterm) = signal(SignalKind::terminate()) else {
                tracing::warn!("Failed to install SIGTERM handler");
                return;
            };
            let Ok(mut sigint) = signal(SignalKind::interrupt()) else {
                tracing::warn!("Failed to install SIGINT handler");
                return;
            };

            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        }

        #[cfg(windows)]
        {
            use tokio::signal::windows;

            let Ok(mut ctrl_c) = windows::ctrl_c() else {
                tracing::warn!("Failed to install Ctrl+C handler");
                return;
            };
            let Ok(mut ctrl_break) = windows::ctrl_break() else {
                tracing::warn!("Failed to install Ctrl+Break handler");
                return;
            };

            tokio::select! {
                _ = ctrl_c.recv() => info!("Received Ctrl+C"),
                _ = ctrl_break.recv() => info!("Received Ctrl+Break"),
            }
        }

        raised.raise();
    });

    flag
}
