//! Cooperative cancellation shared by the dev server and the watcher.

use tokio::sync::watch;

/// Receiving side of the shutdown signal.
///
/// Clones observe the same signal. The blocking watcher polls
/// [`Shutdown::is_cancelled`]; async tasks await [`Shutdown::cancelled`].
#[derive(Debug, Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

/// Sending side of the shutdown signal.
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

impl ShutdownTrigger {
    /// Signal every [`Shutdown`] handle.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }
}

impl Shutdown {
    /// Create a linked trigger and handle.
    #[must_use]
    pub fn channel() -> (ShutdownTrigger, Self) {
        let (tx, rx) = watch::channel(false);
        (ShutdownTrigger { tx }, Self { rx })
    }

    /// Create a handle that fires on Ctrl-C or SIGTERM.
    ///
    /// Must be called inside a tokio runtime.
    #[must_use]
    pub fn on_signal() -> Self {
        let (trigger, shutdown) = Self::channel();
        tokio::spawn(async move {
            wait_for_signal().await;
            tracing::info!("shutdown signal received");
            trigger.trigger();
        });
        shutdown
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until shutdown is requested.
    ///
    /// Also returns if the trigger is dropped.
    pub async fn cancelled(mut self) {
        // An Err from wait_for means the sender is gone.
        let _ = self.rx.wait_for(|cancelled| *cancelled).await;
    }
}

async fn wait_for_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_reaches_all_clones() {
        let (trigger, shutdown) = Shutdown::channel();
        let other = shutdown.clone();
        assert!(!shutdown.is_cancelled());

        trigger.trigger();

        assert!(shutdown.is_cancelled());
        assert!(other.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), other.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_returns_when_trigger_dropped() {
        let (trigger, shutdown) = Shutdown::channel();
        drop(trigger);

        tokio::time::timeout(Duration::from_secs(1), shutdown.cancelled())
            .await
            .unwrap();
    }
}
