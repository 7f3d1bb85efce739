//! Shutdown coordination.
//!
//! [`SigDown`] cancels a shared [`CancellationToken`] on SIGTERM or SIGINT. Background
//! tasks (HTTP server, verification sweeper) watch the token and are spawned on the
//! [`TaskTracker`] so shutdown can wait for them to drain.

use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

pub struct SigDown {
    task_tracker: TaskTracker,
    cancellation_token: CancellationToken,
}

impl SigDown {
    /// Installs the signal handlers.
    ///
    /// Returns an error if signal registration fails.
    pub fn try_new() -> Result<Self, std::io::Error> {
        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;
        let cancellation_token = CancellationToken::new();
        let task_tracker = TaskTracker::new();
        let token = cancellation_token.clone();
        task_tracker.spawn(async move {
            tokio::select! {
                _ = sigterm.recv() => tracing::info!("SIGTERM received, shutting down"),
                _ = sigint.recv() => tracing::info!("SIGINT received, shutting down"),
                _ = token.cancelled() => {}
            }
            token.cancel();
        });
        Ok(Self {
            task_tracker,
            cancellation_token,
        })
    }

    /// Token cancelled on shutdown, for distributing to subsystems.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Tracker for background tasks that must finish before the process exits.
    pub fn task_tracker(&self) -> &TaskTracker {
        &self.task_tracker
    }

    /// Waits for a shutdown signal.
    pub async fn recv(&self) {
        self.cancellation_token.cancelled().await;
    }

    /// Cancels every subsystem and waits up to `grace` for tracked tasks to finish.
    ///
    /// Returns `false` if some tasks were still running when the grace period ended.
    pub async fn shutdown(&self, grace: Duration) -> bool {
        self.cancellation_token.cancel();
        self.task_tracker.close();
        let drained = tokio::time::timeout(grace, self.task_tracker.wait())
            .await
            .is_ok();
        if !drained {
            tracing::warn!(
                pending = self.task_tracker.len(),
                "Background tasks still running after grace period"
            );
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shutdown_waits_for_tracked_tasks() {
        let sig_down = SigDown::try_new().unwrap();
        let token = sig_down.cancellation_token();
        let (tx, rx) = tokio::sync::oneshot::channel();
        sig_down.task_tracker().spawn(async move {
            token.cancelled().await;
            tx.send(()).unwrap();
        });

        assert!(sig_down.shutdown(Duration::from_secs(1)).await);
        rx.await.unwrap();
        sig_down.recv().await;
    }
}
