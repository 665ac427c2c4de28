//! Shutdown coordination

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Outcome of a shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ShutdownReport {
    /// Tasks that finished before the deadline
    pub completed: usize,
    /// Tasks that missed the deadline and were aborted
    pub aborted: usize,
}

/// Cancels the bridge on a signal and waits for its session tasks
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    timeout: Duration,
}

impl ShutdownCoordinator {
    /// Coordinator bounding shutdown by `timeout`
    pub fn new(timeout: Duration) -> Self {
        Self {
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            timeout,
        }
    }

    /// Token every session task observes
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for this task on shutdown
    pub fn track(&mut self, handle: JoinHandle<()>) {
        self.tasks.push(handle);
    }

    /// Wait for `signal`, then shut down
    pub async fn run_until<F>(self, signal: F) -> ShutdownReport
    where
        F: Future<Output = ()>,
    {
        signal.await;
        tracing::info!("Received shutdown signal. Disconnecting...");
        self.shutdown().await
    }

    /// Cancel every task and wait for them, bounded by the timeout
    pub async fn shutdown(self) -> ShutdownReport {
        self.cancel.cancel();

        let deadline = Instant::now() + self.timeout;
        let mut report = ShutdownReport::default();

        for mut handle in self.tasks {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => report.completed += 1,
                Ok(Err(e)) => {
                    tracing::warn!("Session task failed: {}", e);
                    report.completed += 1;
                }
                Err(_) => {
                    handle.abort();
                    report.aborted += 1;
                }
            }
        }

        if report.aborted > 0 {
            tracing::warn!(
                "{} session tasks did not stop within {}s, aborted",
                report.aborted,
                self.timeout.as_secs()
            );
        }
        tracing::info!("Shutdown complete ({} session tasks stopped)", report.completed);
        report
    }
}

/// Resolves on Ctrl+C, or SIGTERM on unix
pub async fn interrupt_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
