//! Graceful shutdown coordination via `CancellationToken`.
//!
//! Cancelling the token makes every live session close its socket with 1001
//! (rejecting any pending callback) and stops the listener from accepting new
//! upgrades. Sessions run outside axum's own graceful shutdown, so they are
//! tracked separately and drained alongside the listener task.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{info, warn};

/// Used by [`ShutdownCoordinator::graceful_shutdown`] when no timeout is given.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Coordinates shutdown of a server and its sessions.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
    sessions: TaskTracker,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the cancellation token, handed to each session.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Tracker for live session tasks.
    pub fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Signal shutdown without waiting.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether shutdown has been signalled.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Signal shutdown, then wait up to `timeout` for `handles` and every
    /// tracked session to finish.
    ///
    /// `handles` still running after the timeout are aborted.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        self.sessions.close();
        info!(
            task_count = handles.len(),
            session_count = self.sessions.len(),
            timeout_secs = timeout.as_secs(),
            "draining server tasks"
        );

        let aborts: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let drain = async {
            let _ = futures::future::join_all(handles).await;
            self.sessions.wait().await;
        };

        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!(?timeout, "shutdown timed out, aborting remaining tasks");
            for handle in aborts {
                handle.abort();
            }
        }
    }
}
