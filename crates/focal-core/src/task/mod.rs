//! Killable task abstraction.
//!
//! The general pattern for bounding any blocking call whose callee offers no
//! cooperative cancellation: spawn it isolated, join with a timeout, kill on
//! expiry. Latency probes, bootstrap attempts, and collector workers all run
//! under this wrapper. `kill` maps to `JoinHandle::abort`, which takes
//! effect at the task's next suspension point; every suspension point in
//! those tasks is network I/O or a store call.

use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::debug;

/// A spawned task that can be joined with a deadline or killed outright.
pub struct KillableTask<T> {
    label: String,
    handle: JoinHandle<T>,
}

impl<T: Send + 'static> KillableTask<T> {
    /// Spawns the future as an independent task.
    pub fn spawn<F>(label: impl Into<String>, future: F) -> Self
    where
        F: std::future::Future<Output = T> + Send + 'static,
    {
        Self { label: label.into(), handle: tokio::spawn(future) }
    }

    /// Waits up to `deadline` for the task to finish.
    ///
    /// Returns `Some(output)` on completion; on expiry the task is killed
    /// and `None` is returned. A task that panicked or was already killed
    /// also yields `None`.
    pub async fn join_timeout(mut self, deadline: Duration) -> Option<T> {
        match tokio::time::timeout(deadline, &mut self.handle).await {
            Ok(Ok(output)) => Some(output),
            Ok(Err(join_error)) => {
                debug!(task = %self.label, error = %join_error, "task did not complete");
                None
            }
            Err(_elapsed) => {
                debug!(task = %self.label, "task deadline expired, killing");
                self.handle.abort();
                None
            }
        }
    }

    /// Kills the task unconditionally. Idempotent.
    pub fn kill(&self) {
        self.handle.abort();
    }

    /// Whether the task has run to completion (or been killed).
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }
}
