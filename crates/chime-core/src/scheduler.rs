//! Cancellable delayed tasks.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;

/// Handle to a scheduled task.
///
/// Dropping the handle does not cancel the task: a firing task may be the one
/// that drops its own handle.
#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Cancel the task. No effect if it already ran.
    pub fn cancel(&self) {
        self.task.abort();
    }

    /// Whether the task has completed or was cancelled.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Run `task` once after `delay` on the current tokio runtime.
///
/// # Panics
///
/// Panics if called outside a tokio runtime.
pub fn schedule<F>(delay: Duration, task: F) -> TimerHandle
where
    F: Future<Output = ()> + Send + 'static,
{
    let task = tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        task.await;
    });
    TimerHandle { task }
}
