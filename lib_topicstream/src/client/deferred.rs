//! # Deferred Task
//!
//! A one-shot task that runs after a delay unless it is cancelled first. The
//! delay is measured on the tokio timer, so tests driving a paused runtime
//! (`#[tokio::test(start_paused = true)]`) get a deterministic virtual clock.
//!
//! The task receives its own `CancellationToken`. Cancellation can race with
//! the timer firing, so callers that share state with the task re-check
//! `token.is_cancelled()` under their own lock before acting.

use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Handle to a scheduled task. Dropping the handle cancels the task.
#[derive(Debug)]
pub struct Deferred {
    token: CancellationToken,
}

impl Deferred {
    /// Spawns `task` to run after `delay` on the current tokio runtime.
    ///
    /// # Panics
    /// Panics when called outside of a tokio runtime.
    pub fn schedule<F>(delay: Duration, task: F) -> Self
    where
        F: FnOnce(CancellationToken) + Send + 'static,
    {
        let token = CancellationToken::new();
        let child = token.clone();

        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = child.cancelled() => {}
                _ = sleep(delay) => task(child),
            }
        });

        Self { token }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// True until the task is cancelled.
    pub fn is_pending(&self) -> bool {
        !self.token.is_cancelled()
    }
}

impl Drop for Deferred {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
