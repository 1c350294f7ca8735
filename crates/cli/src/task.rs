// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Cancellable background task handle shared by the poller, the countdown,
//! and in-flight backend calls.

use std::future::Future;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Owns one spawned task. Cancelling (or dropping) the handle stops the
/// task before its next await point; a cancelled task never resumes.
pub struct TaskHandle {
    name: &'static str,
    cancel: CancellationToken,
    join: Option<JoinHandle<()>>,
}

impl TaskHandle {
    /// Spawn `make(cancel)` on the runtime. The future also receives the
    /// token so it can check for cancellation before reporting results.
    pub fn spawn<F, Fut>(name: &'static str, make: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let cancel = CancellationToken::new();
        let fut = make(cancel.clone());
        let sd = cancel.clone();
        let join = tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = sd.cancelled() => {}
                _ = fut => {}
            }
        });
        Self { name, cancel, join: Some(join) }
    }

    /// Stop the task. Idempotent.
    pub fn cancel(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();
        if let Some(join) = self.join.take() {
            join.abort();
        }
        debug!(task = self.name, "task cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// True once the task ran to completion or was cancelled.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().is_none_or(|j| j.is_finished())
    }
}

impl Drop for TaskHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("name", &self.name)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

#[cfg(test)]
#[path = "task_tests.rs"]
mod tests;
