// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Verification status polling with staleness filtering.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::api::{DelegationApi, VerificationStatus};
use crate::link::DelegationToken;
use crate::submit::DEFAULT_REJECTION;
use crate::task::TaskHandle;

/// Terminal outcome reported by a poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollSignal {
    Verified,
    Failed { error: String },
}

/// Whether a poll result stamped `submitted_at` belongs to the submission
/// made at `last_submission`, allowing `tolerance` of clock skew.
pub fn is_current(
    submitted_at: DateTime<Utc>,
    last_submission: DateTime<Utc>,
    tolerance: Duration,
) -> bool {
    let tolerance = chrono::Duration::from_std(tolerance).unwrap_or(chrono::Duration::MAX);
    match last_submission.checked_sub_signed(tolerance) {
        Some(floor) => submitted_at >= floor,
        None => true,
    }
}

/// Polls the backend for the outcome of one submission round.
pub struct StatusPoller {
    api: Arc<dyn DelegationApi>,
    interval: Duration,
    tolerance: Duration,
}

impl StatusPoller {
    pub fn new(api: Arc<dyn DelegationApi>, interval: Duration, tolerance: Duration) -> Self {
        Self { api, interval, tolerance }
    }

    /// Start polling for the round submitted at `last_submission`.
    ///
    /// The first request goes out one interval after start. Stale and
    /// `pending` results, as well as failed requests, keep the poller
    /// ticking; there is no attempt limit. `on_signal` runs at most once,
    /// after which the poller stops.
    pub fn start<F>(
        &self,
        token: DelegationToken,
        last_submission: DateTime<Utc>,
        on_signal: F,
    ) -> TaskHandle
    where
        F: FnOnce(PollSignal) + Send + 'static,
    {
        let api = Arc::clone(&self.api);
        let period = self.interval;
        let tolerance = self.tolerance;

        TaskHandle::spawn("status-poller", move |cancel| async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            interval.tick().await;

            loop {
                interval.tick().await;

                let result = match api.poll_status(&token).await {
                    Ok(r) => r,
                    Err(e) => {
                        debug!(%token, err = %e, "status poll failed");
                        continue;
                    }
                };

                if !is_current(result.submitted_at, last_submission, tolerance) {
                    debug!(
                        %token,
                        submitted_at = %result.submitted_at,
                        last_submission = %last_submission,
                        "discarding stale poll result"
                    );
                    continue;
                }

                if !result.status.is_terminal() {
                    continue;
                }
                let signal = if result.status == VerificationStatus::Verified {
                    PollSignal::Verified
                } else {
                    PollSignal::Failed {
                        error: result
                            .error
                            .filter(|e| !e.trim().is_empty())
                            .unwrap_or_else(|| DEFAULT_REJECTION.to_owned()),
                    }
                };
                if cancel.is_cancelled() {
                    return;
                }
                debug!(%token, status = result.status.as_str(), "poll reached terminal status");
                on_signal(signal);
                return;
            }
        })
    }
}

#[cfg(test)]
#[path = "poller_tests.rs"]
mod tests;
