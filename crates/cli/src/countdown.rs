// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Post-success countdown that closes the session.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info};

use crate::task::TaskHandle;

/// Termination action guarded to run exactly once, whichever of the
/// countdown or the manual exit gets there first.
pub struct Termination {
    fired: AtomicBool,
    action: Box<dyn Fn() + Send + Sync>,
}

impl Termination {
    pub fn new<F>(action: F) -> Arc<Self>
    where
        F: Fn() + Send + Sync + 'static,
    {
        Arc::new(Self { fired: AtomicBool::new(false), action: Box::new(action) })
    }

    /// Run the action if it has not run yet. Returns whether this call ran it.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::SeqCst) {
            return false;
        }
        (self.action)();
        true
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::SeqCst)
    }
}

/// Progress reported by a running countdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountdownEvent {
    /// One step elapsed; `remaining_secs` is still above zero.
    Tick { remaining_secs: u64 },
    /// Reached zero and fired the termination action.
    Elapsed,
}

/// Fixed-length countdown, one step per `tick` (a second in production).
pub struct SessionCountdown {
    duration_secs: u64,
    tick: Duration,
}

impl SessionCountdown {
    pub fn new(duration_secs: u64, tick: Duration) -> Self {
        Self { duration_secs, tick }
    }

    pub fn duration_secs(&self) -> u64 {
        self.duration_secs
    }

    /// Start counting down. At zero, `termination` fires and
    /// [`CountdownEvent::Elapsed`] is reported. Each call starts an
    /// independent countdown; callers start one per success episode.
    pub fn start<F>(&self, termination: Arc<Termination>, on_event: F) -> TaskHandle
    where
        F: Fn(CountdownEvent) + Send + 'static,
    {
        let total = self.duration_secs;
        let period = self.tick;

        TaskHandle::spawn("session-countdown", move |cancel| async move {
            info!(secs = total, "session countdown started");
            let mut remaining = total;
            if remaining > 0 {
                let mut interval = tokio::time::interval(period);
                interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                interval.tick().await;
                while remaining > 0 {
                    interval.tick().await;
                    remaining -= 1;
                    if remaining > 0 {
                        on_event(CountdownEvent::Tick { remaining_secs: remaining });
                    }
                }
            }
            if cancel.is_cancelled() {
                return;
            }
            if termination.fire() {
                info!("session countdown elapsed, terminating");
            } else {
                debug!("session already terminated before countdown elapsed");
            }
            on_event(CountdownEvent::Elapsed);
        })
    }
}

#[cfg(test)]
#[path = "countdown_tests.rs"]
mod tests;
