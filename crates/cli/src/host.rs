// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Host environment callbacks injected into the state machine.

use crate::error::InvalidReason;

/// What the surrounding page (browser tab, CLI, test harness) does on the
/// machine's behalf.
pub trait SessionHost: Send + Sync + 'static {
    /// Navigate to the invalid-link surface. Called once, on entering
    /// `invalid`.
    fn redirect_invalid(&self, reason: InvalidReason);

    /// Close the session. Called at most once per success episode, by the
    /// countdown or the manual exit.
    fn terminate(&self);
}
