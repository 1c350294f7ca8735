// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delegation state machine: the single owner of page state.
//!
//! Runs as one task consuming an event queue. Backend calls, the poller,
//! and the countdown run on their own tasks and report back as events, so
//! the loop stays responsive to `cancel`/`exit` while any of them is in
//! flight. Observers read [`Snapshot`]s from a watch channel.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::api::{DelegationApi, SubmitResponse};
use crate::countdown::{CountdownEvent, SessionCountdown, Termination};
use crate::credential::Credentials;
use crate::error::{DelegationError, InvalidReason, TransportError};
use crate::host::SessionHost;
use crate::link::DelegationToken;
use crate::poller::{PollSignal, StatusPoller};
use crate::submit::{CredentialSubmitter, SubmissionOutcome};
use crate::task::TaskHandle;
use crate::verify::{DelegationInfo, TokenVerifier, VerificationOutcome};

/// Timing knobs for one machine instance.
#[derive(Debug, Clone)]
pub struct MachineConfig {
    pub poll_interval: Duration,
    pub staleness_tolerance: Duration,
    pub countdown_secs: u64,
    /// Length of one countdown step. One second outside tests.
    pub countdown_tick: Duration,
    pub verify_retries: u32,
    pub verify_backoff: Duration,
}

impl Default for MachineConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(2000),
            staleness_tolerance: Duration::from_millis(5000),
            countdown_secs: 90,
            countdown_tick: Duration::from_secs(1),
            verify_retries: 2,
            verify_backoff: Duration::from_millis(500),
        }
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationCause {
    /// The post-success countdown reached zero.
    CountdownElapsed,
    /// The user chose to exit after success.
    Exited,
    /// The host tore the session down.
    Cancelled,
}

/// Page state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageState {
    Loading,
    Invalid { reason: InvalidReason },
    Form { error: Option<DelegationError> },
    Submitting,
    Verifying,
    Success { remaining_secs: u64 },
    Terminated { cause: TerminationCause },
}

impl PageState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "loading",
            Self::Invalid { .. } => "invalid",
            Self::Form { .. } => "form",
            Self::Submitting => "submitting",
            Self::Verifying => "verifying",
            Self::Success { .. } => "success",
            Self::Terminated { .. } => "terminated",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Invalid { .. } | Self::Terminated { .. })
    }

    /// Whether a submission is accepted. Outside `form` a submission
    /// supersedes the round in flight.
    pub fn accepts_submit(&self) -> bool {
        matches!(self, Self::Form { .. } | Self::Submitting | Self::Verifying)
    }

    /// Whether the page shows an indeterminate progress indicator.
    pub fn shows_progress(&self) -> bool {
        matches!(self, Self::Loading | Self::Submitting | Self::Verifying)
    }

    /// Extra notice shown alongside the state.
    pub fn notice(&self) -> Option<&'static str> {
        match self {
            Self::Verifying => Some("Do not close this page while verification is in progress."),
            _ => None,
        }
    }
}

/// Everything an observer needs to render the page.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub state: PageState,
    pub delegation: Option<DelegationInfo>,
    /// Non-secret fields of the last submission, for re-populating the form.
    pub draft: Option<Credentials>,
    pub last_submission: Option<DateTime<Utc>>,
    /// Submission round counter; 0 before the first submission.
    pub round: u64,
    /// Bumped on every published change.
    pub seq: u64,
}

impl Snapshot {
    fn initial() -> Self {
        Self {
            state: PageState::Loading,
            delegation: None,
            draft: None,
            last_submission: None,
            round: 0,
            seq: 0,
        }
    }
}

enum Command {
    Submit(Credentials),
    Retry,
    Exit,
    Cancel,
}

enum Event {
    Command(Command),
    Verified(Result<VerificationOutcome, TransportError>),
    Submitted { round: u64, result: Result<SubmitResponse, TransportError> },
    Polled { round: u64, signal: PollSignal },
    Countdown(CountdownEvent),
}

/// Control surface held by the host. Dropping it tears the session down.
pub struct MachineHandle {
    events: mpsc::UnboundedSender<Event>,
    state_rx: watch::Receiver<Snapshot>,
    join: Option<JoinHandle<Snapshot>>,
}

impl MachineHandle {
    /// Submit credentials for the current token.
    pub fn submit(&self, credentials: Credentials) -> anyhow::Result<()> {
        self.send(Command::Submit(credentials))
    }

    /// Dismiss the error shown on the form.
    pub fn retry(&self) -> anyhow::Result<()> {
        self.send(Command::Retry)
    }

    /// Manual exit after success.
    pub fn exit(&self) -> anyhow::Result<()> {
        self.send(Command::Exit)
    }

    /// Tear the session down, cancelling any poller or countdown.
    pub fn cancel(&self) -> anyhow::Result<()> {
        self.send(Command::Cancel)
    }

    pub fn snapshot(&self) -> Snapshot {
        self.state_rx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.state_rx.clone()
    }

    /// Wait for the machine to reach a terminal state and return the final
    /// snapshot.
    pub async fn wait(&mut self) -> anyhow::Result<Snapshot> {
        let join =
            self.join.take().ok_or_else(|| anyhow::anyhow!("machine already awaited"))?;
        Ok(join.await?)
    }

    fn send(&self, command: Command) -> anyhow::Result<()> {
        self.events
            .send(Event::Command(command))
            .map_err(|_| anyhow::anyhow!("delegation session has ended"))
    }
}

impl Drop for MachineHandle {
    fn drop(&mut self) {
        let _ = self.events.send(Event::Command(Command::Cancel));
    }
}

/// The orchestrator. Created and driven through [`DelegationStateMachine::spawn`].
pub struct DelegationStateMachine {
    token: Option<DelegationToken>,
    host: Arc<dyn SessionHost>,
    verifier: Arc<TokenVerifier>,
    submitter: CredentialSubmitter,
    poller: StatusPoller,
    countdown: SessionCountdown,
    termination: Arc<Termination>,
    events_tx: mpsc::UnboundedSender<Event>,
    events_rx: mpsc::UnboundedReceiver<Event>,
    state_tx: watch::Sender<Snapshot>,
    snapshot: Snapshot,
    verify_task: Option<TaskHandle>,
    submit_task: Option<TaskHandle>,
    poll_task: Option<TaskHandle>,
    countdown_task: Option<TaskHandle>,
}

impl DelegationStateMachine {
    /// Start a session for `token` (as read from the entry URL).
    pub fn spawn(
        config: MachineConfig,
        api: Arc<dyn DelegationApi>,
        host: Arc<dyn SessionHost>,
        token: Option<DelegationToken>,
    ) -> MachineHandle {
        let (machine, state_rx) = Self::new(config, api, host, token);
        let events = machine.events_tx.clone();
        let join = tokio::spawn(machine.run());
        MachineHandle { events, state_rx, join: Some(join) }
    }

    fn new(
        config: MachineConfig,
        api: Arc<dyn DelegationApi>,
        host: Arc<dyn SessionHost>,
        token: Option<DelegationToken>,
    ) -> (Self, watch::Receiver<Snapshot>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(Snapshot::initial());

        let termination = {
            let host = Arc::clone(&host);
            Termination::new(move || host.terminate())
        };

        let machine = Self {
            token,
            host,
            verifier: Arc::new(TokenVerifier::new(
                Arc::clone(&api),
                config.verify_retries,
                config.verify_backoff,
            )),
            submitter: CredentialSubmitter::new(Arc::clone(&api)),
            poller: StatusPoller::new(api, config.poll_interval, config.staleness_tolerance),
            countdown: SessionCountdown::new(config.countdown_secs, config.countdown_tick),
            termination,
            events_tx,
            events_rx,
            state_tx,
            snapshot: Snapshot::initial(),
            verify_task: None,
            submit_task: None,
            poll_task: None,
            countdown_task: None,
        };
        (machine, state_rx)
    }

    async fn run(mut self) -> Snapshot {
        self.start();
        while !self.snapshot.state.is_terminal() {
            let Some(event) = self.events_rx.recv().await else {
                break;
            };
            self.handle(event);
        }
        self.cancel_tasks();
        debug!(state = self.snapshot.state.as_str(), "delegation session ended");
        self.snapshot
    }

    fn start(&mut self) {
        let Some(token) = self.token.clone() else {
            self.enter_invalid(DelegationError::TokenMissing);
            return;
        };
        info!(%token, "verifying delegation token");
        let verifier = Arc::clone(&self.verifier);
        let tx = self.events_tx.clone();
        self.verify_task = Some(TaskHandle::spawn("token-verify", move |_| async move {
            let result = verifier.verify(Some(&token)).await;
            let _ = tx.send(Event::Verified(result));
        }));
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Verified(result) => self.on_verified(result),
            Event::Submitted { round, result } => self.on_submitted(round, result),
            Event::Polled { round, signal } => self.on_polled(round, signal),
            Event::Countdown(event) => self.on_countdown(event),
            Event::Command(Command::Submit(credentials)) => self.on_submit(credentials),
            Event::Command(Command::Retry) => self.on_retry(),
            Event::Command(Command::Exit) => self.on_exit(),
            Event::Command(Command::Cancel) => self.on_cancel(),
        }
    }

    fn on_verified(&mut self, result: Result<VerificationOutcome, TransportError>) {
        self.verify_task = None;
        if self.snapshot.state != PageState::Loading {
            return;
        }
        match result {
            Ok(VerificationOutcome::Valid(info)) => {
                info!(
                    system = %info.system_type,
                    org = %info.org_name,
                    "delegation token valid"
                );
                self.snapshot.delegation = Some(info);
                self.set_state(PageState::Form { error: None });
            }
            Ok(VerificationOutcome::Invalid(reason)) => {
                self.enter_invalid(DelegationError::from_reason(reason));
            }
            Err(e) => {
                warn!(err = %e, "token verify failed, treating link as not found");
                self.enter_invalid(DelegationError::TokenNotFound);
            }
        }
    }

    fn on_submit(&mut self, credentials: Credentials) {
        if !self.snapshot.state.accepts_submit() {
            warn!(state = self.snapshot.state.as_str(), "submit ignored");
            return;
        }
        let Some(token) = self.token.clone() else {
            return;
        };

        let draft = credentials.retained_draft();
        let submission = match self.submitter.begin(&token, credentials) {
            Ok(s) => s,
            Err(e) => {
                debug!(err = %e, "submission refused");
                // A refused payload never supersedes a round in flight.
                if matches!(self.snapshot.state, PageState::Form { .. }) {
                    self.set_state(PageState::Form { error: Some(e) });
                }
                return;
            }
        };

        self.cancel_poller();
        if let Some(mut task) = self.submit_task.take() {
            task.cancel();
        }

        self.snapshot.round += 1;
        self.snapshot.last_submission = Some(submission.started_at);
        self.snapshot.draft = Some(draft);
        let round = self.snapshot.round;
        info!(round, "credentials submitted");
        self.set_state(PageState::Submitting);

        let tx = self.events_tx.clone();
        let response = submission.response;
        self.submit_task = Some(TaskHandle::spawn("credential-submit", move |_| async move {
            let result = response.await;
            let _ = tx.send(Event::Submitted { round, result });
        }));
    }

    fn on_submitted(&mut self, round: u64, result: Result<SubmitResponse, TransportError>) {
        if round != self.snapshot.round || self.snapshot.state != PageState::Submitting {
            debug!(round, current = self.snapshot.round, "dropping superseded submit response");
            return;
        }
        self.submit_task = None;

        let resp = match result {
            Ok(r) => r,
            Err(e) => {
                warn!(round, err = %e, "credential submit failed");
                self.set_state(PageState::Form { error: Some(DelegationError::Transport(e)) });
                return;
            }
        };

        match SubmissionOutcome::from(&resp) {
            SubmissionOutcome::Verified => {
                info!(round, delegation_id = %resp.delegation_id, "credentials verified on submit");
                self.enter_success();
            }
            SubmissionOutcome::Rejected(reason) => {
                info!(round, "credentials rejected on submit");
                self.set_state(PageState::Form {
                    error: Some(DelegationError::VerificationRejected(reason)),
                });
            }
            SubmissionOutcome::Pending => {
                info!(round, delegation_id = %resp.delegation_id, "verification pending");
                self.set_state(PageState::Verifying);
                self.start_poller(round);
            }
        }
    }

    fn start_poller(&mut self, round: u64) {
        let (Some(token), Some(last_submission)) =
            (self.token.clone(), self.snapshot.last_submission)
        else {
            return;
        };
        self.cancel_poller();
        let tx = self.events_tx.clone();
        self.poll_task = Some(self.poller.start(token, last_submission, move |signal| {
            let _ = tx.send(Event::Polled { round, signal });
        }));
    }

    fn on_polled(&mut self, round: u64, signal: PollSignal) {
        if round != self.snapshot.round || self.snapshot.state != PageState::Verifying {
            debug!(round, current = self.snapshot.round, "dropping poll signal from superseded round");
            return;
        }
        self.cancel_poller();
        match signal {
            PollSignal::Verified => {
                info!(round, "credentials verified");
                self.enter_success();
            }
            PollSignal::Failed { error } => {
                info!(round, "credential verification failed");
                self.set_state(PageState::Form {
                    error: Some(DelegationError::VerificationRejected(error)),
                });
            }
        }
    }

    fn enter_success(&mut self) {
        self.cancel_poller();
        self.snapshot.draft = None;
        self.set_state(PageState::Success { remaining_secs: self.countdown.duration_secs() });

        let tx = self.events_tx.clone();
        self.countdown_task =
            Some(self.countdown.start(Arc::clone(&self.termination), move |event| {
                let _ = tx.send(Event::Countdown(event));
            }));
    }

    fn on_countdown(&mut self, event: CountdownEvent) {
        if !matches!(self.snapshot.state, PageState::Success { .. }) {
            return;
        }
        match event {
            CountdownEvent::Tick { remaining_secs } => {
                self.set_state(PageState::Success { remaining_secs });
            }
            CountdownEvent::Elapsed => {
                self.countdown_task = None;
                self.set_state(PageState::Terminated { cause: TerminationCause::CountdownElapsed });
            }
        }
    }

    fn on_retry(&mut self) {
        if let PageState::Form { error: Some(_) } = self.snapshot.state {
            self.set_state(PageState::Form { error: None });
        }
    }

    fn on_exit(&mut self) {
        if !matches!(self.snapshot.state, PageState::Success { .. }) {
            debug!(state = self.snapshot.state.as_str(), "exit ignored outside success");
            return;
        }
        if let Some(mut task) = self.countdown_task.take() {
            task.cancel();
        }
        let cause = if self.termination.fire() {
            TerminationCause::Exited
        } else {
            TerminationCause::CountdownElapsed
        };
        self.set_state(PageState::Terminated { cause });
    }

    fn on_cancel(&mut self) {
        if self.snapshot.state.is_terminal() {
            return;
        }
        // The countdown may have fired before its Elapsed event got here.
        let cause = if matches!(self.snapshot.state, PageState::Success { .. })
            && self.termination.has_fired()
        {
            TerminationCause::CountdownElapsed
        } else {
            TerminationCause::Cancelled
        };
        self.cancel_tasks();
        self.set_state(PageState::Terminated { cause });
    }

    /// Enter `invalid` for a link-level error and redirect the host.
    fn enter_invalid(&mut self, error: DelegationError) {
        let reason = error.invalid_reason().unwrap_or(InvalidReason::NotFound);
        info!(code = error.as_str(), %reason, "delegation link unusable");
        self.set_state(PageState::Invalid { reason });
        self.host.redirect_invalid(reason);
    }

    fn cancel_poller(&mut self) {
        if let Some(mut task) = self.poll_task.take() {
            task.cancel();
        }
    }

    fn cancel_tasks(&mut self) {
        for mut task in [
            self.verify_task.take(),
            self.submit_task.take(),
            self.poll_task.take(),
            self.countdown_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.cancel();
        }
    }

    fn set_state(&mut self, state: PageState) {
        if self.snapshot.state != state {
            debug!(from = self.snapshot.state.as_str(), to = state.as_str(), "page state transition");
        }
        self.snapshot.state = state;
        self.snapshot.seq += 1;
        self.state_tx.send_replace(self.snapshot.clone());
    }
}

#[cfg(test)]
#[path = "machine_tests.rs"]
mod tests;
