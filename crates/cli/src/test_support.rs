// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: a scripted backend, a recording host, and
//! assertion helpers.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::api::{
    ApiFuture, DelegationApi, PollResponse, SubmitResponse, VerificationStatus, VerifyResponse,
};
use crate::credential::{Credentials, SystemType};
use crate::error::{InvalidReason, TransportError};
use crate::host::SessionHost;
use crate::link::DelegationToken;
use crate::machine::{MachineConfig, Snapshot};

type PollScript = Box<dyn FnMut(usize) -> Result<PollResponse, TransportError> + Send>;

/// In-memory [`DelegationApi`] driven by canned responses.
///
/// Queued verify/submit responses are consumed in order; once a queue is
/// empty the default (valid ServiceNow delegation / `pending`) is returned.
/// Polls are answered by a closure receiving the zero-based call index.
pub struct ScriptedApi {
    verify: Mutex<VecDeque<Result<VerifyResponse, TransportError>>>,
    submit: Mutex<VecDeque<Result<SubmitResponse, TransportError>>>,
    poll: Mutex<PollScript>,
    submit_delay: Duration,
    verify_calls: AtomicUsize,
    submit_calls: AtomicUsize,
    poll_calls: AtomicUsize,
    submitted: Mutex<Vec<Credentials>>,
}

impl Default for ScriptedApi {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedApi {
    pub fn new() -> Self {
        Self {
            verify: Mutex::new(VecDeque::new()),
            submit: Mutex::new(VecDeque::new()),
            poll: Mutex::new(Box::new(|_| Ok(poll_result(VerificationStatus::Pending, 0)))),
            submit_delay: Duration::ZERO,
            verify_calls: AtomicUsize::new(0),
            submit_calls: AtomicUsize::new(0),
            poll_calls: AtomicUsize::new(0),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn verify_responses(self, r: Vec<Result<VerifyResponse, TransportError>>) -> Self {
        *self.verify.lock() = r.into();
        self
    }

    pub fn submit_responses(self, r: Vec<Result<SubmitResponse, TransportError>>) -> Self {
        *self.submit.lock() = r.into();
        self
    }

    pub fn poll_with<F>(self, f: F) -> Self
    where
        F: FnMut(usize) -> Result<PollResponse, TransportError> + Send + 'static,
    {
        *self.poll.lock() = Box::new(f);
        self
    }

    pub fn submit_delay(mut self, d: Duration) -> Self {
        self.submit_delay = d;
        self
    }

    pub fn build(self) -> Arc<Self> {
        Arc::new(self)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_calls.load(Ordering::SeqCst)
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_calls.load(Ordering::SeqCst)
    }

    pub fn submitted(&self) -> Vec<Credentials> {
        self.submitted.lock().clone()
    }
}

impl DelegationApi for ScriptedApi {
    fn verify<'a>(&'a self, _token: &'a DelegationToken) -> ApiFuture<'a, VerifyResponse> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.verify.lock().pop_front();
        Box::pin(async move { next.unwrap_or_else(|| Ok(valid_servicenow())) })
    }

    fn submit<'a>(
        &'a self,
        _token: &'a DelegationToken,
        credentials: &'a Credentials,
    ) -> ApiFuture<'a, SubmitResponse> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        self.submitted.lock().push(credentials.clone());
        let next = self.submit.lock().pop_front();
        let delay = self.submit_delay;
        Box::pin(async move {
            if delay > Duration::ZERO {
                tokio::time::sleep(delay).await;
            }
            next.unwrap_or_else(|| Ok(submit_result(VerificationStatus::Pending, None)))
        })
    }

    fn poll_status<'a>(&'a self, _token: &'a DelegationToken) -> ApiFuture<'a, PollResponse> {
        let idx = self.poll_calls.fetch_add(1, Ordering::SeqCst);
        let result = {
            let mut script = self.poll.lock();
            (*script)(idx)
        };
        Box::pin(async move { result })
    }
}

/// [`SessionHost`] that records every callback.
#[derive(Default)]
pub struct RecordingHost {
    redirects: Mutex<Vec<InvalidReason>>,
    terminations: AtomicUsize,
}

impl RecordingHost {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn redirects(&self) -> Vec<InvalidReason> {
        self.redirects.lock().clone()
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

impl SessionHost for RecordingHost {
    fn redirect_invalid(&self, reason: InvalidReason) {
        self.redirects.lock().push(reason);
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
    }
}

/// Valid ServiceNow delegation for "Acme".
pub fn valid_servicenow() -> VerifyResponse {
    VerifyResponse {
        valid: true,
        system_type: Some(SystemType::ServicenowItsm),
        org_name: Some("Acme".to_owned()),
        delegated_by: Some("owner@acme.io".to_owned()),
        reason: None,
    }
}

/// Rejected verify response carrying `reason`.
pub fn rejected(reason: &str) -> VerifyResponse {
    VerifyResponse {
        valid: false,
        system_type: None,
        org_name: None,
        delegated_by: None,
        reason: Some(reason.to_owned()),
    }
}

pub fn submit_result(status: VerificationStatus, error: Option<&str>) -> SubmitResponse {
    SubmitResponse {
        delegation_id: "d-1".to_owned(),
        status,
        error: error.map(str::to_owned),
    }
}

/// Poll result stamped `offset_ms` relative to now (negative = in the past).
pub fn poll_result(status: VerificationStatus, offset_ms: i64) -> PollResponse {
    PollResponse {
        status,
        submitted_at: Utc::now() + chrono::Duration::milliseconds(offset_ms),
        error: None,
    }
}

pub fn token(raw: &str) -> DelegationToken {
    DelegationToken::new(raw).unwrap_or_else(|| unreachable!("test token must be non-empty"))
}

/// Complete ServiceNow credentials.
pub fn servicenow_credentials() -> Credentials {
    let mut fields = BTreeMap::new();
    fields.insert("instance_url".to_owned(), "https://acme.service-now.com".to_owned());
    fields.insert("username".to_owned(), "admin".to_owned());
    fields.insert("password".to_owned(), "hunter2".to_owned());
    Credentials::new(SystemType::ServicenowItsm, fields)
}

/// Fast timings for machine tests: 10ms poll, 10ms countdown tick.
pub fn fast_config() -> MachineConfig {
    MachineConfig {
        poll_interval: Duration::from_millis(10),
        staleness_tolerance: Duration::from_millis(5000),
        countdown_secs: 90,
        countdown_tick: Duration::from_millis(10),
        verify_retries: 0,
        verify_backoff: Duration::from_millis(1),
    }
}

/// Wait until the published snapshot satisfies `pred`.
pub async fn wait_for<F>(
    rx: &mut watch::Receiver<Snapshot>,
    timeout: Duration,
    pred: F,
) -> anyhow::Result<Snapshot>
where
    F: FnMut(&Snapshot) -> bool,
{
    let outcome = match tokio::time::timeout(timeout, rx.wait_for(pred)).await {
        Ok(Ok(snap)) => Some(Ok((*snap).clone())),
        Ok(Err(_)) => Some(Err(anyhow::anyhow!("state channel closed"))),
        Err(_) => None,
    };
    match outcome {
        Some(result) => result,
        None => anyhow::bail!("timed out; last state {:?}", rx.borrow().state),
    }
}

/// Assert that an expression returns `Err` whose message contains `substr`.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
