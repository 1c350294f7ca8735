// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::time::Duration;

use super::*;
use crate::credential::SystemType;
use crate::test_support::{servicenow_credentials, submit_result, token, ScriptedApi};

#[tokio::test]
async fn empty_payload_is_rejected_without_call() {
    let api = ScriptedApi::new().build();
    let submitter = CredentialSubmitter::new(Arc::clone(&api) as Arc<dyn DelegationApi>);
    let empty = Credentials::new(SystemType::JiraItsm, BTreeMap::new());

    let result = submitter.begin(&token("tok"), empty);
    assert!(matches!(result, Err(DelegationError::EmptyCredentials)));
    assert_eq!(api.submit_calls(), 0);
}

#[tokio::test]
async fn timestamp_is_taken_before_response_resolves() -> anyhow::Result<()> {
    let api = ScriptedApi::new().submit_delay(Duration::from_millis(50)).build();
    let submitter = CredentialSubmitter::new(Arc::clone(&api) as Arc<dyn DelegationApi>);

    let before = Utc::now();
    let submission = submitter
        .begin(&token("tok"), servicenow_credentials())
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let after_begin = Utc::now();
    assert!(submission.started_at >= before);
    assert!(submission.started_at <= after_begin);

    let resp = submission.response.await?;
    assert_eq!(resp.status, VerificationStatus::Pending);
    assert_eq!(api.submit_calls(), 1);
    assert_eq!(api.submitted(), vec![servicenow_credentials()]);
    Ok(())
}

#[tokio::test]
async fn transport_failure_is_returned() -> anyhow::Result<()> {
    let api = ScriptedApi::new()
        .submit_responses(vec![Err(TransportError::new("connection refused"))])
        .build();
    let submitter = CredentialSubmitter::new(api);
    let submission = submitter
        .begin(&token("tok"), servicenow_credentials())
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    crate::assert_err_contains!(submission.response.await, "connection refused");
    Ok(())
}

#[yare::parameterized(
    verified = { submit_result(VerificationStatus::Verified, None), SubmissionOutcome::Verified },
    pending = { submit_result(VerificationStatus::Pending, None), SubmissionOutcome::Pending },
    failed = {
        submit_result(VerificationStatus::Failed, Some("bad credentials")),
        SubmissionOutcome::Rejected("bad credentials".to_owned())
    },
    failed_silent = {
        submit_result(VerificationStatus::Failed, Some(" ")),
        SubmissionOutcome::Rejected(DEFAULT_REJECTION.to_owned())
    },
)]
fn classify(resp: SubmitResponse, expected: SubmissionOutcome) {
    assert_eq!(SubmissionOutcome::from(&resp), expected);
}
