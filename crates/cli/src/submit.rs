// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential submission.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::api::{DelegationApi, SubmitResponse, VerificationStatus};
use crate::credential::Credentials;
use crate::error::{DelegationError, TransportError};
use crate::link::DelegationToken;

/// Shown when the backend fails a submission without saying why.
pub const DEFAULT_REJECTION: &str = "Credential verification failed.";

/// Owned future resolving to the backend's submission response.
pub type SubmitFuture =
    Pin<Box<dyn Future<Output = Result<SubmitResponse, TransportError>> + Send + 'static>>;

/// A submission that has been stamped but not yet resolved.
pub struct Submission {
    /// Client clock at the moment of submission. Poll results older than
    /// this (minus the staleness tolerance) belong to an earlier round.
    pub started_at: DateTime<Utc>,
    pub response: SubmitFuture,
}

/// What a submission response means for the flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionOutcome {
    Verified,
    Pending,
    Rejected(String),
}

impl From<&SubmitResponse> for SubmissionOutcome {
    fn from(resp: &SubmitResponse) -> Self {
        match resp.status {
            VerificationStatus::Verified => Self::Verified,
            VerificationStatus::Pending => Self::Pending,
            VerificationStatus::Failed => Self::Rejected(
                resp.error
                    .clone()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or_else(|| DEFAULT_REJECTION.to_owned()),
            ),
        }
    }
}

/// Sends entered credentials to the backend.
pub struct CredentialSubmitter {
    api: Arc<dyn DelegationApi>,
}

impl CredentialSubmitter {
    pub fn new(api: Arc<dyn DelegationApi>) -> Self {
        Self { api }
    }

    /// Stamp and start a submission. The timestamp is taken before the
    /// request is issued; the credentials are moved into the request and
    /// dropped with it.
    ///
    /// Empty payloads are rejected without a network call.
    pub fn begin(
        &self,
        token: &DelegationToken,
        credentials: Credentials,
    ) -> Result<Submission, DelegationError> {
        if credentials.is_empty() {
            return Err(DelegationError::EmptyCredentials);
        }
        let started_at = Utc::now();
        debug!(
            %token,
            system = %credentials.system_type(),
            fields = credentials.fields().len(),
            "submitting credentials"
        );
        let api = Arc::clone(&self.api);
        let token = token.clone();
        let response: SubmitFuture =
            Box::pin(async move { api.submit(&token, &credentials).await });
        Ok(Submission { started_at, response })
    }
}

#[cfg(test)]
#[path = "submit_tests.rs"]
mod tests;
