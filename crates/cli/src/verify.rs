// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Token verification: resolves a magic-link token to delegation metadata
//! or a rejection reason.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{DelegationApi, VerifyResponse};
use crate::credential::SystemType;
use crate::error::{InvalidReason, TransportError};
use crate::link::DelegationToken;

/// Upper bound for the backoff between verify retries.
const MAX_VERIFY_BACKOFF: Duration = Duration::from_secs(5);

/// Descriptive metadata of a valid delegation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationInfo {
    pub system_type: SystemType,
    pub org_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<String>,
}

/// Result of verifying a token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationOutcome {
    Valid(DelegationInfo),
    Invalid(InvalidReason),
}

/// Checks magic-link tokens against the backend. Read-only.
pub struct TokenVerifier {
    api: Arc<dyn DelegationApi>,
    retries: u32,
    backoff: Duration,
}

impl TokenVerifier {
    /// `retries` extra attempts are made after a transport failure, waiting
    /// `backoff` (doubling) between them.
    pub fn new(api: Arc<dyn DelegationApi>, retries: u32, backoff: Duration) -> Self {
        Self { api, retries, backoff }
    }

    /// Verify `token`. An absent token is `not_found` without a network
    /// call. Transport failures are returned as errors once retries are
    /// exhausted, never folded into a rejection.
    pub async fn verify(
        &self,
        token: Option<&DelegationToken>,
    ) -> Result<VerificationOutcome, TransportError> {
        let Some(token) = token else {
            debug!("no token in link, skipping verify");
            return Ok(VerificationOutcome::Invalid(InvalidReason::NotFound));
        };

        let attempts = self.retries.saturating_add(1);
        let mut backoff = self.backoff;
        let mut attempt = 1;
        loop {
            let result = self.api.verify(token).await.and_then(interpret);
            match result {
                Ok(outcome) => return Ok(outcome),
                Err(e) if attempt >= attempts => {
                    warn!(%token, attempt, err = %e, "token verify failed, giving up");
                    return Err(e);
                }
                Err(e) => {
                    warn!(%token, attempt, max = attempts, err = %e, "token verify failed, retrying");
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2).min(MAX_VERIFY_BACKOFF);
                    attempt += 1;
                }
            }
        }
    }
}

/// Map a verify response to an outcome. A `valid` response without the
/// metadata the form needs is malformed.
fn interpret(resp: VerifyResponse) -> Result<VerificationOutcome, TransportError> {
    if !resp.valid {
        return Ok(VerificationOutcome::Invalid(InvalidReason::from_wire(resp.reason.as_deref())));
    }
    let system_type = resp
        .system_type
        .ok_or_else(|| TransportError::new("verify response missing system_type"))?;
    let org_name = resp
        .org_name
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| TransportError::new("verify response missing org_name"))?;
    Ok(VerificationOutcome::Valid(DelegationInfo {
        system_type,
        org_name,
        delegated_by: resp.delegated_by.filter(|d| !d.trim().is_empty()),
    }))
}

#[cfg(test)]
#[path = "verify_tests.rs"]
mod tests;
