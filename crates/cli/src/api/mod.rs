// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Delegation backend seam: the three calls the state machine consumes and
//! their wire types.

pub mod http;

use std::future::Future;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::credential::{Credentials, SystemType};
use crate::error::TransportError;
use crate::link::DelegationToken;

/// Boxed future returned by [`DelegationApi`] calls.
pub type ApiFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, TransportError>> + Send + 'a>>;

/// Backend consumed by the delegation flow.
///
/// Object-safe for use as `Arc<dyn DelegationApi>`.
pub trait DelegationApi: Send + Sync + 'static {
    /// Check whether a token is usable and fetch the delegation metadata.
    fn verify<'a>(&'a self, token: &'a DelegationToken) -> ApiFuture<'a, VerifyResponse>;

    /// Send credentials for a token. Overwrites any earlier submission.
    fn submit<'a>(
        &'a self,
        token: &'a DelegationToken,
        credentials: &'a Credentials,
    ) -> ApiFuture<'a, SubmitResponse>;

    /// Read the current verification status for a token.
    fn poll_status<'a>(&'a self, token: &'a DelegationToken) -> ApiFuture<'a, PollResponse>;
}

/// Verification status of a delegation record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationStatus {
    Pending,
    Verified,
    Failed,
}

impl VerificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Verified => "verified",
            Self::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Request body for `verify` and `poll_status`.
#[derive(Debug, Serialize)]
pub struct TokenRequest<'a> {
    pub token: &'a str,
}

/// Request body for `submit`.
#[derive(Debug, Serialize)]
pub struct SubmitRequest<'a> {
    pub token: &'a str,
    pub credentials: &'a std::collections::BTreeMap<String, String>,
}

/// Response from `verify`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_type: Option<SystemType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub org_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delegated_by: Option<String>,
    /// `expired` or `not_found` when `valid` is false.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Response from `submit`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitResponse {
    #[serde(default)]
    pub delegation_id: String,
    pub status: VerificationStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response from `poll_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: VerificationStatus,
    /// Server time of the submission this status belongs to.
    #[serde(with = "timestamp")]
    pub submitted_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// `submitted_at` arrives as RFC 3339 text or epoch milliseconds.
/// Always serialized as RFC 3339 with millisecond precision.
pub mod timestamp {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Text(String),
    }

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        match Raw::deserialize(d)? {
            Raw::Millis(ms) => DateTime::from_timestamp_millis(ms)
                .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {ms}"))),
            Raw::Text(text) => DateTime::parse_from_rfc3339(&text)
                .map(|ts| ts.with_timezone(&Utc))
                .map_err(|e| serde::de::Error::custom(format!("bad timestamp {text:?}: {e}"))),
        }
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
