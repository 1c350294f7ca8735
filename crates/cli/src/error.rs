// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Why a magic link cannot be used. Carried on the invalid-link redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    Expired,
    NotFound,
}

impl InvalidReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Expired => "expired",
            Self::NotFound => "not_found",
        }
    }

    /// Map a server-reported rejection reason. Anything other than
    /// `expired` (including a missing reason) is treated as `not_found`.
    pub fn from_wire(reason: Option<&str>) -> Self {
        match reason {
            Some("expired") => Self::Expired,
            _ => Self::NotFound,
        }
    }
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Network-layer failure talking to the delegation backend: connect errors,
/// timeouts, non-2xx responses, and undecodable bodies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportError(pub String);

impl TransportError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport: {}", self.0)
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        Self(e.to_string())
    }
}

/// Errors surfaced by the delegation flow.
///
/// The first three make the link itself unusable and end in a redirect.
/// The rest describe a failed attempt; the user stays on the form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DelegationError {
    /// No token in the entry URL.
    TokenMissing,
    /// Server does not know the token.
    TokenNotFound,
    /// Server knows the token but it has expired or was consumed.
    TokenExpired,
    /// Network-layer failure during verify, submit, or poll.
    Transport(TransportError),
    /// Backend tested the credentials and rejected them.
    VerificationRejected(String),
    /// Submission carried no usable field values.
    EmptyCredentials,
}

impl DelegationError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TokenMissing => "TOKEN_MISSING",
            Self::TokenNotFound => "TOKEN_NOT_FOUND",
            Self::TokenExpired => "TOKEN_EXPIRED",
            Self::Transport(_) => "TRANSPORT",
            Self::VerificationRejected(_) => "VERIFICATION_REJECTED",
            Self::EmptyCredentials => "EMPTY_CREDENTIALS",
        }
    }

    pub fn from_reason(reason: InvalidReason) -> Self {
        match reason {
            InvalidReason::Expired => Self::TokenExpired,
            InvalidReason::NotFound => Self::TokenNotFound,
        }
    }

    /// Redirect reason for link-level errors. A missing token redirects as
    /// `not_found`.
    pub fn invalid_reason(&self) -> Option<InvalidReason> {
        match self {
            Self::TokenMissing | Self::TokenNotFound => Some(InvalidReason::NotFound),
            Self::TokenExpired => Some(InvalidReason::Expired),
            _ => None,
        }
    }

    /// Text shown to the person filling in the form.
    pub fn user_message(&self) -> String {
        match self {
            Self::TokenMissing | Self::TokenNotFound => {
                "This delegation link is not valid.".to_owned()
            }
            Self::TokenExpired => "This delegation link has expired.".to_owned(),
            Self::Transport(_) => {
                "We couldn't submit your credentials. Please try again.".to_owned()
            }
            Self::VerificationRejected(reason) => reason.clone(),
            Self::EmptyCredentials => "Please fill in the credential fields.".to_owned(),
        }
    }
}

impl fmt::Display for DelegationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "{}: {e}", self.as_str()),
            Self::VerificationRejected(reason) => write!(f, "{}: {reason}", self.as_str()),
            _ => f.write_str(self.as_str()),
        }
    }
}

impl std::error::Error for DelegationError {}

impl From<TransportError> for DelegationError {
    fn from(e: TransportError) -> Self {
        Self::Transport(e)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
