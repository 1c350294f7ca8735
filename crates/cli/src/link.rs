// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Magic link parsing: the entry URL is the only source of the token.

use std::fmt;

use reqwest::Url;

use crate::error::InvalidReason;

/// Query parameter carrying the delegation token.
pub const TOKEN_PARAM: &str = "token";

/// Path of the invalid-link surface, relative to the link's origin.
const INVALID_PATH: &str = "/delegation/invalid";

/// Opaque delegation token. Never validated beyond presence.
///
/// `Debug` and `Display` print a short prefix only.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct DelegationToken(String);

impl DelegationToken {
    /// Wrap a raw token. Blank values count as absent.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw = raw.into();
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self(raw))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn redacted(&self) -> String {
        let prefix: String = self.0.chars().take(4).collect();
        format!("{prefix}…")
    }
}

impl fmt::Debug for DelegationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("DelegationToken").field(&self.redacted()).finish()
    }
}

impl fmt::Display for DelegationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.redacted())
    }
}

/// A parsed magic link.
#[derive(Debug, Clone)]
pub struct MagicLink {
    url: Url,
    token: Option<DelegationToken>,
}

impl MagicLink {
    /// Parse the entry URL. Only `http` and `https` links are accepted; a
    /// link without a token still parses (the machine resolves it to
    /// `invalid`).
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let url = Url::parse(raw.trim()).map_err(|e| anyhow::anyhow!("invalid link: {e}"))?;
        anyhow::ensure!(
            matches!(url.scheme(), "http" | "https"),
            "unsupported link scheme: {}",
            url.scheme()
        );
        let token = url
            .query_pairs()
            .find(|(k, _)| k == TOKEN_PARAM)
            .and_then(|(_, v)| DelegationToken::new(v.into_owned()));
        Ok(Self { url, token })
    }

    pub fn token(&self) -> Option<&DelegationToken> {
        self.token.as_ref()
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    /// Scheme, host, and port of the link, e.g. `https://app.example.com`.
    pub fn origin(&self) -> String {
        self.url.origin().ascii_serialization()
    }

    /// Build the invalid-link redirect target carrying `reason`.
    ///
    /// `base` overrides the default `{origin}/delegation/invalid`.
    pub fn invalid_redirect(
        &self,
        reason: InvalidReason,
        base: Option<&str>,
    ) -> anyhow::Result<Url> {
        let mut target = match base {
            Some(b) => Url::parse(b).map_err(|e| anyhow::anyhow!("invalid redirect url: {e}"))?,
            None => self.url.join(INVALID_PATH)?,
        };
        target.set_query(None);
        target.query_pairs_mut().append_pair("reason", reason.as_str());
        Ok(target)
    }
}

#[cfg(test)]
#[path = "link_tests.rs"]
mod tests;
