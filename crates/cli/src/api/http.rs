// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the delegation backend.

use std::sync::Once;
use std::time::Duration;

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::{
    ApiFuture, DelegationApi, PollResponse, SubmitRequest, SubmitResponse, TokenRequest,
    VerifyResponse,
};
use crate::credential::Credentials;
use crate::error::TransportError;
use crate::link::DelegationToken;

pub const VERIFY_PATH: &str = "/api/v1/delegations/verify";
pub const SUBMIT_PATH: &str = "/api/v1/delegations/submit";
pub const STATUS_PATH: &str = "/api/v1/delegations/status";

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times; only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// JSON-over-HTTP implementation of [`DelegationApi`].
pub struct HttpApi {
    base_url: String,
    client: Client,
}

impl HttpApi {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        ensure_crypto();
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("failed to build http client: {e}"))?;
        Ok(Self { base_url: base_url.trim_end_matches('/').to_owned(), client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// POST `body` as JSON and decode a JSON response. Non-2xx statuses and
    /// undecodable bodies are transport errors.
    async fn post_json<B, R>(&self, path: &str, body: &B) -> Result<R, TransportError>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let resp = self.client.post(self.url(path)).json(body).send().await?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            debug!(path, %status, "delegation backend returned error status");
            return Err(TransportError::new(format!("HTTP {status}: {text}")));
        }
        let bytes = resp.bytes().await?;
        serde_json::from_slice(&bytes)
            .map_err(|e| TransportError::new(format!("parse {path} response: {e}")))
    }
}

impl DelegationApi for HttpApi {
    fn verify<'a>(&'a self, token: &'a DelegationToken) -> ApiFuture<'a, VerifyResponse> {
        Box::pin(async move {
            self.post_json(VERIFY_PATH, &TokenRequest { token: token.as_str() }).await
        })
    }

    fn submit<'a>(
        &'a self,
        token: &'a DelegationToken,
        credentials: &'a Credentials,
    ) -> ApiFuture<'a, SubmitResponse> {
        Box::pin(async move {
            let body = SubmitRequest { token: token.as_str(), credentials: credentials.fields() };
            self.post_json(SUBMIT_PATH, &body).await
        })
    }

    fn poll_status<'a>(&'a self, token: &'a DelegationToken) -> ApiFuture<'a, PollResponse> {
        Box::pin(async move {
            self.post_json(STATUS_PATH, &TokenRequest { token: token.as_str() }).await
        })
    }
}

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;
