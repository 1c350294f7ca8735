// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::link::MagicLink;
use crate::machine::MachineConfig;

/// Complete an ITSM credential delegation from a magic link.
#[derive(Debug, Parser)]
#[command(name = "delegate", version, about)]
pub struct Config {
    /// Magic link URL carrying the delegation token.
    #[arg(env = "DELEGATE_LINK")]
    pub link: Option<String>,

    /// Backend base URL (defaults to the link's origin).
    #[arg(long, env = "DELEGATE_API_URL")]
    pub api_url: Option<String>,

    /// Invalid-link page (defaults to {origin}/delegation/invalid).
    #[arg(long, env = "DELEGATE_INVALID_URL")]
    pub invalid_url: Option<String>,

    /// Credentials JSON object, read from a file path or `-` for stdin.
    #[arg(long, env = "DELEGATE_CREDENTIALS")]
    pub credentials: Option<String>,

    /// Status poll interval in ms.
    #[arg(long, env = "DELEGATE_POLL_MS", default_value = "2000")]
    pub poll_ms: u64,

    /// Allowed clock skew when matching poll results to a submission, in ms.
    #[arg(long, env = "DELEGATE_STALENESS_TOLERANCE_MS", default_value = "5000")]
    pub staleness_tolerance_ms: u64,

    /// Seconds before the session closes after success.
    #[arg(long, env = "DELEGATE_COUNTDOWN_SECS", default_value = "90")]
    pub countdown_secs: u64,

    /// Extra token verify attempts after a transport failure.
    #[arg(long, env = "DELEGATE_VERIFY_RETRIES", default_value = "2")]
    pub verify_retries: u32,

    /// Per-request HTTP timeout in ms.
    #[arg(long, env = "DELEGATE_REQUEST_TIMEOUT_MS", default_value = "10000")]
    pub request_timeout_ms: u64,

    /// Log format (json or text).
    #[arg(long, env = "DELEGATE_LOG_FORMAT", default_value = "json")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "DELEGATE_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    // -- Duration overrides (skip from CLI; set in Config::test()) --------
    #[clap(skip)]
    pub countdown_tick_ms: Option<u64>,
    #[clap(skip)]
    pub verify_backoff_ms: Option<u64>,
}

/// Where the credentials JSON comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    Stdin,
    File(PathBuf),
}

fn env_duration_ms(var: &str, default: u64) -> Duration {
    let ms = std::env::var(var).ok().and_then(|v| v.parse().ok()).unwrap_or(default);
    Duration::from_millis(ms)
}

macro_rules! duration_field {
    ($method:ident, $field:ident, $env:literal, $default:expr) => {
        pub fn $method(&self) -> Duration {
            match self.$field {
                Some(ms) => Duration::from_millis(ms),
                None => env_duration_ms($env, $default),
            }
        }
    };
}

impl Config {
    /// Validate the configuration after parsing.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.magic_link()?;

        for (flag, url) in [("--api-url", &self.api_url), ("--invalid-url", &self.invalid_url)] {
            if let Some(url) = url {
                let parsed = reqwest::Url::parse(url)
                    .map_err(|e| anyhow::anyhow!("invalid {flag}: {e}"))?;
                anyhow::ensure!(
                    matches!(parsed.scheme(), "http" | "https"),
                    "{flag} must be an http(s) URL"
                );
            }
        }

        // Zero periods would spin (or panic inside tokio::time::interval).
        anyhow::ensure!(self.poll_ms > 0, "--poll-ms must be greater than zero");
        anyhow::ensure!(!self.countdown_tick().is_zero(), "countdown tick must be greater than zero");
        anyhow::ensure!(
            self.request_timeout_ms > 0,
            "--request-timeout-ms must be greater than zero"
        );

        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }

        Ok(())
    }

    /// Parse the magic link. A link without a token is accepted here and
    /// resolved to `invalid` by the session.
    pub fn magic_link(&self) -> anyhow::Result<MagicLink> {
        let Some(ref raw) = self.link else {
            anyhow::bail!("a magic link must be specified");
        };
        MagicLink::parse(raw)
    }

    /// Backend base URL: `--api-url` or the link's origin.
    pub fn api_base(&self, link: &MagicLink) -> String {
        match self.api_url {
            Some(ref url) => url.clone(),
            None => link.origin(),
        }
    }

    pub fn credential_source(&self) -> Option<CredentialSource> {
        match self.credentials.as_deref() {
            None => None,
            Some("-") => Some(CredentialSource::Stdin),
            Some(path) => Some(CredentialSource::File(PathBuf::from(path))),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_ms)
    }

    pub fn staleness_tolerance(&self) -> Duration {
        Duration::from_millis(self.staleness_tolerance_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    // -- Tuning knobs (field override → env var → compiled default) --------

    duration_field!(countdown_tick, countdown_tick_ms, "DELEGATE_COUNTDOWN_TICK_MS", 1_000);
    duration_field!(verify_backoff, verify_backoff_ms, "DELEGATE_VERIFY_BACKOFF_MS", 500);

    /// Timing knobs for the state machine.
    pub fn machine_config(&self) -> MachineConfig {
        MachineConfig {
            poll_interval: self.poll_interval(),
            staleness_tolerance: self.staleness_tolerance(),
            countdown_secs: self.countdown_secs,
            countdown_tick: self.countdown_tick(),
            verify_retries: self.verify_retries,
            verify_backoff: self.verify_backoff(),
        }
    }

    /// Build a minimal `Config` for tests with fast timings.
    #[doc(hidden)]
    pub fn test(link: &str) -> Self {
        Self {
            link: Some(link.to_owned()),
            api_url: None,
            invalid_url: None,
            credentials: None,
            poll_ms: 10,
            staleness_tolerance_ms: 5_000,
            countdown_secs: 3,
            verify_retries: 0,
            request_timeout_ms: 2_000,
            log_format: "text".into(),
            log_level: "debug".into(),
            countdown_tick_ms: Some(10),
            verify_backoff_ms: Some(1),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
