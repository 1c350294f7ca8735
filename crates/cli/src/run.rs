// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Top-level delegation runner, shared by `main` and integration tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use reqwest::Url;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::http::{ensure_crypto, HttpApi};
use crate::api::DelegationApi;
use crate::config::{Config, CredentialSource};
use crate::credential::{Credentials, SystemType};
use crate::error::{DelegationError, InvalidReason};
use crate::host::SessionHost;
use crate::link::MagicLink;
use crate::machine::{DelegationStateMachine, MachineConfig, PageState, Snapshot, TerminationCause};

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Credentials verified; the session closed by countdown or exit.
    Completed(TerminationCause),
    /// The link could not be used; `redirect` is the invalid-link page.
    Invalid { reason: InvalidReason, redirect: Option<Url> },
    /// The session ended without verified credentials.
    Abandoned,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Completed(TerminationCause::CountdownElapsed | TerminationCause::Exited) => 0,
            Self::Invalid { .. } => 2,
            Self::Completed(TerminationCause::Cancelled) | Self::Abandoned => 1,
        }
    }
}

/// Result of a completed run.
#[derive(Debug)]
pub struct RunResult {
    pub outcome: RunOutcome,
    pub snapshot: Snapshot,
}

/// [`SessionHost`] for a terminal: prints the redirect target and records
/// the terminate call.
pub struct TerminalHost {
    link: MagicLink,
    invalid_url: Option<String>,
    redirect: Mutex<Option<Url>>,
    terminations: AtomicUsize,
}

impl TerminalHost {
    pub fn new(link: MagicLink, invalid_url: Option<String>) -> Arc<Self> {
        Arc::new(Self {
            link,
            invalid_url,
            redirect: Mutex::new(None),
            terminations: AtomicUsize::new(0),
        })
    }

    pub fn redirect(&self) -> Option<Url> {
        self.redirect.lock().clone()
    }

    pub fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

impl SessionHost for TerminalHost {
    fn redirect_invalid(&self, reason: InvalidReason) {
        match self.link.invalid_redirect(reason, self.invalid_url.as_deref()) {
            Ok(url) => {
                println!("redirect: {url}");
                *self.redirect.lock() = Some(url);
            }
            Err(e) => error!(%reason, err = %e, "cannot build invalid-link redirect"),
        }
    }

    fn terminate(&self) {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        println!("session closed");
    }
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    // Logs go to stderr; stdout carries the rendered page.
    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).try_init(),
    };
    drop(result);
}

/// Run a delegation to completion against the HTTP backend.
///
/// Ctrl-C exits after success and cancels the session otherwise.
pub async fn run(config: Config) -> anyhow::Result<RunResult> {
    init_tracing(&config);
    ensure_crypto();

    let link = config.magic_link()?;
    let api_base = config.api_base(&link);
    let api = Arc::new(HttpApi::new(&api_base, config.request_timeout())?);
    info!(api = %api.base_url(), "delegation backend");

    let interrupt = CancellationToken::new();
    let sd = interrupt.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            sd.cancel();
        }
    });

    let source = config.credential_source().unwrap_or(CredentialSource::Stdin);
    let host = TerminalHost::new(link.clone(), config.invalid_url.clone());
    run_session(config.machine_config(), api, host, &link, source, interrupt).await
}

/// Drive one session: render every snapshot, submit the credentials once
/// the form is shown, and map the final state to an outcome.
pub async fn run_session(
    machine_config: MachineConfig,
    api: Arc<dyn DelegationApi>,
    host: Arc<TerminalHost>,
    link: &MagicLink,
    source: CredentialSource,
    interrupt: CancellationToken,
) -> anyhow::Result<RunResult> {
    let mut handle = DelegationStateMachine::spawn(
        machine_config,
        api,
        Arc::clone(&host) as Arc<dyn SessionHost>,
        link.token().cloned(),
    );
    let mut rx = handle.subscribe();
    let mut interrupted = false;
    let mut last_rendered: Option<String> = None;

    loop {
        let snapshot = rx.borrow_and_update().clone();
        let page = render(&snapshot);
        if last_rendered.as_deref() != Some(page.as_str()) {
            println!("{page}");
            last_rendered = Some(page);
        }

        match snapshot.state {
            PageState::Form { error: None } if snapshot.round == 0 => {
                match load_credentials(&snapshot, &source).await {
                    Ok(credentials) => handle.submit(credentials)?,
                    Err(e) => {
                        eprintln!("error: {e:#}");
                        handle.cancel()?;
                    }
                }
            }
            PageState::Form { error: Some(ref e) } => {
                warn!(code = e.as_str(), "delegation attempt failed");
                handle.cancel()?;
            }
            ref state if state.is_terminal() => break,
            _ => {}
        }

        tokio::select! {
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = interrupt.cancelled(), if !interrupted => {
                interrupted = true;
                let state = rx.borrow().state.clone();
                info!(state = state.as_str(), "interrupted");
                // The session may already be winding down; its final state wins.
                let _ = if matches!(state, PageState::Success { .. }) {
                    handle.exit()
                } else {
                    handle.cancel()
                };
            }
        }
    }

    let snapshot = handle.wait().await?;
    let outcome = match snapshot.state {
        PageState::Invalid { reason } => RunOutcome::Invalid { reason, redirect: host.redirect() },
        PageState::Terminated {
            cause: cause @ (TerminationCause::CountdownElapsed | TerminationCause::Exited),
        } => RunOutcome::Completed(cause),
        _ => RunOutcome::Abandoned,
    };
    Ok(RunResult { outcome, snapshot })
}

/// Read the credentials JSON and check the form's required fields.
async fn load_credentials(
    snapshot: &Snapshot,
    source: &CredentialSource,
) -> anyhow::Result<Credentials> {
    // Unknown systems take a free-form field set.
    let system_type =
        snapshot.delegation.as_ref().map_or(SystemType::Unsupported, |d| d.system_type);

    let text = match source {
        CredentialSource::File(path) => tokio::fs::read_to_string(path)
            .await
            .map_err(|e| anyhow::anyhow!("read {}: {e}", path.display()))?,
        CredentialSource::Stdin => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };

    let credentials = Credentials::from_json(system_type, &text)?;
    let missing = credentials.missing_fields();
    anyhow::ensure!(missing.is_empty(), "missing required fields: {}", missing.join(", "));
    Ok(credentials)
}

/// Plain-text rendering of a snapshot.
pub fn render(snapshot: &Snapshot) -> String {
    let mut out = match snapshot.state {
        PageState::Loading => "Checking your delegation link".to_owned(),
        PageState::Invalid { reason } => DelegationError::from_reason(reason).user_message(),
        PageState::Form { ref error } => {
            let mut s = match snapshot.delegation {
                Some(ref d) => {
                    let mut s = format!("{} credentials for {}", d.system_type.display_name(), d.org_name);
                    if let Some(ref by) = d.delegated_by {
                        s.push_str(&format!(" (requested by {by})"));
                    }
                    s
                }
                None => "Enter credentials".to_owned(),
            };
            if let Some(e) = error {
                s.push_str(&format!("\nerror: {}", e.user_message()));
            }
            s
        }
        PageState::Submitting => "Submitting credentials".to_owned(),
        PageState::Verifying => "Verifying credentials".to_owned(),
        PageState::Success { remaining_secs } => {
            format!("Credentials verified. Closing in {remaining_secs}s.")
        }
        PageState::Terminated { cause: TerminationCause::Cancelled } => "Session cancelled.".to_owned(),
        PageState::Terminated { .. } => "Session closed.".to_owned(),
    };
    if snapshot.state.shows_progress() {
        out.push_str("...");
    }
    if let Some(notice) = snapshot.state.notice() {
        out.push('\n');
        out.push_str(notice);
    }
    out
}

#[cfg(test)]
#[path = "run_tests.rs"]
mod tests;
