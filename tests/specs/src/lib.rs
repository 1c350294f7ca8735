// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end binary smoke tests.
//!
//! Spawns the real `delegate` binary as a subprocess against an in-process
//! mock delegation backend.

use std::io::{Read, Write};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

/// Resolve the path to the compiled `delegate` binary.
pub fn delegate_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("delegate")
}

fn now_millis() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Request counters and the last submitted body, shared with the handlers.
#[derive(Default)]
pub struct Calls {
    pub verify: AtomicUsize,
    pub submit: AtomicUsize,
    pub status: AtomicUsize,
    pub last_submit: Mutex<Option<Value>>,
}

/// In-process delegation backend serving the three JSON endpoints.
pub struct MockBackend {
    addr: SocketAddr,
    calls: Arc<Calls>,
}

/// Builder for [`MockBackend`] responses.
///
/// Polls walk `statuses` in order, repeating the last entry. Each poll
/// result is stamped with the server clock shifted by `poll_offset_ms`.
pub struct MockBuilder {
    verify: Value,
    submit: Value,
    statuses: Vec<&'static str>,
    poll_error: Option<String>,
    poll_offset_ms: i64,
}

impl Default for MockBuilder {
    fn default() -> Self {
        Self {
            verify: json!({
                "valid": true,
                "system_type": "servicenow_itsm",
                "org_name": "Acme",
                "delegated_by": "owner@acme.io",
            }),
            submit: json!({ "delegation_id": "d-1", "status": "pending" }),
            statuses: vec!["verified"],
            poll_error: None,
            poll_offset_ms: 0,
        }
    }
}

impl MockBuilder {
    pub fn verify(mut self, body: Value) -> Self {
        self.verify = body;
        self
    }

    pub fn submit(mut self, body: Value) -> Self {
        self.submit = body;
        self
    }

    pub fn statuses(mut self, statuses: &[&'static str]) -> Self {
        self.statuses = statuses.to_vec();
        self
    }

    pub fn poll_error(mut self, error: &str) -> Self {
        self.poll_error = Some(error.to_owned());
        self
    }

    pub fn poll_offset_ms(mut self, offset: i64) -> Self {
        self.poll_offset_ms = offset;
        self
    }

    pub async fn start(self) -> anyhow::Result<MockBackend> {
        let calls = Arc::new(Calls::default());

        let verify_calls = Arc::clone(&calls);
        let verify_body = self.verify;
        let submit_calls = Arc::clone(&calls);
        let submit_body = self.submit;
        let status_calls = Arc::clone(&calls);
        let statuses = self.statuses;
        let poll_error = self.poll_error;
        let offset = self.poll_offset_ms;

        let app = Router::new()
            .route(
                "/api/v1/delegations/verify",
                post(move |Json(_): Json<Value>| {
                    verify_calls.verify.fetch_add(1, Ordering::SeqCst);
                    let body = verify_body.clone();
                    async move { Json(body) }
                }),
            )
            .route(
                "/api/v1/delegations/submit",
                post(move |Json(req): Json<Value>| {
                    submit_calls.submit.fetch_add(1, Ordering::SeqCst);
                    *submit_calls.last_submit.lock() = Some(req);
                    let body = submit_body.clone();
                    async move { Json(body) }
                }),
            )
            .route(
                "/api/v1/delegations/status",
                post(move |Json(_): Json<Value>| {
                    let idx = status_calls.status.fetch_add(1, Ordering::SeqCst);
                    let status = statuses
                        .get(idx)
                        .or_else(|| statuses.last())
                        .copied()
                        .unwrap_or("pending");
                    let stamped = (now_millis() as i64).saturating_add(offset);
                    let mut body = json!({ "status": status, "submitted_at": stamped });
                    if let Some(ref error) = poll_error {
                        body["error"] = json!(error);
                    }
                    async move { Json(body) }
                }),
            );

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });
        Ok(MockBackend { addr, calls })
    }
}

impl MockBackend {
    pub fn build() -> MockBuilder {
        MockBuilder::default()
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Magic link pointing at this backend.
    pub fn link(&self, token: Option<&str>) -> String {
        match token {
            Some(t) => format!("{}/delegate?token={t}", self.base_url()),
            None => format!("{}/delegate", self.base_url()),
        }
    }

    pub fn calls(&self) -> &Calls {
        &self.calls
    }
}

/// A finished `delegate` run.
pub struct Finished {
    pub status: ExitStatus,
    pub stdout: String,
    pub stderr: String,
}

/// A running `delegate` process that is killed on drop.
pub struct DelegateProcess {
    child: Child,
    _credentials: Option<tempfile::NamedTempFile>,
}

impl DelegateProcess {
    /// Spawn `delegate` for `link` with fast timings. `credentials` is
    /// written to a temp file and passed via `--credentials`.
    pub fn spawn(link: &str, credentials: Option<Value>, extra: &[&str]) -> anyhow::Result<Self> {
        let binary = delegate_binary();
        anyhow::ensure!(binary.exists(), "delegate binary not found at {}", binary.display());

        let mut args: Vec<String> = vec![
            link.to_owned(),
            "--poll-ms".into(),
            "20".into(),
            "--countdown-secs".into(),
            "2".into(),
            "--verify-retries".into(),
            "0".into(),
            "--log-format".into(),
            "text".into(),
            "--log-level".into(),
            "warn".into(),
        ];

        let file = match credentials {
            Some(value) => {
                let mut file = tempfile::NamedTempFile::new()?;
                file.write_all(value.to_string().as_bytes())?;
                args.extend(["--credentials".into(), file.path().to_string_lossy().into_owned()]);
                Some(file)
            }
            None => None,
        };
        args.extend(extra.iter().map(|s| s.to_string()));

        let child = Command::new(&binary)
            .args(&args)
            .env("DELEGATE_COUNTDOWN_TICK_MS", "20")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        Ok(Self { child, _credentials: file })
    }

    /// Wait for the process to exit within `timeout` and collect its output.
    pub async fn wait_exit(mut self, timeout: Duration) -> anyhow::Result<Finished> {
        let deadline = tokio::time::Instant::now() + timeout;
        let status = loop {
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("delegate did not exit within {timeout:?}");
            }
            if let Some(status) = self.child.try_wait()? {
                break status;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        };

        let mut stdout = String::new();
        if let Some(mut out) = self.child.stdout.take() {
            out.read_to_string(&mut stdout)?;
        }
        let mut stderr = String::new();
        if let Some(mut err) = self.child.stderr.take() {
            err.read_to_string(&mut stderr)?;
        }
        Ok(Finished { status, stdout, stderr })
    }
}

impl Drop for DelegateProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}
