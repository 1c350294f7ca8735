// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! End-to-end smoke tests that spawn the real `delegate` binary against a
//! mock delegation backend.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::json;

use delegate::error::InvalidReason;
use delegate_specs::{DelegateProcess, MockBackend};

const TIMEOUT: Duration = Duration::from_secs(10);

fn servicenow() -> serde_json::Value {
    json!({
        "instance_url": "https://acme.service-now.com",
        "username": "admin",
        "password": "hunter2",
    })
}

#[tokio::test]
async fn verified_delegation_exits_zero() -> anyhow::Result<()> {
    let backend = MockBackend::build().statuses(&["pending", "verified"]).start().await?;
    let run = DelegateProcess::spawn(&backend.link(Some("tok-1")), Some(servicenow()), &[])?
        .wait_exit(TIMEOUT)
        .await?;

    assert_eq!(run.status.code(), Some(0), "stderr: {}", run.stderr);
    assert!(run.stdout.contains("ServiceNow credentials for Acme"));
    assert!(run.stdout.contains("Credentials verified"));
    assert!(run.stdout.contains("session closed"));
    assert!(!run.stdout.contains("hunter2"));
    assert!(!run.stderr.contains("hunter2"));

    let calls = backend.calls();
    assert_eq!(calls.verify.load(Ordering::SeqCst), 1);
    assert_eq!(calls.submit.load(Ordering::SeqCst), 1);
    assert!(calls.status.load(Ordering::SeqCst) >= 2);
    let body = calls.last_submit.lock().clone().unwrap_or_default();
    assert_eq!(body["token"], "tok-1");
    assert_eq!(body["credentials"]["username"], "admin");
    Ok(())
}

#[tokio::test]
async fn expired_link_redirects_with_exit_two() -> anyhow::Result<()> {
    let backend = MockBackend::build()
        .verify(json!({ "valid": false, "reason": "expired" }))
        .start()
        .await?;
    let run = DelegateProcess::spawn(&backend.link(Some("tok-1")), Some(servicenow()), &[])?
        .wait_exit(TIMEOUT)
        .await?;

    assert_eq!(run.status.code(), Some(2));
    let expected = format!(
        "redirect: {}/delegation/invalid?reason={}",
        backend.base_url(),
        InvalidReason::Expired.as_str()
    );
    assert!(run.stdout.contains(&expected), "stdout: {}", run.stdout);
    assert_eq!(backend.calls().submit.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn missing_token_never_calls_backend() -> anyhow::Result<()> {
    let backend = MockBackend::build().start().await?;
    let run = DelegateProcess::spawn(&backend.link(None), Some(servicenow()), &[])?
        .wait_exit(TIMEOUT)
        .await?;

    assert_eq!(run.status.code(), Some(2));
    assert!(run.stdout.contains("reason=not_found"));
    assert_eq!(backend.calls().verify.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn invalid_url_override_is_used() -> anyhow::Result<()> {
    let backend = MockBackend::build().verify(json!({ "valid": false })).start().await?;
    let run = DelegateProcess::spawn(
        &backend.link(Some("tok-1")),
        None,
        &["--invalid-url", "https://portal.example.com/expired"],
    )?
    .wait_exit(TIMEOUT)
    .await?;

    assert_eq!(run.status.code(), Some(2));
    assert!(run.stdout.contains("redirect: https://portal.example.com/expired?reason=not_found"));
    Ok(())
}

#[tokio::test]
async fn rejected_credentials_exit_one() -> anyhow::Result<()> {
    let backend = MockBackend::build()
        .statuses(&["failed"])
        .poll_error("bad credentials")
        .start()
        .await?;
    let run = DelegateProcess::spawn(&backend.link(Some("tok-1")), Some(servicenow()), &[])?
        .wait_exit(TIMEOUT)
        .await?;

    assert_eq!(run.status.code(), Some(1));
    assert!(run.stdout.contains("error: bad credentials"), "stdout: {}", run.stdout);
    Ok(())
}

#[tokio::test]
async fn stale_results_never_complete_the_session() -> anyhow::Result<()> {
    let backend = MockBackend::build()
        .statuses(&["verified"])
        .poll_offset_ms(-60_000)
        .start()
        .await?;
    let process = DelegateProcess::spawn(&backend.link(Some("tok-1")), Some(servicenow()), &[])?;

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(backend.calls().status.load(Ordering::SeqCst) >= 3);
    let outcome = process.wait_exit(Duration::from_millis(200)).await;
    assert!(outcome.is_err(), "stale results must keep the session verifying");
    Ok(())
}

#[tokio::test]
async fn bad_arguments_exit_two() -> anyhow::Result<()> {
    let run = DelegateProcess::spawn("ftp://example.com/?token=x", None, &[])?
        .wait_exit(TIMEOUT)
        .await?;
    assert_eq!(run.status.code(), Some(2));
    assert!(run.stderr.contains("unsupported link scheme"));
    Ok(())
}
