// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::Arc;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use super::*;
use crate::api::VerificationStatus;
use crate::credential::SystemType;

async fn serve(app: Router) -> anyhow::Result<SocketAddr> {
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });
    Ok(addr)
}

fn api(addr: SocketAddr) -> anyhow::Result<HttpApi> {
    HttpApi::new(&format!("http://{addr}/"), Duration::from_secs(5))
}

fn token(raw: &str) -> anyhow::Result<DelegationToken> {
    DelegationToken::new(raw).ok_or_else(|| anyhow::anyhow!("empty token"))
}

#[test]
fn base_url_trailing_slash_is_trimmed() -> anyhow::Result<()> {
    let api = HttpApi::new("http://backend.local///", Duration::from_secs(1))?;
    assert_eq!(api.base_url(), "http://backend.local");
    Ok(())
}

#[tokio::test]
async fn verify_posts_token_and_decodes_metadata() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(None::<Value>));
    let seen_clone = Arc::clone(&seen);
    let app = Router::new().route(
        VERIFY_PATH,
        post(move |Json(body): Json<Value>| {
            let seen = Arc::clone(&seen_clone);
            async move {
                *seen.lock() = Some(body);
                Json(json!({
                    "valid": true,
                    "system_type": "servicenow_itsm",
                    "org_name": "Acme",
                    "delegated_by": "owner@acme.io",
                }))
            }
        }),
    );
    let addr = serve(app).await?;

    let resp = api(addr)?.verify(&token("tok-1")?).await?;
    assert!(resp.valid);
    assert_eq!(resp.system_type, Some(SystemType::ServicenowItsm));
    assert_eq!(resp.org_name.as_deref(), Some("Acme"));
    assert_eq!(resp.delegated_by.as_deref(), Some("owner@acme.io"));
    assert_eq!(seen.lock().clone(), Some(json!({ "token": "tok-1" })));
    Ok(())
}

#[tokio::test]
async fn submit_sends_credential_fields() -> anyhow::Result<()> {
    let seen = Arc::new(Mutex::new(None::<Value>));
    let seen_clone = Arc::clone(&seen);
    let app = Router::new().route(
        SUBMIT_PATH,
        post(move |Json(body): Json<Value>| {
            let seen = Arc::clone(&seen_clone);
            async move {
                *seen.lock() = Some(body);
                Json(json!({ "delegation_id": "d-42", "status": "pending" }))
            }
        }),
    );
    let addr = serve(app).await?;

    let mut fields = BTreeMap::new();
    fields.insert("url".to_owned(), "https://acme.atlassian.net".to_owned());
    fields.insert("email".to_owned(), "ops@acme.io".to_owned());
    fields.insert("api_token".to_owned(), "t0k".to_owned());
    let creds = Credentials::new(SystemType::JiraItsm, fields);

    let resp = api(addr)?.submit(&token("tok-2")?, &creds).await?;
    assert_eq!(resp.delegation_id, "d-42");
    assert_eq!(resp.status, VerificationStatus::Pending);
    assert_eq!(
        seen.lock().clone(),
        Some(json!({
            "token": "tok-2",
            "credentials": {
                "url": "https://acme.atlassian.net",
                "email": "ops@acme.io",
                "api_token": "t0k",
            },
        }))
    );
    Ok(())
}

#[tokio::test]
async fn poll_status_decodes_result() -> anyhow::Result<()> {
    let app = Router::new().route(
        STATUS_PATH,
        post(|| async {
            Json(json!({
                "status": "failed",
                "submitted_at": "2026-03-01T12:00:00Z",
                "error": "bad credentials",
            }))
        }),
    );
    let addr = serve(app).await?;

    let resp = api(addr)?.poll_status(&token("tok-3")?).await?;
    assert_eq!(resp.status, VerificationStatus::Failed);
    assert_eq!(resp.error.as_deref(), Some("bad credentials"));
    Ok(())
}

#[tokio::test]
async fn error_status_is_transport_error() -> anyhow::Result<()> {
    let app = Router::new().route(
        VERIFY_PATH,
        post(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "boom") }),
    );
    let addr = serve(app).await?;

    let result = api(addr)?.verify(&token("tok")?).await;
    crate::assert_err_contains!(result, "HTTP 500");
    Ok(())
}

#[tokio::test]
async fn malformed_body_is_transport_error() -> anyhow::Result<()> {
    let app = Router::new().route(STATUS_PATH, post(|| async { "not json" }));
    let addr = serve(app).await?;

    let result = api(addr)?.poll_status(&token("tok")?).await;
    crate::assert_err_contains!(result, "parse");
    Ok(())
}

#[tokio::test]
async fn unreachable_backend_is_transport_error() -> anyhow::Result<()> {
    // Bind then drop to get a port nobody listens on.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        listener.local_addr()?
    };
    let result = api(addr)?.verify(&token("tok")?).await;
    assert!(result.is_err());
    Ok(())
}
