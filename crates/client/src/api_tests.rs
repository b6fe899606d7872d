// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use super::*;
use crate::token::{MemoryStorage, TokenStore};

const STALE: &str = "stale-token";
const FRESH: &str = "fresh-token";

struct Stub {
    data_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    refresh_ok: bool,
    refresh_delay: Duration,
}

impl Stub {
    fn new(refresh_ok: bool) -> Arc<Self> {
        Self::with_delay(refresh_ok, Duration::ZERO)
    }

    fn with_delay(refresh_ok: bool, refresh_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            data_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            refresh_ok,
            refresh_delay,
        })
    }
}

async fn data(State(stub): State<Arc<Stub>>, headers: HeaderMap) -> (StatusCode, Json<Value>) {
    stub.data_calls.fetch_add(1, Ordering::SeqCst);
    let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or("");
    if auth == format!("Bearer {FRESH}") {
        (StatusCode::OK, Json(json!({ "ok": true })))
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "error": "token expired" })))
    }
}

async fn refresh(State(stub): State<Arc<Stub>>, Json(body): Json<Value>) -> (StatusCode, Json<Value>) {
    if !stub.refresh_delay.is_zero() {
        tokio::time::sleep(stub.refresh_delay).await;
    }
    stub.refresh_calls.fetch_add(1, Ordering::SeqCst);
    assert_eq!(body["refresh_token"], "refresh-1");
    if stub.refresh_ok {
        (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "data": {
                    "access_token": FRESH,
                    "refresh_token": "refresh-2",
                    "expires_in": 3600,
                },
            })),
        )
    } else {
        (StatusCode::UNAUTHORIZED, Json(json!({ "success": false })))
    }
}

async fn always_500() -> StatusCode {
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn auth_status_ok() -> Json<Value> {
    Json(json!({ "data": { "is_authorized": true, "user_info": { "name": "ops" } } }))
}

async fn spawn_stub(stub: Arc<Stub>) -> anyhow::Result<String> {
    let app = Router::new()
        .route("/data", get(data))
        .route("/auth/refresh", post(refresh))
        .route("/auth/status", get(auth_status_ok))
        .route("/auth/logout", post(always_500))
        .route("/err", get(always_500))
        .with_state(stub);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok(format!("http://{addr}"))
}

fn client_at(base_url: String) -> anyhow::Result<(Arc<ApiClient>, Arc<TokenStore>)> {
    let config = SessionConfig { api_base_url: base_url, ..SessionConfig::default() };
    let tokens = Arc::new(TokenStore::new(Box::new(MemoryStorage::new())));
    let api = Arc::new(ApiClient::new(&config, Arc::clone(&tokens))?);
    Ok((api, tokens))
}

fn seed_stale(tokens: &TokenStore, expires_in: u64) {
    tokens.set(Credential::expiring_in(STALE, Some("refresh-1".to_owned()), expires_in));
}

// ── refresh-and-retry ─────────────────────────────────────────────────

#[tokio::test]
async fn expired_token_refreshes_once_and_retries_once() -> anyhow::Result<()> {
    let stub = Stub::new(true);
    let url = spawn_stub(Arc::clone(&stub)).await?;
    let (api, tokens) = client_at(url)?;
    seed_stale(&tokens, 3600);

    let resp = api.get("/data").await?;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stub.data_calls.load(Ordering::SeqCst), 2);

    // The rotated pair is persisted.
    let cred = tokens.get().unwrap();
    assert_eq!(cred.access_token, FRESH);
    assert_eq!(cred.refresh_token.as_deref(), Some("refresh-2"));
    Ok(())
}

#[tokio::test]
async fn failed_refresh_clears_store_and_surfaces_original_401() -> anyhow::Result<()> {
    let stub = Stub::new(false);
    let url = spawn_stub(Arc::clone(&stub)).await?;
    let (api, tokens) = client_at(url)?;
    seed_stale(&tokens, 3600);

    let resp = api.get("/data").await?;
    // The caller sees the data endpoint's 401, not the refresh endpoint's.
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    let body: Value = resp.json().await?;
    assert_eq!(body["error"], "token expired");

    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stub.data_calls.load(Ordering::SeqCst), 1);
    assert!(tokens.get().is_none());
    Ok(())
}

#[tokio::test]
async fn concurrent_401s_share_one_refresh() -> anyhow::Result<()> {
    // Widen the race window so all callers pile onto the refresh lock.
    let stub = Stub::with_delay(true, Duration::from_millis(50));
    let url = spawn_stub(Arc::clone(&stub)).await?;
    let (api, tokens) = client_at(url)?;
    seed_stale(&tokens, 3600);

    let mut handles = Vec::new();
    for _ in 0..5 {
        let api = Arc::clone(&api);
        handles.push(tokio::spawn(async move { api.get("/data").await }));
    }
    for handle in handles {
        let resp = handle.await??;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    // One refresh total; each request retried at most once.
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stub.data_calls.load(Ordering::SeqCst), 10);
    Ok(())
}

#[tokio::test]
async fn near_expiry_credential_refreshes_proactively() -> anyhow::Result<()> {
    let stub = Stub::new(true);
    let url = spawn_stub(Arc::clone(&stub)).await?;
    let (api, tokens) = client_at(url)?;
    // Expires inside the default 30s skew.
    seed_stale(&tokens, 5);

    let resp = api.get("/data").await?;
    assert_eq!(resp.status(), StatusCode::OK);
    // Refreshed before the first send: no 401 round-trip at all.
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 1);
    assert_eq!(stub.data_calls.load(Ordering::SeqCst), 1);
    Ok(())
}

#[tokio::test]
async fn non_401_failures_are_not_retried() -> anyhow::Result<()> {
    let stub = Stub::new(true);
    let url = spawn_stub(Arc::clone(&stub)).await?;
    let (api, tokens) = client_at(url)?;
    seed_stale(&tokens, 3600);

    let resp = api.get("/err").await?;
    assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 0);
    Ok(())
}

#[tokio::test]
async fn missing_refresh_token_surfaces_401_and_clears() -> anyhow::Result<()> {
    let stub = Stub::new(true);
    let url = spawn_stub(Arc::clone(&stub)).await?;
    let (api, tokens) = client_at(url)?;
    tokens.set(Credential::expiring_in(STALE, None, 3600));

    let resp = api.get("/data").await?;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(stub.refresh_calls.load(Ordering::SeqCst), 0);
    // Server-reported unauthorized with no recovery path: credential dropped.
    assert!(tokens.get().is_none());
    Ok(())
}

#[tokio::test]
async fn clients_build_and_speak_plain_http_without_tls_setup() -> anyhow::Result<()> {
    // Construction installs the crypto provider itself; building several
    // clients back to back must not fail or panic.
    let stub = Stub::new(true);
    let url = spawn_stub(stub).await?;
    let (first, tokens) = client_at(url.clone())?;
    let (second, _) = client_at(url)?;

    seed_stale(&tokens, 3600);
    assert_eq!(first.get("/err").await?.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(second.get("/err").await?.status(), StatusCode::INTERNAL_SERVER_ERROR);
    Ok(())
}

// ── auth endpoints ────────────────────────────────────────────────────

#[tokio::test]
async fn auth_status_deserializes() -> anyhow::Result<()> {
    let stub = Stub::new(true);
    let url = spawn_stub(stub).await?;
    let (api, tokens) = client_at(url)?;
    seed_stale(&tokens, 3600);

    let status = api.auth_status().await?;
    assert!(status.is_authorized);
    assert_eq!(status.user_info.unwrap()["name"], "ops");
    Ok(())
}

#[tokio::test]
async fn logout_clears_credential_even_when_server_errors() -> anyhow::Result<()> {
    let stub = Stub::new(true);
    let url = spawn_stub(stub).await?;
    let (api, tokens) = client_at(url)?;
    seed_stale(&tokens, 3600);

    api.logout().await?;
    assert!(tokens.get().is_none());
    Ok(())
}
