// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated HTTP client for the tgwatch backend.
//!
//! Attaches the current bearer token, refreshes an expiring credential
//! proactively, and on a 401 performs exactly one coalesced
//! refresh-and-retry. Concurrent 401s share a single in-flight refresh:
//! whoever wins the refresh lock does the HTTP call, everyone else finds
//! the rotated token already in the store and skips straight to their
//! retry. Refresh-token race invalidation cannot happen.

use std::sync::{Arc, Once};

use reqwest::{Method, Response, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;

use crate::config::SessionConfig;
use crate::token::{Credential, TokenStore};

/// `POST /auth/refresh` response body.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    data: Option<RefreshData>,
}

#[derive(Debug, Deserialize)]
struct RefreshData {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
}

/// `GET /auth/status` response body.
#[derive(Debug, Deserialize)]
struct StatusResponse {
    data: AuthStatus,
}

/// Authorization state as reported by the backend.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthStatus {
    pub is_authorized: bool,
    #[serde(default)]
    pub user_info: Option<serde_json::Value>,
}

/// HTTP client wrapper that keeps the credential fresh.
pub struct ApiClient {
    base_url: String,
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
    refresh_skew_secs: u64,
    /// Serializes refresh so at most one refresh HTTP call is in flight.
    refresh_lock: Mutex<()>,
}

static INIT_CRYPTO: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
fn ensure_crypto_provider() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

impl ApiClient {
    pub fn new(config: &SessionConfig, tokens: Arc<TokenStore>) -> anyhow::Result<Self> {
        ensure_crypto_provider();
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout())
            .build()?;
        Ok(Self {
            base_url: config.api_base_url.clone(),
            http,
            tokens,
            refresh_skew_secs: config.refresh_skew_secs,
            refresh_lock: Mutex::new(()),
        })
    }

    /// The token store this client reads and rotates.
    pub fn tokens(&self) -> &Arc<TokenStore> {
        &self.tokens
    }

    pub async fn get(&self, path: &str) -> anyhow::Result<Response> {
        self.request(Method::GET, path, None).await
    }

    pub async fn post_json(&self, path: &str, body: &serde_json::Value) -> anyhow::Result<Response> {
        self.request(Method::POST, path, Some(body)).await
    }

    /// Issue a request with bearer attachment and at most one
    /// refresh-and-retry on 401.
    ///
    /// A 401 that survives the refresh path is returned as a normal
    /// response; the caller decides what to do with it (typically a
    /// redirect to re-authentication). Non-401 failures are never retried.
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
    ) -> anyhow::Result<Response> {
        // Pre-emptive refresh when the credential is close to expiry, so
        // most calls never see a 401 at all.
        if self.tokens.is_expired(self.refresh_skew_secs) {
            if let Some(cred) = self.tokens.get() {
                if cred.refresh_token.is_some() {
                    if let Err(e) = self.ensure_refreshed(&cred.access_token).await {
                        tracing::debug!(err = %e, "proactive refresh failed, proceeding with current token");
                    }
                }
            }
        }

        let used_token = self.tokens.get().map(|c| c.access_token);
        let resp = self.send(method.clone(), path, body, used_token.as_deref()).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        // Unauthenticated calls have nothing to refresh.
        let Some(used) = used_token else {
            return Ok(resp);
        };

        match self.ensure_refreshed(&used).await {
            Ok(()) => {
                let fresh = self.tokens.get().map(|c| c.access_token);
                tracing::debug!(path, "retrying request with refreshed credential");
                self.send(method, path, body, fresh.as_deref()).await
            }
            Err(e) => {
                // Irrecoverable: drop the credential and surface the
                // ORIGINAL 401, not the refresh failure.
                tracing::warn!(path, err = %e, "credential refresh failed, clearing store");
                self.tokens.clear();
                Ok(resp)
            }
        }
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<&serde_json::Value>,
        bearer: Option<&str>,
    ) -> anyhow::Result<Response> {
        let mut req = self.http.request(method, self.url(path));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        if let Some(json) = body {
            req = req.json(json);
        }
        Ok(req.send().await?)
    }

    /// Refresh the current credential, coalescing concurrent triggers.
    ///
    /// Clears the store when the refresh itself is rejected, so callers see
    /// a consistent unauthenticated state afterwards.
    pub async fn refresh(&self) -> anyhow::Result<()> {
        let used = self
            .tokens
            .get()
            .map(|c| c.access_token)
            .ok_or_else(|| anyhow::anyhow!("no credential present"))?;
        match self.ensure_refreshed(&used).await {
            Ok(()) => Ok(()),
            Err(e) => {
                self.tokens.clear();
                Err(e)
            }
        }
    }

    /// Refresh unless another caller already rotated the token we failed
    /// with. Holds the refresh lock across the check and the HTTP call, so
    /// the store write fully lands before any waiter proceeds to its retry.
    async fn ensure_refreshed(&self, used_token: &str) -> anyhow::Result<()> {
        let _guard = self.refresh_lock.lock().await;

        let cred = self
            .tokens
            .get()
            .ok_or_else(|| anyhow::anyhow!("no credential present"))?;
        if cred.access_token != used_token {
            // A concurrent caller refreshed while we waited on the lock.
            return Ok(());
        }
        let refresh_token = cred
            .refresh_token
            .ok_or_else(|| anyhow::anyhow!("no refresh token available"))?;

        let data = self.do_refresh(&refresh_token).await?;
        // Servers may rotate the refresh token; keep the old one otherwise.
        self.tokens.set(Credential::expiring_in(
            data.access_token,
            data.refresh_token.or(Some(refresh_token)),
            data.expires_in,
        ));
        tracing::debug!("credential refreshed");
        Ok(())
    }

    /// Perform the single refresh HTTP call.
    async fn do_refresh(&self, refresh_token: &str) -> anyhow::Result<RefreshData> {
        let resp = self
            .http
            .post(self.url("/auth/refresh"))
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("refresh failed ({status}): {text}");
        }

        let body: RefreshResponse = resp.json().await?;
        if !body.success {
            anyhow::bail!("refresh rejected by server");
        }
        body.data.ok_or_else(|| anyhow::anyhow!("refresh response missing data"))
    }

    /// `GET /auth/status`: whether the backend still considers us logged in.
    pub async fn auth_status(&self) -> anyhow::Result<AuthStatus> {
        let resp = self.get("/auth/status").await?;
        let body: StatusResponse = resp.error_for_status()?.json().await?;
        Ok(body.data)
    }

    /// `POST /auth/logout`. The local credential is cleared regardless of
    /// what the server says.
    pub async fn logout(&self) -> anyhow::Result<()> {
        if let Err(e) = self.send(Method::POST, "/auth/logout", None, self.tokens.get().map(|c| c.access_token).as_deref()).await {
            tracing::debug!(err = %e, "logout request failed, clearing local credential anyway");
        }
        self.tokens.clear();
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[cfg(test)]
#[path = "api_tests.rs"]
mod tests;
