// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Authenticated request gateway.
//!
//! Single entry point for every authenticated API call: attaches the
//! current access token, and on an authorization failure triggers (or
//! joins) exactly one refresh cycle, then replays the request exactly once
//! with the fresh token. A second 401 after a successful refresh is a hard
//! authorization error — never a loop against an inconsistent server.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::AUTHORIZATION;
use reqwest::{Method, StatusCode};
use tracing::{debug, warn};

use crate::coordinator::RefreshCoordinator;
use crate::error::SessionError;
use crate::store::TokenStore;

/// Description of one authenticated request. Captured by value so a queued
/// request can be replayed verbatim with a new token.
#[derive(Debug, Clone)]
pub struct RequestSpec {
    pub method: Method,
    /// Path relative to the gateway base URL, leading slash included.
    pub path: String,
    /// Extra headers beyond `Authorization` (name, value).
    pub headers: Vec<(String, String)>,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
}

impl RequestSpec {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self { method, path: path.into(), headers: Vec::new(), body: None }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        let mut spec = Self::new(Method::POST, path);
        spec.body = Some(body);
        spec
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Routes authenticated calls and coordinates the 401-refresh-replay dance.
pub struct RequestGateway {
    http: reqwest::Client,
    base_url: String,
    /// Absolute URL of the refresh endpoint, used to refuse recursion.
    refresh_url: String,
    queue_timeout: Duration,
    store: Arc<TokenStore>,
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestGateway {
    pub fn new(
        http: reqwest::Client,
        base_url: impl Into<String>,
        refresh_url: impl Into<String>,
        queue_timeout: Duration,
        store: Arc<TokenStore>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            refresh_url: refresh_url.into(),
            queue_timeout,
            store,
            coordinator,
        }
    }

    /// Send an authenticated request.
    ///
    /// On 401: if a refresh token exists and this is not the refresh call
    /// itself, waits (bounded) for a refresh — creating a cycle or joining
    /// the one in flight — and retries once with the resulting token. If
    /// the refresh fails, the cycle's error propagates without a resend.
    pub async fn send(&self, spec: RequestSpec) -> Result<reqwest::Response, SessionError> {
        let token = self
            .store
            .access_token()
            .await
            .ok_or(SessionError::Unauthenticated)?;

        let resp = self.dispatch(&spec, &token).await?;
        if resp.status() != StatusCode::UNAUTHORIZED {
            return Ok(resp);
        }

        // Refresh is only worth attempting when we hold a refresh credential,
        // and never for the refresh endpoint itself (infinite recursion).
        if self.is_refresh_call(&spec) || self.store.refresh_token().await.is_none() {
            debug!(path = %spec.path, "authorization failed with no refresh path");
            return Err(SessionError::RequestAuthFailure);
        }

        debug!(path = %spec.path, "authorization failed, waiting on refresh");
        let fresh = tokio::time::timeout(self.queue_timeout, self.coordinator.ensure_fresh())
            .await
            .map_err(|_| SessionError::QueueTimeout)??;

        let retry = self.dispatch(&spec, &fresh).await?;
        if retry.status() == StatusCode::UNAUTHORIZED {
            // Refresh succeeded yet the server still refuses: hard failure,
            // no further retries.
            warn!(path = %spec.path, "authorization failed again after refresh");
            return Err(SessionError::RequestAuthFailure);
        }
        Ok(retry)
    }

    /// Build and dispatch one HTTP attempt with the given bearer token.
    async fn dispatch(
        &self,
        spec: &RequestSpec,
        token: &str,
    ) -> Result<reqwest::Response, SessionError> {
        let url = format!("{}{}", self.base_url, spec.path);
        let mut req = self
            .http
            .request(spec.method.clone(), url)
            .header(AUTHORIZATION, format!("Bearer {token}"));
        for (name, value) in &spec.headers {
            req = req.header(name, value);
        }
        if let Some(ref body) = spec.body {
            req = req.json(body);
        }

        req.send().await.map_err(|e| {
            if e.is_timeout() {
                SessionError::Transport(format!("request timed out: {e}"))
            } else {
                SessionError::Transport(format!("HTTP error: {e}"))
            }
        })
    }

    fn is_refresh_call(&self, spec: &RequestSpec) -> bool {
        format!("{}{}", self.base_url, spec.path) == self.refresh_url
    }
}

#[cfg(test)]
#[path = "gateway_tests.rs"]
mod tests;
