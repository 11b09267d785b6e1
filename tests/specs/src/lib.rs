// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Scenario harness for end-to-end session lifecycle tests.
//!
//! Runs an in-process mock backend with a refresh endpoint and a
//! bearer-gated API route, and exercises a real [`tokenkeeper::SessionManager`]
//! against it. The backend tracks which access tokens it has issued, so
//! tests can revoke them and observe the refresh-and-replay path.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::Router;
use base64::Engine;
use tokio::net::TcpListener;

use tokenkeeper::SessionConfig;

/// Seconds since the Unix epoch.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Build an unsigned JWT with the given timing claims (seconds since epoch).
pub fn fake_jwt(iat_secs: Option<u64>, exp_secs: u64) -> String {
    let b64 = |b: &[u8]| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b);
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let mut payload = serde_json::json!({ "sub": "spec-user", "exp": exp_secs });
    if let Some(iat) = iat_secs {
        payload["iat"] = iat.into();
    }
    format!(
        "{}.{}.{}",
        b64(header.to_string().as_bytes()),
        b64(payload.to_string().as_bytes()),
        b64(b"sig"),
    )
}

/// How the backend answers refresh requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshMode {
    /// Rotate and return a fresh pair.
    Normal,
    /// Answer every refresh with `invalid_grant`.
    RejectAll,
    /// Answer every refresh with 503, as an outage would.
    Unavailable,
}

struct BackendState {
    access_ttl_secs: u64,
    refresh_token: String,
    valid_access: Vec<String>,
    refresh_calls: u32,
    api_calls: u32,
    issued: u32,
    mode: RefreshMode,
    refresh_delay: Duration,
}

/// An in-process auth backend bound to a random local port.
#[derive(Clone)]
pub struct MockBackend {
    addr: SocketAddr,
    state: Arc<Mutex<BackendState>>,
}

impl MockBackend {
    /// Start the backend. Newly minted access tokens live `access_ttl_secs`.
    pub async fn start(access_ttl_secs: u64) -> anyhow::Result<Self> {
        let state = Arc::new(Mutex::new(BackendState {
            access_ttl_secs,
            refresh_token: "rt-0".to_owned(),
            valid_access: Vec::new(),
            refresh_calls: 0,
            api_calls: 0,
            issued: 0,
            mode: RefreshMode::Normal,
            refresh_delay: Duration::ZERO,
        }));

        let refresh_state = Arc::clone(&state);
        let refresh = post(move |body: String| {
            let state = Arc::clone(&refresh_state);
            async move { handle_refresh(state, body).await }
        });

        let api_state = Arc::clone(&state);
        let profile = get(move |headers: HeaderMap| {
            let state = Arc::clone(&api_state);
            async move { handle_profile(state, headers) }
        });

        let app = Router::new()
            .route("/auth/refresh", refresh)
            .route("/api/profile", profile);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self { addr, state })
    }

    /// Mint a login pair the way a password flow would, and remember the
    /// access token as valid.
    pub fn issue_login(&self) -> (String, String) {
        mint_pair(&mut self.locked())
    }

    /// Invalidate every access token issued so far. The next API call with
    /// any of them returns 401; the refresh token stays valid.
    pub fn revoke_all_access(&self) {
        self.locked().valid_access.clear();
    }

    pub fn set_mode(&self, mode: RefreshMode) {
        self.locked().mode = mode;
    }

    /// Delay every refresh response, widening the window in which
    /// concurrent callers pile up behind one cycle.
    pub fn set_refresh_delay(&self, delay: Duration) {
        self.locked().refresh_delay = delay;
    }

    pub fn refresh_calls(&self) -> u32 {
        self.locked().refresh_calls
    }

    pub fn api_calls(&self) -> u32 {
        self.locked().api_calls
    }

    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Session config pointed at this backend, with timings suited to
    /// fast tests.
    pub fn config(&self) -> SessionConfig {
        let mut config = SessionConfig::new(
            self.base_url(),
            format!("{}/auth/refresh", self.base_url()),
        );
        config.proactive_window_secs = 60;
        config.min_refresh_delay_secs = 3600;
        config.queue_timeout_secs = 5;
        config.http_timeout_secs = 5;
        config
    }

    fn locked(&self) -> MutexGuard<'_, BackendState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn mint_pair(state: &mut BackendState) -> (String, String) {
    let now = now_secs();
    state.issued += 1;
    // Make the signature segment unique per issuance so that two tokens
    // minted within the same second still differ byte-for-byte.
    let base = fake_jwt(Some(now), now + state.access_ttl_secs);
    let unsigned = base.rsplit_once('.').map(|(u, _)| u.to_owned()).unwrap_or(base);
    let sig = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .encode(format!("sig-{}", state.issued));
    let access = format!("{unsigned}.{sig}");
    let refresh = format!("rt-{}", state.issued);
    state.valid_access.push(access.clone());
    state.refresh_token = refresh.clone();
    (access, refresh)
}

async fn handle_refresh(state: Arc<Mutex<BackendState>>, body: String) -> (StatusCode, String) {
    let delay = {
        let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
        state.refresh_calls += 1;
        state.refresh_delay
    };
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    match state.mode {
        RefreshMode::Unavailable => (StatusCode::SERVICE_UNAVAILABLE, "{}".to_owned()),
        RefreshMode::RejectAll => (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "invalid_grant",
                "error_description": "refresh token revoked",
            })
            .to_string(),
        ),
        RefreshMode::Normal => {
            let presented = serde_json::from_str::<serde_json::Value>(&body)
                .ok()
                .and_then(|v| v["refresh_token"].as_str().map(str::to_owned))
                .unwrap_or_default();
            if presented != state.refresh_token {
                return (
                    StatusCode::BAD_REQUEST,
                    serde_json::json!({ "error": "invalid_grant" }).to_string(),
                );
            }
            let (access, refresh) = mint_pair(&mut state);
            (
                StatusCode::OK,
                serde_json::json!({
                    "access_token": access,
                    "refresh_token": refresh,
                })
                .to_string(),
            )
        }
    }
}

fn handle_profile(state: Arc<Mutex<BackendState>>, headers: HeaderMap) -> (StatusCode, String) {
    let mut state = state.lock().unwrap_or_else(|e| e.into_inner());
    state.api_calls += 1;

    let bearer = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or_default();

    if state.valid_access.iter().any(|t| t == bearer) {
        (
            StatusCode::OK,
            serde_json::json!({ "sub": "spec-user", "name": "Spec User" }).to_string(),
        )
    } else {
        (StatusCode::UNAUTHORIZED, "{}".to_owned())
    }
}
