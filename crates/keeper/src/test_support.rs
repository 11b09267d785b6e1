// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: fake JWTs and a mock refresh endpoint.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::routing::post;
use axum::Router;
use base64::Engine;
use tokio::net::TcpListener;

use crate::clock;
use crate::config::SessionConfig;

/// Build an unsigned JWT with the given timing claims (seconds since epoch).
pub fn fake_jwt(iat_secs: Option<u64>, exp_secs: u64) -> String {
    let b64 = |b: &[u8]| base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(b);
    let header = serde_json::json!({ "alg": "HS256", "typ": "JWT" });
    let mut payload = serde_json::json!({ "sub": "user-1", "exp": exp_secs });
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

/// JWT issued now, expiring `secs` from now.
pub fn jwt_expiring_in(secs: u64) -> String {
    let now = clock::now_ms() / 1000;
    fake_jwt(Some(now), now + secs)
}

/// JWT that expired `secs` ago.
pub fn jwt_expired_for(secs: u64) -> String {
    let now = clock::now_ms() / 1000;
    fake_jwt(Some(now.saturating_sub(secs + 3600)), now.saturating_sub(secs))
}

/// Successful refresh response body carrying the given access token.
pub fn refresh_body(access_token: &str, refresh_token: &str) -> String {
    serde_json::json!({
        "access_token": access_token,
        "refresh_token": refresh_token,
    })
    .to_string()
}

/// OAuth-style rejection body.
pub fn invalid_grant_body() -> String {
    serde_json::json!({
        "error": "invalid_grant",
        "error_description": "refresh token not found or invalid",
    })
    .to_string()
}

/// Start a mock refresh endpoint at `/refresh` that returns the configured
/// responses in order (repeating the last), after an optional delay.
/// Returns the bound address and a call counter.
pub async fn mock_refresh_server(
    responses: Vec<(u16, String)>,
    delay: Duration,
) -> (SocketAddr, Arc<AtomicU32>) {
    let call_count = Arc::new(AtomicU32::new(0));
    let call_count_clone = Arc::clone(&call_count);
    let responses = Arc::new(responses);

    let app = Router::new().route(
        "/refresh",
        post(move |_body: String| {
            let count = Arc::clone(&call_count_clone);
            let resps = Arc::clone(&responses);
            async move {
                tokio::time::sleep(delay).await;
                let idx = count.fetch_add(1, Ordering::Relaxed) as usize;
                let (status, body) = if idx < resps.len() {
                    resps[idx].clone()
                } else {
                    resps.last().cloned().unwrap_or((500, "{}".to_owned()))
                };
                (
                    axum::http::StatusCode::from_u16(status)
                        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR),
                    body,
                )
            }
        }),
    );

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.ok();
    });

    (addr, call_count)
}

/// Config pointed at a mock server, with timings suited to fast tests.
pub fn test_config(addr: SocketAddr) -> SessionConfig {
    let mut config = SessionConfig::new(
        format!("http://{addr}"),
        format!("http://{addr}/refresh"),
    );
    config.proactive_window_secs = 60;
    config.min_refresh_delay_secs = 3600; // keep the proactive timer quiet
    config.queue_timeout_secs = 5;
    config.http_timeout_secs = 5;
    config
}
