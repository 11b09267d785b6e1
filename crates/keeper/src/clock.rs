// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pure token-expiry math: decode a JWT's timing claims and decide when a
//! refresh is due. No I/O, no shared state.
//!
//! Decoding fails closed: a token whose payload cannot be parsed is reported
//! as malformed, and callers treat malformed as already expired.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use serde::Deserialize;

use crate::error::SessionError;

/// Timing claims extracted from a JWT payload.
///
/// `exp` is required; `iat` is optional (some issuers omit it, in which case
/// lifetime-percentage scheduling measures from "now").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenClaims {
    /// Expiry as milliseconds since Unix epoch.
    pub expires_at_ms: u64,
    /// Issue time as milliseconds since Unix epoch, when present.
    pub issued_at_ms: Option<u64>,
}

/// Raw JWT payload fields we care about (claim values are seconds).
#[derive(Debug, Deserialize)]
struct RawClaims {
    exp: u64,
    #[serde(default)]
    iat: Option<u64>,
}

/// Decode the timing claims from a JWT without verifying its signature.
///
/// The token is only inspected for scheduling; authorization decisions stay
/// with the server.
pub fn decode_claims(token: &str) -> Result<TokenClaims, SessionError> {
    let mut parts = token.split('.');
    let (_header, payload) = match (parts.next(), parts.next()) {
        (Some(h), Some(p)) if !h.is_empty() && !p.is_empty() => (h, p),
        _ => return Err(SessionError::MalformedToken),
    };

    let bytes = base64::engine::general_purpose::URL_SAFE_NO_PAD
        .decode(payload)
        .map_err(|_| SessionError::MalformedToken)?;
    let raw: RawClaims =
        serde_json::from_slice(&bytes).map_err(|_| SessionError::MalformedToken)?;

    Ok(TokenClaims {
        expires_at_ms: raw.exp.saturating_mul(1000),
        issued_at_ms: raw.iat.map(|s| s.saturating_mul(1000)),
    })
}

/// Decode just the expiry instant (milliseconds since epoch).
pub fn decode_expiry(token: &str) -> Result<u64, SessionError> {
    decode_claims(token).map(|c| c.expires_at_ms)
}

/// Time left before the token expires, floored at zero.
pub fn time_remaining(token: &str, now_ms: u64) -> Duration {
    match decode_expiry(token) {
        Ok(exp_ms) => Duration::from_millis(exp_ms.saturating_sub(now_ms)),
        // Fail closed: unparsable means no time left.
        Err(_) => Duration::ZERO,
    }
}

/// True when the token is expired within the skew tolerance.
///
/// A malformed token is always expired.
pub fn is_expired(token: &str, now_ms: u64, skew: Duration) -> bool {
    time_remaining(token, now_ms) <= skew
}

/// Delay from `now` until a proactive refresh should fire.
///
/// Takes the earlier of (expiry − proactive window) and (issue time + the
/// lifetime fraction of the full lifetime), floored at `min_delay` so very
/// short-lived tokens cannot cause a refresh storm. The fixed window alone
/// under-reacts to short-token deployments and the percentage alone
/// over-reacts to long-token ones; the minimum of both covers both regimes.
pub fn refresh_due_in(
    claims: &TokenClaims,
    now_ms: u64,
    proactive_window: Duration,
    lifetime_fraction: f64,
    min_delay: Duration,
) -> Duration {
    let issued_at_ms = claims.issued_at_ms.unwrap_or(now_ms);
    let lifetime_ms = claims.expires_at_ms.saturating_sub(issued_at_ms);

    let window_leg_ms = claims
        .expires_at_ms
        .saturating_sub(proactive_window.as_millis() as u64);
    let fraction_leg_ms =
        issued_at_ms.saturating_add((lifetime_ms as f64 * lifetime_fraction) as u64);

    let due_at_ms = window_leg_ms.min(fraction_leg_ms);
    Duration::from_millis(due_at_ms.saturating_sub(now_ms)).max(min_delay)
}

/// True when a refresh is due: inside the fixed window before expiry, or
/// past the lifetime fraction. The companion predicate to
/// [`refresh_due_in`]; an expired token is always due.
pub fn refresh_due(
    claims: &TokenClaims,
    now_ms: u64,
    proactive_window: Duration,
    lifetime_fraction: f64,
) -> bool {
    let issued_at_ms = claims.issued_at_ms.unwrap_or(now_ms);
    let lifetime_ms = claims.expires_at_ms.saturating_sub(issued_at_ms);

    let window_due = claims.expires_at_ms.saturating_sub(now_ms)
        <= proactive_window.as_millis() as u64;
    let fraction_due =
        now_ms.saturating_sub(issued_at_ms) >= (lifetime_ms as f64 * lifetime_fraction) as u64;

    window_due || fraction_due
}

/// Current wall-clock time as milliseconds since Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

#[cfg(test)]
#[path = "clock_tests.rs"]
mod tests;
