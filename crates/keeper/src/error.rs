// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Errors surfaced by the session core.
///
/// `Clone` so a single refresh-cycle outcome can fan out to every caller
/// that joined the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Token cannot be decoded. Treated as already expired (fail closed).
    MalformedToken,
    /// Transport-level failure calling the refresh endpoint (includes
    /// timeouts). Transient — retried on the normal proactive schedule,
    /// never in a tight loop.
    RefreshNetwork(String),
    /// The server explicitly invalidated the refresh credential
    /// (revoked, reused, or expired). Always fatal — tears the session down.
    RefreshRejected(String),
    /// A non-refresh call failed authorization again after a successful
    /// refresh-and-retry. Terminal for that request.
    RequestAuthFailure,
    /// A request queued behind a refresh cycle gave up waiting.
    QueueTimeout,
    /// No usable session: never logged in, or already torn down.
    Unauthenticated,
    /// Transport-level failure on a non-refresh call.
    Transport(String),
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MalformedToken => "MALFORMED_TOKEN",
            Self::RefreshNetwork(_) => "REFRESH_NETWORK",
            Self::RefreshRejected(_) => "REFRESH_REJECTED",
            Self::RequestAuthFailure => "REQUEST_AUTH_FAILURE",
            Self::QueueTimeout => "QUEUE_TIMEOUT",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Transport(_) => "TRANSPORT",
        }
    }

    /// True when the error ends the session rather than a single call.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::RefreshRejected(_) | Self::Unauthenticated)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MalformedToken => write!(f, "malformed token"),
            Self::RefreshNetwork(msg) => write!(f, "refresh network error: {msg}"),
            Self::RefreshRejected(msg) => write!(f, "refresh rejected: {msg}"),
            Self::RequestAuthFailure => write!(f, "authorization failed after refresh"),
            Self::QueueTimeout => write!(f, "timed out waiting for refresh"),
            Self::Unauthenticated => write!(f, "not authenticated"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
