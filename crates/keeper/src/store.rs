// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable storage for the current token pair and last-activity timestamp.
//!
//! Pure accessors, no lifecycle logic. The pair is replaced wholesale on
//! every refresh — readers take a cloned snapshot under the read lock, so
//! nobody can observe an access token from one refresh cycle next to the
//! refresh token of another.
//!
//! When a persist path is configured, every mutation is written to disk
//! atomically (write tmp file, then rename).

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// The current access/refresh credential pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenPair {
    pub access_token: String,
    /// Absent for sessions whose login flow did not issue one.
    pub refresh_token: Option<String>,
}

/// Point-in-time view of the store.
#[derive(Debug, Clone, Default)]
pub struct StoreSnapshot {
    pub pair: Option<TokenPair>,
    /// Last user interaction as milliseconds since Unix epoch (0 = never).
    pub last_activity_ms: u64,
}

/// Serializable session state for file persistence.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct PersistedSession {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    access_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    #[serde(default)]
    last_activity_ms: u64,
}

#[derive(Debug, Default)]
struct StoreInner {
    pair: Option<TokenPair>,
    last_activity_ms: u64,
}

/// Shared token store. The single piece of mutable session state; mutated
/// only by the coordinator (refresh success) and explicit login/logout.
pub struct TokenStore {
    inner: RwLock<StoreInner>,
    persist_path: Option<PathBuf>,
}

impl TokenStore {
    pub fn new(persist_path: Option<PathBuf>) -> Self {
        Self { inner: RwLock::new(StoreInner::default()), persist_path }
    }

    /// Load persisted state from disk, if configured and present.
    /// Called once at startup before monitoring begins.
    pub async fn load_persisted(&self) {
        let Some(ref path) = self.persist_path else {
            return;
        };

        let data = match std::fs::read_to_string(path) {
            Ok(d) => d,
            Err(e) => {
                debug!(path = %path.display(), "no persisted session: {e}");
                return;
            }
        };

        let persisted: PersistedSession = match serde_json::from_str(&data) {
            Ok(p) => p,
            Err(e) => {
                warn!(path = %path.display(), "failed to parse persisted session: {e}");
                return;
            }
        };

        let mut inner = self.inner.write().await;
        inner.pair = persisted.access_token.map(|access_token| TokenPair {
            access_token,
            refresh_token: persisted.refresh_token,
        });
        inner.last_activity_ms = persisted.last_activity_ms;
        if inner.pair.is_some() {
            debug!(path = %path.display(), "loaded persisted session");
        }
    }

    /// Cloned view of the full store state.
    pub async fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read().await;
        StoreSnapshot { pair: inner.pair.clone(), last_activity_ms: inner.last_activity_ms }
    }

    /// Current access token, if any.
    pub async fn access_token(&self) -> Option<String> {
        self.inner.read().await.pair.as_ref().map(|p| p.access_token.clone())
    }

    /// Current refresh token, if any.
    pub async fn refresh_token(&self) -> Option<String> {
        self.inner.read().await.pair.as_ref().and_then(|p| p.refresh_token.clone())
    }

    /// Replace the whole credential pair in one write.
    pub async fn replace_pair(&self, pair: TokenPair) {
        {
            let mut inner = self.inner.write().await;
            inner.pair = Some(pair);
        }
        self.persist().await;
    }

    /// Drop all credentials (logout / teardown).
    pub async fn clear(&self) {
        {
            let mut inner = self.inner.write().await;
            inner.pair = None;
        }
        self.persist().await;
    }

    pub async fn set_last_activity(&self, at_ms: u64) {
        {
            let mut inner = self.inner.write().await;
            inner.last_activity_ms = at_ms;
        }
        self.persist().await;
    }

    pub async fn last_activity(&self) -> u64 {
        self.inner.read().await.last_activity_ms
    }

    /// Persist current state to disk (atomic write).
    async fn persist(&self) {
        let Some(ref path) = self.persist_path else {
            return;
        };

        let snapshot = {
            let inner = self.inner.read().await;
            PersistedSession {
                access_token: inner.pair.as_ref().map(|p| p.access_token.clone()),
                refresh_token: inner.pair.as_ref().and_then(|p| p.refresh_token.clone()),
                last_activity_ms: inner.last_activity_ms,
            }
        };

        let json = match serde_json::to_string_pretty(&snapshot) {
            Ok(j) => j,
            Err(e) => {
                warn!("failed to serialize session state: {e}");
                return;
            }
        };

        let tmp = path.with_extension("tmp");
        if let Some(parent) = path.parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        if let Err(e) = std::fs::write(&tmp, &json) {
            warn!(path = %tmp.display(), "failed to write session state: {e}");
            return;
        }
        if let Err(e) = std::fs::rename(&tmp, path) {
            warn!(path = %path.display(), "failed to rename session state file: {e}");
            return;
        }

        debug!(path = %path.display(), "persisted session state");
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
