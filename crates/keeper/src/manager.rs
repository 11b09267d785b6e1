// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Composition root for the session core.
//!
//! Owns the store, event bus, activity monitor, coordinator, and gateway as
//! one constructed, dependency-injected object — no module-level globals.
//! Host adapters feed interaction and visibility events in through this
//! surface and route every authenticated call through [`send`](SessionManager::send).

use std::sync::Arc;
use std::sync::Once;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::activity::{ActivityMonitor, ActivitySignal};
use crate::clock;
use crate::config::SessionConfig;
use crate::coordinator::RefreshCoordinator;
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionEventBus};
use crate::gateway::{RequestGateway, RequestSpec};
use crate::store::{TokenPair, TokenStore};

/// Where the session stands right now. Derived on demand, never stored, so
/// it cannot drift from the tokens themselves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    Authenticated,
    /// Valid, but inside the proactive refresh window.
    RefreshDue,
    Expired,
}

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Initialize tracing/logging from config.
///
/// Uses `try_init` so it's safe to call multiple times (e.g. from tests).
pub fn init_tracing(config: &SessionConfig) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let result = match config.log_format.as_str() {
        "json" => fmt::fmt().with_env_filter(filter).json().try_init(),
        _ => fmt::fmt().with_env_filter(filter).try_init(),
    };
    drop(result);
}

/// One process-wide session coordinator instance.
pub struct SessionManager {
    config: SessionConfig,
    store: Arc<TokenStore>,
    bus: SessionEventBus,
    activity: Arc<ActivityMonitor>,
    coordinator: Arc<RefreshCoordinator>,
    gateway: RequestGateway,
}

impl SessionManager {
    /// Build the full component graph. Loads persisted state and, when a
    /// session survives the restart, re-arms proactive monitoring.
    pub async fn new(config: SessionConfig) -> anyhow::Result<Arc<Self>> {
        ensure_crypto();
        init_tracing(&config);

        let http = reqwest::Client::builder().timeout(config.http_timeout()).build()?;

        let store = Arc::new(TokenStore::new(config.persist_path.clone()));
        store.load_persisted().await;

        let bus = SessionEventBus::new();
        let activity = Arc::new(ActivityMonitor::new());
        activity.seed(store.last_activity().await);

        let coordinator = RefreshCoordinator::new(
            config.clone(),
            http.clone(),
            Arc::clone(&store),
            bus.clone(),
            Arc::clone(&activity),
        );
        if store.access_token().await.is_some() {
            coordinator.schedule_proactive().await;
        }

        let gateway = RequestGateway::new(
            http,
            &config.base_url,
            &config.refresh_url,
            config.queue_timeout(),
            Arc::clone(&store),
            Arc::clone(&coordinator),
        );

        Ok(Arc::new(Self { config, store, bus, activity, coordinator, gateway }))
    }

    /// A login flow completed: seed the token pair and arm monitoring.
    /// Resets a torn-down coordinator back to service.
    pub async fn login(&self, access_token: String, refresh_token: Option<String>) {
        info!("login completed, session armed");
        self.store
            .replace_pair(TokenPair { access_token, refresh_token })
            .await;
        self.coordinator.reset_after_login().await;
    }

    /// Explicit logout: tear down immediately without waiting for a failure.
    pub async fn logout(&self, reason: &str) {
        self.coordinator.logout(reason).await;
    }

    /// Send an authenticated request through the gateway.
    pub async fn send(&self, spec: RequestSpec) -> Result<reqwest::Response, SessionError> {
        self.gateway.send(spec).await
    }

    /// Record a user interaction.
    pub async fn record_activity(&self, signal: ActivitySignal) {
        let at_ms = self.activity.record(signal);
        self.store.set_last_activity(at_ms).await;
    }

    /// Record a foreground/background transition.
    pub fn set_visible(&self, visible: bool) {
        self.activity.set_visible(visible);
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    /// Derive the current session state from the store and the clock.
    pub async fn session_state(&self) -> SessionState {
        let Some(token) = self.store.access_token().await else {
            return SessionState::Unauthenticated;
        };
        let now_ms = clock::now_ms();
        let Ok(claims) = clock::decode_claims(&token) else {
            // Fail closed.
            return SessionState::Expired;
        };
        if clock::is_expired(&token, now_ms, self.config.skew_tolerance()) {
            return SessionState::Expired;
        }
        if clock::refresh_due(
            &claims,
            now_ms,
            self.config.proactive_window(),
            self.config.lifetime_fraction,
        ) {
            return SessionState::RefreshDue;
        }
        SessionState::Authenticated
    }

    /// React to activity and visibility signals until `shutdown` fires.
    ///
    /// This is what turns a recorded interaction into a deferred-refresh
    /// decision: a refresh that was postponed because the user was idle
    /// executes on the next signal that proves someone is there.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let mut activity_rx = self.activity.activity_changes();
        let mut visible_rx = self.activity.visibility_changes();

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("session monitor shutting down");
                    return;
                }
                res = activity_rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                    self.coordinator.on_activity().await;
                }
                res = visible_rx.changed() => {
                    if res.is_err() {
                        return;
                    }
                    // Only a transition back into the foreground re-checks;
                    // going hidden changes nothing.
                    if *visible_rx.borrow_and_update() {
                        self.coordinator.on_visible().await;
                    }
                }
            }
        }
    }

    pub fn store(&self) -> &Arc<TokenStore> {
        &self.store
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn activity(&self) -> &Arc<ActivityMonitor> {
        &self.activity
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod tests;
