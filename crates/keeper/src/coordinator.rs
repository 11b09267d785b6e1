// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The single authority for token refresh.
//!
//! At most one refresh cycle exists process-wide. The `Idle -> Refreshing`
//! transition and cycle registration happen inside one mutex critical
//! section with no await point, so any number of concurrent callers during
//! a refresh window produce exactly one call to the refresh endpoint; the
//! rest join the in-flight cycle and receive the same outcome.
//!
//! A proactive one-shot timer refreshes active sessions before expiry and
//! lets idle sessions lapse instead of refreshing tokens nobody is using.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use serde::Deserialize;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityMonitor;
use crate::clock;
use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::events::{SessionEvent, SessionEventBus};
use crate::store::{TokenPair, TokenStore};

/// Settled result of one refresh cycle, fanned out to every joiner.
type CycleOutcome = Result<String, SessionError>;

/// Shared handle to an in-flight refresh cycle. Joiners clone this and
/// await the watch channel; the value flips from `None` to `Some` exactly
/// once, when the cycle settles.
#[derive(Clone)]
struct CycleHandle {
    rx: watch::Receiver<Option<CycleOutcome>>,
}

/// Coordinator lifecycle. `TornDown` is terminal until an external
/// re-login resets it to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Refreshing,
    TornDown,
}

enum CoordinatorState {
    Idle,
    Refreshing(CycleHandle),
    TornDown,
}

/// Wire shape of a successful refresh response. Field names vary across
/// backends; accept both snake_case and camelCase spellings.
#[derive(Debug, Deserialize)]
struct RefreshResponse {
    #[serde(alias = "accessToken")]
    access_token: String,
    #[serde(default, alias = "refreshToken")]
    refresh_token: Option<String>,
}

/// Wire shape of a refresh error body (OAuth-style).
#[derive(Debug, Deserialize)]
struct RefreshErrorResponse {
    error: String,
    #[serde(default)]
    error_description: Option<String>,
}

/// What `ensure_fresh` decided to do while holding the state lock.
enum Plan {
    /// Token is still fresh — hand it straight back.
    Fresh(String),
    /// A cycle is in flight — join it.
    Join(CycleHandle),
    /// We created a new cycle: start its worker and join it.
    Run {
        tx: watch::Sender<Option<CycleOutcome>>,
        rx: watch::Receiver<Option<CycleOutcome>>,
        refresh_token: String,
    },
    /// Token is due but there is no refresh credential to use.
    NoCredential,
}

/// Deduplicating refresh executor and proactive scheduler.
pub struct RefreshCoordinator {
    state: Mutex<CoordinatorState>,
    store: Arc<TokenStore>,
    bus: SessionEventBus,
    activity: Arc<ActivityMonitor>,
    config: SessionConfig,
    http: reqwest::Client,
    /// Cancellation for the currently armed proactive timer, if any.
    timer: Mutex<Option<CancellationToken>>,
}

impl RefreshCoordinator {
    pub fn new(
        config: SessionConfig,
        http: reqwest::Client,
        store: Arc<TokenStore>,
        bus: SessionEventBus,
        activity: Arc<ActivityMonitor>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CoordinatorState::Idle),
            store,
            bus,
            activity,
            config,
            http,
            timer: Mutex::new(None),
        })
    }

    /// Current lifecycle phase.
    pub async fn phase(&self) -> Phase {
        match &*self.state.lock().await {
            CoordinatorState::Idle => Phase::Idle,
            CoordinatorState::Refreshing(_) => Phase::Refreshing,
            CoordinatorState::TornDown => Phase::TornDown,
        }
    }

    /// Return a usable access token, refreshing first if the current one is
    /// due or expired.
    ///
    /// Deduplication guarantee: callers arriving while a refresh is in
    /// flight join the existing cycle and all see the same outcome.
    pub async fn ensure_fresh(self: &Arc<Self>) -> Result<String, SessionError> {
        let plan = {
            let mut state = self.state.lock().await;
            match &*state {
                CoordinatorState::TornDown => return Err(SessionError::Unauthenticated),
                CoordinatorState::Refreshing(handle) => Plan::Join(handle.clone()),
                CoordinatorState::Idle => {
                    let snap = self.store.snapshot().await;
                    let Some(pair) = snap.pair else {
                        return Err(SessionError::Unauthenticated);
                    };
                    let now_ms = clock::now_ms();
                    if !self.refresh_needed(&pair.access_token, now_ms) {
                        Plan::Fresh(pair.access_token)
                    } else {
                        match pair.refresh_token {
                            Some(refresh_token) => {
                                let (tx, rx) = watch::channel(None);
                                *state =
                                    CoordinatorState::Refreshing(CycleHandle { rx: rx.clone() });
                                Plan::Run { tx, rx, refresh_token }
                            }
                            None => Plan::NoCredential,
                        }
                    }
                }
            }
        };

        match plan {
            Plan::Fresh(token) => Ok(token),
            Plan::Join(handle) => Self::join_cycle(handle).await,
            Plan::Run { tx, rx, refresh_token } => {
                // The cycle's work runs detached: a caller that stops
                // waiting (queue timeout, dropped request future) must not
                // abandon the cycle with the state machine stuck in
                // `Refreshing`. The initiating caller joins like any other.
                let coordinator = Arc::clone(self);
                tokio::spawn(async move {
                    coordinator.run_cycle(tx, refresh_token).await;
                });
                Self::join_cycle(CycleHandle { rx }).await
            }
            Plan::NoCredential => {
                let reason = "token due with no refresh credential";
                warn!("{reason}, tearing down");
                self.bus.publish(SessionEvent::RefreshFailed { reason: reason.to_owned() });
                self.finish_teardown(reason).await;
                Err(SessionError::RefreshRejected(reason.to_owned()))
            }
        }
    }

    /// Await an in-flight cycle's outcome.
    async fn join_cycle(mut handle: CycleHandle) -> Result<String, SessionError> {
        loop {
            if let Some(outcome) = handle.rx.borrow_and_update().clone() {
                return outcome;
            }
            if handle.rx.changed().await.is_err() {
                // Owner dropped without settling; treat as a transport loss.
                return Err(SessionError::RefreshNetwork("refresh cycle abandoned".into()));
            }
        }
    }

    /// Run one cycle to completion: call the endpoint, apply the outcome,
    /// settle every joiner, and leave the state machine consistent. Runs
    /// in its own task and is never cancelled from outside.
    async fn run_cycle(
        self: Arc<Self>,
        tx: watch::Sender<Option<CycleOutcome>>,
        refresh_token: String,
    ) {
        let started_at = Instant::now();
        let result = self.do_refresh(&refresh_token).await;

        let outcome: CycleOutcome = match result {
            Ok(pair) => self.apply_refresh_success(pair).await,
            Err(err) => self.apply_refresh_failure(err).await,
        };

        match &outcome {
            Ok(_) => {
                info!(elapsed_ms = started_at.elapsed().as_millis() as u64, "token refreshed");
            }
            Err(e) => {
                warn!(error = %e, "refresh cycle failed");
            }
        }

        // Settle joiners only after the store and state machine are updated,
        // so a joiner that immediately re-enters sees a consistent world.
        tx.send_replace(Some(outcome));
    }

    /// Success path: store the new pair atomically, announce, re-arm.
    ///
    /// Checks that the cycle still owns the session — an explicit logout
    /// that raced the response wins, and the late tokens are discarded.
    async fn apply_refresh_success(self: &Arc<Self>, pair: TokenPair) -> CycleOutcome {
        let new_expiry_ms = match clock::decode_expiry(&pair.access_token) {
            Ok(ms) => ms,
            Err(_) => {
                // The endpoint returned something we cannot schedule against.
                let reason = "refresh endpoint returned an undecodable token";
                self.bus.publish(SessionEvent::RefreshFailed { reason: reason.to_owned() });
                self.finish_teardown(reason).await;
                return Err(SessionError::RefreshRejected(reason.to_owned()));
            }
        };

        {
            let mut state = self.state.lock().await;
            match &*state {
                CoordinatorState::Refreshing(_) => {
                    self.store.replace_pair(pair.clone()).await;
                    *state = CoordinatorState::Idle;
                }
                _ => {
                    debug!("session torn down while refreshing, discarding new tokens");
                    return Err(SessionError::Unauthenticated);
                }
            }
        }

        self.bus.publish(SessionEvent::Refreshed { new_expiry_ms });
        self.schedule_proactive().await;
        Ok(pair.access_token)
    }

    /// Failure path: rejection always tears the session down; a network
    /// failure only does when the token is already unusable, otherwise the
    /// session keeps its current token and retries on the normal schedule.
    async fn apply_refresh_failure(self: &Arc<Self>, err: SessionError) -> CycleOutcome {
        self.bus.publish(SessionEvent::RefreshFailed { reason: err.to_string() });

        let rejected = matches!(err, SessionError::RefreshRejected(_));
        let expired = match self.store.access_token().await {
            Some(token) => clock::is_expired(&token, clock::now_ms(), self.config.skew_tolerance()),
            None => true,
        };

        if rejected || expired {
            let reason = if rejected {
                "refresh credential rejected"
            } else {
                "refresh unreachable with token expired"
            };
            self.finish_teardown(reason).await;
        } else {
            // Token still valid: back to Idle, retry on the proactive
            // schedule rather than in a tight loop.
            let mut state = self.state.lock().await;
            if matches!(*state, CoordinatorState::Refreshing(_)) {
                *state = CoordinatorState::Idle;
            }
            drop(state);
            self.schedule_proactive().await;
        }

        Err(err)
    }

    /// Execute one refresh request against the endpoint.
    ///
    /// Rotation contract: the latest pair returned by the server is
    /// authoritative. When the server omits a new refresh token, the one we
    /// just used stays valid and is kept.
    async fn do_refresh(&self, refresh_token: &str) -> Result<TokenPair, SessionError> {
        let resp = self
            .http
            .post(&self.config.refresh_url)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SessionError::RefreshNetwork("refresh request timed out".into())
                } else {
                    SessionError::RefreshNetwork(format!("HTTP error: {e}"))
                }
            })?;

        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|e| SessionError::RefreshNetwork(format!("read body: {e}")))?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<RefreshErrorResponse>(&body) {
                let detail = err.error_description.unwrap_or(err.error.clone());
                if err.error == "invalid_grant" || status.as_u16() == 401 || status.as_u16() == 403
                {
                    return Err(SessionError::RefreshRejected(detail));
                }
                return Err(SessionError::RefreshNetwork(format!("{}: {detail}", err.error)));
            }
            if status.as_u16() == 401 || status.as_u16() == 403 {
                return Err(SessionError::RefreshRejected(format!("HTTP {status}")));
            }
            return Err(SessionError::RefreshNetwork(format!("HTTP {status}: {body}")));
        }

        let token: RefreshResponse = serde_json::from_str(&body)
            .map_err(|e| SessionError::RefreshNetwork(format!("parse response: {e}")))?;

        Ok(TokenPair {
            access_token: token.access_token,
            refresh_token: token.refresh_token.or_else(|| Some(refresh_token.to_owned())),
        })
    }

    // ── Proactive scheduling ────────────────────────────────────────────

    /// Arm (or re-arm) the one-shot proactive timer from the current token.
    /// Cancels any previously armed timer.
    pub async fn schedule_proactive(self: &Arc<Self>) {
        let snap = self.store.snapshot().await;
        let Some(pair) = snap.pair else {
            self.cancel_timer().await;
            return;
        };

        let now_ms = clock::now_ms();
        let delay = match clock::decode_claims(&pair.access_token) {
            Ok(claims) => clock::refresh_due_in(
                &claims,
                now_ms,
                self.config.proactive_window(),
                self.config.lifetime_fraction,
                self.config.min_refresh_delay(),
            ),
            // Undecodable token: fire at the floor and let the expiry
            // decision run (fail closed).
            Err(_) => self.config.min_refresh_delay(),
        };

        let cancel = CancellationToken::new();
        {
            let mut timer = self.timer.lock().await;
            if let Some(prev) = timer.take() {
                prev.cancel();
            }
            *timer = Some(cancel.clone());
        }

        debug!(delay_secs = delay.as_secs(), "proactive refresh armed");
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => coordinator.on_timer_fire().await,
                _ = cancel.cancelled() => {}
            }
        });
    }

    async fn cancel_timer(&self) {
        let mut timer = self.timer.lock().await;
        if let Some(prev) = timer.take() {
            prev.cancel();
        }
    }

    /// Decision point when the proactive timer fires.
    ///
    /// Expired + active user: refresh now. Expired + idle user: the session
    /// lapses — publish `SessionExpired` and tear down without touching the
    /// endpoint. Due but idle: defer to the next activity or visibility
    /// signal, with a fallback timer at the expiry instant so an abandoned
    /// session still lapses deterministically.
    ///
    /// Boxed: timer tasks re-enter scheduling, which re-enters this, and
    /// the future type must not contain itself.
    fn on_timer_fire(self: Arc<Self>) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(async move {
            // A timer task that lost the race against logout or teardown
            // must not act on the dead session.
            if self.phase().await != Phase::Idle {
                return;
            }
            let snap = self.store.snapshot().await;
            let Some(pair) = snap.pair else {
                return;
            };

            let now_ms = clock::now_ms();
            let expired =
                clock::is_expired(&pair.access_token, now_ms, self.config.skew_tolerance());
            let active = self.activity.is_active(now_ms, self.config.idle_threshold());

            if expired {
                if active {
                    if let Err(e) = self.ensure_fresh().await {
                        debug!(error = %e, "timer-driven refresh failed");
                    }
                } else {
                    self.expire_session().await;
                }
                return;
            }

            if self.refresh_needed(&pair.access_token, now_ms) {
                if active {
                    if let Err(e) = self.ensure_fresh().await {
                        debug!(error = %e, "timer-driven refresh failed");
                    }
                } else {
                    debug!("refresh due but user idle, deferring to next signal");
                    self.rearm_at_expiry(&pair.access_token, now_ms).await;
                }
            } else {
                // Fired early (for example the min-delay floor): recompute.
                self.schedule_proactive().await;
            }
        })
    }

    /// Arm a fallback timer at the token's expiry instant.
    async fn rearm_at_expiry(self: &Arc<Self>, access_token: &str, now_ms: u64) {
        let delay = clock::time_remaining(access_token, now_ms);

        let cancel = CancellationToken::new();
        {
            let mut timer = self.timer.lock().await;
            if let Some(prev) = timer.take() {
                prev.cancel();
            }
            *timer = Some(cancel.clone());
        }

        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => coordinator.on_timer_fire().await,
                _ = cancel.cancelled() => {}
            }
        });
    }

    /// The user interacted. Cheap no-op unless a refresh is actually due.
    pub async fn on_activity(self: &Arc<Self>) {
        if self.phase().await != Phase::Idle {
            return;
        }
        let Some(token) = self.store.access_token().await else {
            return;
        };
        if self.refresh_needed(&token, clock::now_ms()) {
            if let Err(e) = self.ensure_fresh().await {
                debug!(error = %e, "activity-driven refresh failed");
            }
        }
    }

    /// The tab regained visibility: re-validate immediately. Timers may
    /// have been frozen while the host was suspended, so the armed delay
    /// can no longer be trusted.
    pub async fn on_visible(self: &Arc<Self>) {
        let Some(token) = self.store.access_token().await else {
            return;
        };
        if clock::is_expired(&token, clock::now_ms(), self.config.skew_tolerance()) {
            if let Err(e) = self.ensure_fresh().await {
                debug!(error = %e, "visibility-driven refresh failed");
            }
        } else {
            self.schedule_proactive().await;
        }
    }

    // ── Teardown and reset ──────────────────────────────────────────────

    /// The session lapsed while idle: announce expiry, then tear down.
    async fn expire_session(&self) {
        info!("session expired while idle");
        self.bus.publish(SessionEvent::SessionExpired);
        self.finish_teardown("session expired").await;
    }

    /// Explicit logout requested by a collaborator.
    pub async fn logout(&self, reason: &str) {
        info!(reason, "logout requested");
        self.finish_teardown(reason).await;
    }

    /// Clear all session state and publish `LoggedOut`. Terminal until
    /// [`reset_after_login`](Self::reset_after_login). Idempotent: a timer
    /// losing the race against an explicit logout must not publish a second
    /// `LoggedOut`.
    async fn finish_teardown(&self, reason: &str) {
        {
            let mut state = self.state.lock().await;
            if matches!(*state, CoordinatorState::TornDown) {
                return;
            }
            *state = CoordinatorState::TornDown;
        }
        self.cancel_timer().await;
        self.store.clear().await;
        self.bus.publish(SessionEvent::LoggedOut { reason: reason.to_owned() });
    }

    /// A new login seeded the store: leave `TornDown`, re-arm monitoring.
    pub async fn reset_after_login(self: &Arc<Self>) {
        {
            let mut state = self.state.lock().await;
            *state = CoordinatorState::Idle;
        }
        self.schedule_proactive().await;
    }

    /// True when the token is expired or inside the due window.
    fn refresh_needed(&self, access_token: &str, now_ms: u64) -> bool {
        let Ok(claims) = clock::decode_claims(access_token) else {
            // Fail closed.
            return true;
        };
        clock::is_expired(access_token, now_ms, self.config.skew_tolerance())
            || clock::refresh_due(
                &claims,
                now_ms,
                self.config.proactive_window(),
                self.config.lifetime_fraction,
            )
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
