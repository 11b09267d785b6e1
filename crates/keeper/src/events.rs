// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-wide session event channel.
//!
//! UI collaborators (route guards, notification surfaces) subscribe here to
//! learn about refresh outcomes and session teardown without being coupled
//! to the coordinator. Delivery rides a tokio broadcast channel: publishing
//! never blocks, and one slow or broken subscriber cannot disturb the rest.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

/// Capacity of the broadcast channel. Subscribers that fall further behind
/// than this see a `Lagged` error and should resynchronize from the store.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Events published by the session core.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// A refresh succeeded; a fresh token pair is in the store.
    Refreshed { new_expiry_ms: u64 },
    /// A refresh attempt failed. Fatal failures are followed by `LoggedOut`.
    RefreshFailed { reason: String },
    /// The session lapsed while the user was idle. No refresh was attempted.
    SessionExpired,
    /// The session ended: explicit logout or teardown after a fatal failure.
    LoggedOut { reason: String },
}

impl SessionEvent {
    /// Stable name for logging and wire use.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Refreshed { .. } => "refreshed",
            Self::RefreshFailed { .. } => "refresh_failed",
            Self::SessionExpired => "session_expired",
            Self::LoggedOut { .. } => "logged_out",
        }
    }
}

/// Typed publish/subscribe channel for [`SessionEvent`]s.
#[derive(Clone)]
pub struct SessionEventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionEventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionEventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Publish an event to all current subscribers. Best-effort: an event
    /// with no subscribers is dropped silently.
    pub fn publish(&self, event: SessionEvent) {
        debug!(kind = event.kind(), "session event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to session events from this point onward.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
#[path = "events_tests.rs"]
mod tests;
