// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! User-activity and visibility tracking.
//!
//! The host adapter forwards real interaction events (pointer, key, scroll,
//! touch) and foreground/background transitions into this monitor; tests
//! inject synthetic signals. State is a pair of watch channels, so the
//! coordinator can both read the latest value and await the next change.

use std::time::Duration;

use tokio::sync::watch;
use tracing::debug;

use crate::clock;

/// Interaction kinds the monitor observes. Observation is passive — the
/// monitor only records recency, it never consumes the event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivitySignal {
    Pointer,
    Key,
    Scroll,
    Touch,
}

impl ActivitySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pointer => "pointer",
            Self::Key => "key",
            Self::Scroll => "scroll",
            Self::Touch => "touch",
        }
    }
}

/// Tracks the last interaction instant and tab visibility.
pub struct ActivityMonitor {
    /// Latest interaction as ms since epoch (0 = never observed).
    activity_tx: watch::Sender<u64>,
    visible_tx: watch::Sender<bool>,
}

impl Default for ActivityMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ActivityMonitor {
    pub fn new() -> Self {
        let (activity_tx, _) = watch::channel(0);
        // Hosts start in the foreground.
        let (visible_tx, _) = watch::channel(true);
        Self { activity_tx, visible_tx }
    }

    /// Record an interaction now. Returns the recorded timestamp so the
    /// caller can mirror it into durable storage.
    pub fn record(&self, signal: ActivitySignal) -> u64 {
        let at_ms = clock::now_ms();
        debug!(signal = signal.as_str(), "activity recorded");
        self.activity_tx.send_replace(at_ms);
        at_ms
    }

    /// Seed the last-activity instant from persisted state at startup.
    pub fn seed(&self, at_ms: u64) {
        self.activity_tx.send_replace(at_ms);
    }

    /// Latest interaction instant (ms since epoch, 0 = never).
    pub fn last_activity_ms(&self) -> u64 {
        *self.activity_tx.borrow()
    }

    /// True when the last interaction is within `idle_threshold` of `now_ms`.
    /// A monitor that never saw activity reports inactive.
    pub fn is_active(&self, now_ms: u64, idle_threshold: Duration) -> bool {
        let last = self.last_activity_ms();
        if last == 0 {
            return false;
        }
        now_ms.saturating_sub(last) < idle_threshold.as_millis() as u64
    }

    /// Record a foreground/background transition.
    pub fn set_visible(&self, visible: bool) {
        debug!(visible, "visibility changed");
        self.visible_tx.send_replace(visible);
    }

    pub fn is_visible(&self) -> bool {
        *self.visible_tx.borrow()
    }

    /// Watch activity timestamps; used to wake deferred refresh decisions.
    pub fn activity_changes(&self) -> watch::Receiver<u64> {
        self.activity_tx.subscribe()
    }

    /// Watch visibility transitions.
    pub fn visibility_changes(&self) -> watch::Receiver<bool> {
        self.visible_tx.subscribe()
    }
}

#[cfg(test)]
#[path = "activity_tests.rs"]
mod tests;
