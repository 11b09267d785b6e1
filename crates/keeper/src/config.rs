// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default seconds before expiry to trigger a proactive refresh (20 minutes).
const DEFAULT_PROACTIVE_WINDOW_SECS: u64 = 1200;

/// Default fraction of token lifetime after which a refresh is due.
const DEFAULT_LIFETIME_FRACTION: f64 = 0.85;

/// Default floor for the proactive timer delay.
const DEFAULT_MIN_REFRESH_DELAY_SECS: u64 = 30;

/// Default clock-skew tolerance when judging expiry.
const DEFAULT_SKEW_TOLERANCE_SECS: u64 = 30;

/// Default idle threshold: no interaction for this long means inactive.
const DEFAULT_IDLE_THRESHOLD_SECS: u64 = 1800;

/// Default bound on waiting for an in-flight refresh cycle.
const DEFAULT_QUEUE_TIMEOUT_SECS: u64 = 30;

/// Default HTTP timeout for the refresh call and authenticated sends.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Configuration for a session coordinator instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Base URL for authenticated API calls (no trailing slash).
    pub base_url: String,
    /// Full URL of the refresh endpoint.
    pub refresh_url: String,
    /// Seconds before expiry at which a refresh becomes due.
    #[serde(default = "default_proactive_window")]
    pub proactive_window_secs: u64,
    /// Fraction of token lifetime after which a refresh becomes due.
    #[serde(default = "default_lifetime_fraction")]
    pub lifetime_fraction: f64,
    /// Minimum delay before the proactive timer may fire.
    #[serde(default = "default_min_refresh_delay")]
    pub min_refresh_delay_secs: u64,
    /// Clock-skew tolerance: treat the token as expired this early.
    #[serde(default = "default_skew_tolerance")]
    pub skew_tolerance_secs: u64,
    /// Seconds without interaction after which the user counts as idle.
    #[serde(default = "default_idle_threshold")]
    pub idle_threshold_secs: u64,
    /// Bound on how long a request waits behind an in-flight refresh.
    #[serde(default = "default_queue_timeout")]
    pub queue_timeout_secs: u64,
    /// HTTP request timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
    /// Path to persist session state (JSON file). When set, tokens and the
    /// last-activity timestamp survive a restart.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub persist_path: Option<PathBuf>,
    /// Log filter (tracing `EnvFilter` syntax).
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Log output format: "text" or "json".
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl SessionConfig {
    /// Minimal config for the given endpoints, defaults elsewhere.
    pub fn new(base_url: impl Into<String>, refresh_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            refresh_url: refresh_url.into(),
            proactive_window_secs: default_proactive_window(),
            lifetime_fraction: default_lifetime_fraction(),
            min_refresh_delay_secs: default_min_refresh_delay(),
            skew_tolerance_secs: default_skew_tolerance(),
            idle_threshold_secs: default_idle_threshold(),
            queue_timeout_secs: default_queue_timeout(),
            http_timeout_secs: default_http_timeout(),
            persist_path: None,
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }

    pub fn proactive_window(&self) -> Duration {
        Duration::from_secs(self.proactive_window_secs)
    }

    pub fn min_refresh_delay(&self) -> Duration {
        Duration::from_secs(self.min_refresh_delay_secs)
    }

    pub fn skew_tolerance(&self) -> Duration {
        Duration::from_secs(self.skew_tolerance_secs)
    }

    pub fn idle_threshold(&self) -> Duration {
        Duration::from_secs(self.idle_threshold_secs)
    }

    pub fn queue_timeout(&self) -> Duration {
        Duration::from_secs(self.queue_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn default_proactive_window() -> u64 {
    DEFAULT_PROACTIVE_WINDOW_SECS
}

fn default_lifetime_fraction() -> f64 {
    DEFAULT_LIFETIME_FRACTION
}

fn default_min_refresh_delay() -> u64 {
    DEFAULT_MIN_REFRESH_DELAY_SECS
}

fn default_skew_tolerance() -> u64 {
    DEFAULT_SKEW_TOLERANCE_SECS
}

fn default_idle_threshold() -> u64 {
    DEFAULT_IDLE_THRESHOLD_SECS
}

fn default_queue_timeout() -> u64 {
    DEFAULT_QUEUE_TIMEOUT_SECS
}

fn default_http_timeout() -> u64 {
    DEFAULT_HTTP_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_owned()
}

fn default_log_format() -> String {
    "text".to_owned()
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
