// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Tokenkeeper: client-side session and token lifecycle coordination.
//!
//! Keeps a short-lived access token usable for as long as possible without
//! forcing re-login: deduplicated refresh execution, proactive scheduling
//! from the token's own lifetime, a 401 refresh-and-replay gateway, and
//! activity/visibility-driven expiry for idle sessions.

pub mod activity;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod manager;
pub mod store;
#[cfg(test)]
pub mod test_support;

pub use activity::{ActivityMonitor, ActivitySignal};
pub use config::SessionConfig;
pub use coordinator::{Phase, RefreshCoordinator};
pub use error::SessionError;
pub use events::{SessionEvent, SessionEventBus};
pub use gateway::{RequestGateway, RequestSpec};
pub use manager::{ensure_crypto, init_tracing, SessionManager, SessionState};
pub use store::{TokenPair, TokenStore};
