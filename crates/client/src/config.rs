// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Configuration for the tgwatch session layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Base URL of the backend API (e.g. `http://localhost:8600`).
    pub api_base_url: String,

    /// Path of the real-time channel endpoint.
    pub ws_path: String,

    /// Heartbeat ping interval in milliseconds.
    pub heartbeat_interval_ms: u64,

    /// Liveness timeout in milliseconds (two missed heartbeats).
    pub heartbeat_timeout_ms: u64,

    /// Initial reconnect delay in milliseconds.
    pub reconnect_base_delay_ms: u64,

    /// Reconnect delay cap in milliseconds.
    pub reconnect_max_delay_ms: u64,

    /// Reconnect attempts before giving up and requiring manual action.
    pub reconnect_max_attempts: u32,

    /// Apply ±20% jitter to reconnect delays.
    pub reconnect_jitter: bool,

    /// Refresh the credential proactively this many seconds before expiry.
    pub refresh_skew_secs: u64,

    /// HTTP request timeout in milliseconds.
    pub http_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            api_base_url: "http://localhost:8600".to_owned(),
            ws_path: "/ws/diagnostics".to_owned(),
            heartbeat_interval_ms: 15_000,
            heartbeat_timeout_ms: 30_000,
            reconnect_base_delay_ms: 1_000,
            reconnect_max_delay_ms: 30_000,
            reconnect_max_attempts: 5,
            reconnect_jitter: false,
            refresh_skew_secs: 30,
            http_timeout_ms: 30_000,
        }
    }
}

impl SessionConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_millis(self.heartbeat_timeout_ms)
    }

    pub fn reconnect_base_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_base_delay_ms)
    }

    pub fn reconnect_max_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_max_delay_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms)
    }

    /// Channel endpoint URL: `http(s)` base rewritten to `ws(s)` plus the
    /// configured path. The bearer travels as a subprotocol, never here.
    pub fn ws_url(&self) -> String {
        let ws_base = if self.api_base_url.starts_with("https://") {
            self.api_base_url.replacen("https://", "wss://", 1)
        } else {
            self.api_base_url.replacen("http://", "ws://", 1)
        };
        format!("{ws_base}{}", self.ws_path)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
