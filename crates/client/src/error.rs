// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;

/// Session-layer errors callers are expected to branch on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// No credential in the store; connect refused before any network call.
    NotAuthenticated,
    /// Credential refresh failed irrecoverably; the store has been cleared.
    RefreshFailed(String),
    /// Reconnect attempts exhausted; explicit user action required.
    Exhausted,
    /// Channel or handshake failure.
    Transport(String),
}

impl SessionError {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "NOT_AUTHENTICATED",
            Self::RefreshFailed(_) => "REFRESH_FAILED",
            Self::Exhausted => "RECONNECT_EXHAUSTED",
            Self::Transport(_) => "TRANSPORT",
        }
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotAuthenticated => f.write_str("not authenticated"),
            Self::RefreshFailed(msg) => write!(f, "credential refresh failed: {msg}"),
            Self::Exhausted => f.write_str("reconnect attempts exhausted"),
            Self::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for SessionError {}
