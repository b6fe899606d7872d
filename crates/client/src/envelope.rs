// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire-format envelope types for the diagnostics channel.
//!
//! Every frame exchanged over the channel is one JSON envelope with a
//! required `type` tag and optional `payload`/`timestamp` fields. Kinds the
//! client does not recognize are preserved as [`EnvelopeKind::Unknown`] so
//! they can still reach generic listeners.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Message kind tag, `snake_case` on the wire.
///
/// `ConnectionError` is synthesized locally by the connection manager when
/// reconnection is exhausted; the server never sends it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Ping,
    Pong,
    DiagnosticsUpdate,
    ChatMessage,
    ConversationUpdate,
    SystemHealth,
    Notification,
    ConnectionError,
    /// Unrecognized wire type, tag preserved verbatim.
    Unknown(String),
}

impl EnvelopeKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::DiagnosticsUpdate => "diagnostics_update",
            Self::ChatMessage => "chat_message",
            Self::ConversationUpdate => "conversation_update",
            Self::SystemHealth => "system_health",
            Self::Notification => "notification",
            Self::ConnectionError => "connection_error",
            Self::Unknown(tag) => tag,
        }
    }
}

impl From<&str> for EnvelopeKind {
    fn from(tag: &str) -> Self {
        match tag {
            "ping" => Self::Ping,
            "pong" => Self::Pong,
            "diagnostics_update" => Self::DiagnosticsUpdate,
            "chat_message" => Self::ChatMessage,
            "conversation_update" => Self::ConversationUpdate,
            "system_health" => Self::SystemHealth,
            "notification" => Self::Notification,
            "connection_error" => Self::ConnectionError,
            other => Self::Unknown(other.to_owned()),
        }
    }
}

impl std::fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EnvelopeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EnvelopeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let tag = String::deserialize(deserializer)?;
        Ok(Self::from(tag.as_str()))
    }
}

/// One discrete message unit exchanged over the channel.
///
/// Immutable once received; routing never mutates `payload`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: EnvelopeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Envelope {
    /// Client heartbeat frame, stamped with the current time.
    pub fn ping() -> Self {
        Self { kind: EnvelopeKind::Ping, payload: None, timestamp: Some(Utc::now()) }
    }

    /// Locally synthesized error frame surfaced to UI listeners when the
    /// session enters a terminal failure state.
    pub fn connection_error(message: impl Into<String>) -> Self {
        Self {
            kind: EnvelopeKind::ConnectionError,
            payload: Some(serde_json::json!({ "error": message.into() })),
            timestamp: Some(Utc::now()),
        }
    }

    /// Decode an inbound text frame.
    ///
    /// Malformed frames are a protocol error for the caller to log and drop;
    /// they never tear down the channel.
    pub fn decode(text: &str) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_str(text)?;
        if value.get("type").is_none() {
            return Err(serde_json::Error::custom("envelope missing required `type` field"));
        }
        serde_json::from_value(value)
    }

    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[path = "envelope_tests.rs"]
mod tests;
