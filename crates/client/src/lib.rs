// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resilient session layer for the tgwatch dashboard.
//!
//! Owns the persistent real-time channel to the monitoring backend
//! (reconnect with capped exponential backoff, heartbeat liveness,
//! generation-tagged teardown) and the authenticated HTTP surface
//! (bearer attachment, coalesced refresh-and-retry on 401). UI layers
//! sit downstream of [`router::MessageRouter`] and observe connection
//! state through a watch channel instead of polling internals.

pub mod api;
pub mod backoff;
pub mod config;
pub mod conn;
pub mod envelope;
pub mod error;
pub mod heartbeat;
pub mod router;
pub mod token;
pub mod transport;

pub use api::{ApiClient, AuthStatus};
pub use config::SessionConfig;
pub use conn::{ConnectionManager, ConnectionState};
pub use envelope::{Envelope, EnvelopeKind};
pub use error::SessionError;
pub use router::{MessageRouter, Route, Subscription};
pub use token::{Credential, FileStorage, MemoryStorage, StoragePort, TokenStore};
pub use transport::{Channel, ChannelEvent, ConnectError, Connector, WsConnector};
