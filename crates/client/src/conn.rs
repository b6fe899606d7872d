// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Connection lifecycle for the real-time channel.
//!
//! One [`ConnectionManager`] owns one logical channel: it authenticates the
//! handshake from the token store, keeps the channel alive with the
//! heartbeat monitor, reconnects with capped exponential backoff, and fans
//! inbound envelopes out through the message router.
//!
//! Every `connect()`/`disconnect()` bumps a generation counter, and every
//! state mutation from the spawned session task is gated on its captured
//! generation, so a slow-closing old channel can never corrupt the state
//! of a newer one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::backoff::ReconnectSchedule;
use crate::config::SessionConfig;
use crate::envelope::{Envelope, EnvelopeKind};
use crate::error::SessionError;
use crate::heartbeat::LivenessMonitor;
use crate::router::{MessageRouter, Route, Subscription};
use crate::token::TokenStore;
use crate::transport::{Channel, ChannelEvent, ConnectError, Connector};

/// Observable channel state. Exactly one per logical channel; transitions
/// are serialized through the session task and the connect/disconnect lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    /// Reconnect attempts exhausted or auth irrecoverably rejected.
    /// Requires explicit user action (`connect()` again).
    Failed,
}

/// How an open channel ended.
enum CloseOutcome {
    /// Local `disconnect()`; no reconnect.
    Deliberate,
    /// Server sent a normal closure (1000); no reconnect.
    Normal,
    /// Anything else; reconnect per schedule.
    Unexpected(String),
}

struct SessionHandle {
    cancel: CancellationToken,
    outbound: Option<mpsc::Sender<String>>,
}

struct Inner {
    config: SessionConfig,
    tokens: Arc<TokenStore>,
    api: Arc<ApiClient>,
    connector: Arc<dyn Connector>,
    router: Arc<MessageRouter>,
    state_tx: watch::Sender<ConnectionState>,
    last_error: Mutex<Option<String>>,
    generation: AtomicU64,
    session: Mutex<SessionHandle>,
}

impl Inner {
    /// Mutate state only when `generation` is still current.
    fn set_state(&self, generation: u64, state: ConnectionState) -> bool {
        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, ?state, "stale generation, state change discarded");
            return false;
        }
        self.state_tx.send_replace(state);
        true
    }

    fn record_error(&self, message: impl Into<String>) {
        if let Ok(mut last) = self.last_error.lock() {
            *last = Some(message.into());
        }
    }

    /// Terminal failure: record the error, flip to `Failed`, and surface a
    /// `connection_error` envelope through the router.
    fn fail(&self, generation: u64, message: String) {
        if !self.set_state(generation, ConnectionState::Failed) {
            return;
        }
        tracing::warn!(generation, error = %message, "connection failed");
        self.record_error(message.clone());
        self.router.dispatch(&Envelope::connection_error(message));
    }

    fn set_outbound(&self, generation: u64, outbound: Option<mpsc::Sender<String>>) {
        if self.generation.load(Ordering::SeqCst) != generation {
            return;
        }
        if let Ok(mut session) = self.session.lock() {
            session.outbound = outbound;
        }
    }
}

/// Owner of the real-time channel lifecycle.
pub struct ConnectionManager {
    inner: Arc<Inner>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionManager {
    /// Build a manager over an injected connector. The token store is shared
    /// with `api`, whose refresh path is reused when the channel handshake
    /// is rejected for auth reasons.
    pub fn new(config: SessionConfig, api: Arc<ApiClient>, connector: Arc<dyn Connector>) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
        let tokens = Arc::clone(api.tokens());
        let inner = Arc::new(Inner {
            config,
            tokens,
            api,
            connector,
            router: MessageRouter::new(),
            state_tx,
            last_error: Mutex::new(None),
            generation: AtomicU64::new(0),
            session: Mutex::new(SessionHandle {
                cancel: CancellationToken::new(),
                outbound: None,
            }),
        });
        Self { inner, state_rx }
    }

    /// Observable connection state, for UIs rendering
    /// Live / Connecting / Offline / Error without polling internals.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Last connection-level error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.inner.last_error.lock().ok().and_then(|e| e.clone())
    }

    /// The router downstream consumers subscribe through.
    pub fn router(&self) -> &Arc<MessageRouter> {
        &self.inner.router
    }

    /// Register a listener; delegates to the router.
    pub fn on(
        &self,
        route: Route,
        callback: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Subscription {
        self.inner.router.on(route, callback)
    }

    /// Open the channel. No-op while already `Connecting` or `Open`; fails
    /// fast without touching the network when no credential is present.
    pub fn connect(&self) -> Result<(), SessionError> {
        let Ok(mut session) = self.inner.session.lock() else {
            return Err(SessionError::Transport("session lock poisoned".to_owned()));
        };

        match *self.state_rx.borrow() {
            ConnectionState::Connecting | ConnectionState::Open => {
                tracing::debug!("connect() while already active, ignoring");
                return Ok(());
            }
            _ => {}
        }

        if self.inner.tokens.get().is_none() {
            self.inner.record_error("no credential present".to_owned());
            return Err(SessionError::NotAuthenticated);
        }

        let generation = self.inner.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        session.cancel.cancel();
        session.cancel = cancel.clone();
        session.outbound = None;
        // Publish Connecting before releasing the lock so a racing second
        // connect() observes it and no-ops.
        self.inner.state_tx.send_replace(ConnectionState::Connecting);
        drop(session);

        if let Ok(mut last) = self.inner.last_error.lock() {
            *last = None;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            run_session(inner, generation, cancel).await;
        });
        Ok(())
    }

    /// Explicit user-driven reconnect after `Failed`. Same as `connect()`;
    /// the backoff schedule starts fresh.
    pub fn manual_reconnect(&self) -> Result<(), SessionError> {
        self.connect()
    }

    /// Close the channel deliberately. Synchronously cancels the heartbeat
    /// monitor, any pending reconnect timer, and the channel pumps, and
    /// bumps the generation so stale callbacks are discarded.
    pub fn disconnect(&self) {
        let Ok(mut session) = self.inner.session.lock() else {
            return;
        };
        self.inner.state_tx.send_replace(ConnectionState::Closing);
        session.cancel.cancel();
        session.outbound = None;
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        self.inner.state_tx.send_replace(ConnectionState::Closed);
    }

    /// Send an envelope. Returns `false` (never errors) unless the channel
    /// is `Open` and the frame was queued.
    pub fn send(&self, envelope: &Envelope) -> bool {
        if *self.state_rx.borrow() != ConnectionState::Open {
            return false;
        }
        let outbound = match self.inner.session.lock() {
            Ok(session) => session.outbound.clone(),
            Err(_) => None,
        };
        let Some(outbound) = outbound else {
            return false;
        };
        match envelope.encode() {
            Ok(text) => outbound.try_send(text).is_ok(),
            Err(e) => {
                tracing::debug!(err = %e, "failed to encode outbound envelope");
                false
            }
        }
    }
}

/// Session task: one per generation. Connect, pump, reconnect until the
/// schedule is exhausted, the close is deliberate, or the generation goes
/// stale.
async fn run_session(inner: Arc<Inner>, generation: u64, cancel: CancellationToken) {
    let mut schedule = ReconnectSchedule::new(
        inner.config.reconnect_base_delay(),
        inner.config.reconnect_max_delay(),
        inner.config.reconnect_max_attempts,
    )
    .with_jitter(inner.config.reconnect_jitter);

    loop {
        if cancel.is_cancelled() || inner.generation.load(Ordering::SeqCst) != generation {
            return;
        }

        let Some(cred) = inner.tokens.get() else {
            inner.fail(generation, "credential disappeared before connect".to_owned());
            return;
        };

        match inner.connector.connect(&inner.config.ws_url(), &cred.access_token).await {
            Ok(channel) => {
                if cancel.is_cancelled() || inner.generation.load(Ordering::SeqCst) != generation {
                    // Channel from a stale generation; dropping it closes the pumps.
                    return;
                }
                schedule.reset();
                inner.set_state(generation, ConnectionState::Open);
                inner.set_outbound(generation, Some(channel.outbound.clone()));
                tracing::info!(generation, "channel open");

                let outcome = run_open(&inner, generation, &cancel, channel).await;
                inner.set_outbound(generation, None);

                match outcome {
                    CloseOutcome::Deliberate => return,
                    CloseOutcome::Normal => {
                        tracing::info!(generation, "server closed channel normally");
                        inner.set_state(generation, ConnectionState::Closed);
                        return;
                    }
                    CloseOutcome::Unexpected(reason) => {
                        tracing::warn!(generation, reason = %reason, "channel closed unexpectedly");
                        inner.set_state(generation, ConnectionState::Closed);
                        inner.record_error(reason);
                    }
                }
            }
            Err(ConnectError::Unauthorized) => {
                // Retrying with the same token would just be rejected again;
                // refresh out-of-band before the next attempt.
                tracing::warn!(generation, "channel handshake rejected, refreshing credential");
                if let Err(e) = inner.api.refresh().await {
                    inner.fail(generation, format!("auth rejected and refresh failed: {e}"));
                    return;
                }
                inner.record_error("channel handshake rejected".to_owned());
            }
            Err(ConnectError::Transport(reason)) => {
                tracing::warn!(generation, reason = %reason, "channel connect failed");
                inner.record_error(reason);
            }
        }

        if schedule.exhausted() {
            inner.fail(generation, "reconnect attempts exhausted".to_owned());
            return;
        }
        let delay = schedule.next_delay();
        tracing::debug!(
            generation,
            attempt = schedule.attempt(),
            delay_ms = delay.as_millis() as u64,
            "scheduling reconnect"
        );
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
        inner.set_state(generation, ConnectionState::Connecting);
    }
}

/// Pump one open channel until it closes. Pongs feed the liveness monitor
/// before routing; malformed frames are logged and dropped without tearing
/// the channel down.
async fn run_open(
    inner: &Arc<Inner>,
    generation: u64,
    cancel: &CancellationToken,
    channel: Channel,
) -> CloseOutcome {
    let monitor = LivenessMonitor::new(
        inner.config.heartbeat_interval(),
        inner.config.heartbeat_timeout(),
    );
    let pong = monitor.pong_handle();
    // Independent token so a deliberate disconnect is never mistaken for
    // liveness death.
    let dead = CancellationToken::new();

    let ping_out = channel.outbound.clone();
    let dead_trigger = dead.clone();
    monitor.start(
        move || match Envelope::ping().encode() {
            Ok(text) => {
                let _ = ping_out.try_send(text);
            }
            Err(e) => tracing::debug!(err = %e, "failed to encode ping"),
        },
        move || dead_trigger.cancel(),
    );

    let mut inbound = channel.inbound;
    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break CloseOutcome::Deliberate,
            _ = dead.cancelled() => break CloseOutcome::Unexpected("liveness timeout".to_owned()),
            event = inbound.recv() => match event {
                Some(ChannelEvent::Message(text)) => match Envelope::decode(&text) {
                    Ok(envelope) => {
                        if envelope.kind == EnvelopeKind::Pong {
                            pong.record();
                        }
                        inner.router.dispatch(&envelope);
                    }
                    Err(e) => {
                        tracing::debug!(generation, err = %e, "malformed envelope dropped");
                    }
                },
                Some(ChannelEvent::Closed { code, reason }) => {
                    if code == Some(1000) {
                        break CloseOutcome::Normal;
                    }
                    let reason = if reason.is_empty() {
                        format!("closed (code {code:?})")
                    } else {
                        reason
                    };
                    break CloseOutcome::Unexpected(reason);
                }
                None => break CloseOutcome::Unexpected("channel pump ended".to_owned()),
            }
        }
    };
    monitor.stop();
    outcome
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
