// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Heartbeat liveness monitor for an open channel.
//!
//! Sends a ping every interval and watches for pong arrival. A channel that
//! has gone `timeout` without a pong is silently dead: the monitor fires
//! `on_dead` exactly once, stops itself, and leaves reconnection to the
//! caller.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cheap clonable handle the channel read loop uses to record pong arrival.
#[derive(Debug, Clone)]
pub struct PongHandle {
    last_pong: Arc<Mutex<Instant>>,
}

impl PongHandle {
    /// Record that a pong arrived now.
    pub fn record(&self) {
        if let Ok(mut last) = self.last_pong.lock() {
            *last = Instant::now();
        }
    }
}

/// Periodic heartbeat with a dead-man timeout.
pub struct LivenessMonitor {
    interval: Duration,
    timeout: Duration,
    last_pong: Arc<Mutex<Instant>>,
    cancel: Mutex<CancellationToken>,
}

impl LivenessMonitor {
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            last_pong: Arc::new(Mutex::new(Instant::now())),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Handle for recording inbound pongs.
    pub fn pong_handle(&self) -> PongHandle {
        PongHandle { last_pong: Arc::clone(&self.last_pong) }
    }

    /// Start monitoring. The first ping goes out immediately; afterwards one
    /// ping per interval. If no pong has been recorded within `timeout`,
    /// `on_dead` fires once and the monitor stops itself.
    ///
    /// Starting again after `stop()` begins a fresh window.
    pub fn start(
        &self,
        send_ping: impl Fn() + Send + 'static,
        on_dead: impl FnOnce() + Send + 'static,
    ) {
        let cancel = CancellationToken::new();
        if let Ok(mut guard) = self.cancel.lock() {
            guard.cancel();
            *guard = cancel.clone();
        }
        if let Ok(mut last) = self.last_pong.lock() {
            *last = Instant::now();
        }

        let interval = self.interval;
        let timeout = self.timeout;
        let last_pong = Arc::clone(&self.last_pong);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            let mut on_dead = Some(on_dead);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let elapsed = match last_pong.lock() {
                    Ok(last) => last.elapsed(),
                    Err(_) => break,
                };
                if elapsed >= timeout {
                    tracing::debug!(elapsed_ms = elapsed.as_millis() as u64, "no pong within timeout, channel dead");
                    if let Some(dead) = on_dead.take() {
                        dead();
                    }
                    break;
                }
                send_ping();
            }
        });
    }

    /// Cancel the monitor task. Safe to call repeatedly.
    pub fn stop(&self) {
        if let Ok(guard) = self.cancel.lock() {
            guard.cancel();
        }
    }
}

impl Drop for LivenessMonitor {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
#[path = "heartbeat_tests.rs"]
mod tests;
