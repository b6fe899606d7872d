// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Inbound envelope routing and bounded replay buffers.
//!
//! Listeners register per [`Route`] and fire in registration order. Dispatch
//! iterates a snapshot of the registry taken before any callback runs, so a
//! listener unsubscribing itself (or others) mid-dispatch neither panics
//! nor skips the remaining listeners.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, Weak};

use crate::envelope::{Envelope, EnvelopeKind};

/// Replay buffer caps. Newest first, oldest dropped silently on overflow.
const DIAGNOSTICS_CAP: usize = 100;
const AI_MESSAGES_CAP: usize = 50;

/// Routing key for listener registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Route {
    /// Envelopes of one specific kind.
    Kind(EnvelopeKind),
    /// Every envelope, regardless of kind.
    Any,
}

type Callback = Arc<dyn Fn(&Envelope) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    listeners: HashMap<Route, Vec<(u64, Callback)>>,
}

/// Handle returned by [`MessageRouter::on`]; call [`unsubscribe`] to remove
/// the listener. Dropping the handle does NOT unsubscribe: replay buffers
/// and long-lived listeners outlive the registering scope.
///
/// [`unsubscribe`]: Subscription::unsubscribe
pub struct Subscription {
    router: Weak<MessageRouter>,
    route: Route,
    id: u64,
}

impl Subscription {
    pub fn unsubscribe(self) {
        if let Some(router) = self.router.upgrade() {
            router.remove(&self.route, self.id);
        }
    }
}

/// Fans inbound envelopes out to registered listeners by kind, maintaining
/// bounded replay buffers per category.
#[derive(Default)]
pub struct MessageRouter {
    registry: Mutex<Registry>,
    diagnostics: Mutex<VecDeque<Envelope>>,
    ai_messages: Mutex<VecDeque<Envelope>>,
}

impl MessageRouter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a listener. Listeners for the same route fire in
    /// registration order.
    pub fn on(
        self: &Arc<Self>,
        route: Route,
        callback: impl Fn(&Envelope) + Send + Sync + 'static,
    ) -> Subscription {
        let id = {
            let Ok(mut registry) = self.registry.lock() else {
                return Subscription { router: Weak::new(), route, id: 0 };
            };
            registry.next_id += 1;
            let id = registry.next_id;
            registry.listeners.entry(route.clone()).or_default().push((id, Arc::new(callback)));
            id
        };
        Subscription { router: Arc::downgrade(self), route, id }
    }

    fn remove(&self, route: &Route, id: u64) {
        if let Ok(mut registry) = self.registry.lock() {
            if let Some(list) = registry.listeners.get_mut(route) {
                list.retain(|(lid, _)| *lid != id);
            }
        }
    }

    /// Dispatch one envelope: buffers update first, then kind listeners,
    /// then [`Route::Any`] listeners.
    ///
    /// Buffers are updated before fan-out so a listener querying a snapshot
    /// from its own callback observes the item it is being called about.
    pub fn dispatch(&self, envelope: &Envelope) {
        self.buffer(envelope);

        if let EnvelopeKind::Unknown(tag) = &envelope.kind {
            tracing::debug!(kind = %tag, "unknown envelope type, forwarding to generic listeners");
        }

        // Callbacks run against a snapshot, with the registry unlocked.
        let (kind_listeners, any_listeners) = {
            match self.registry.lock() {
                Ok(registry) => (
                    registry
                        .listeners
                        .get(&Route::Kind(envelope.kind.clone()))
                        .map(|l| l.clone())
                        .unwrap_or_default(),
                    registry.listeners.get(&Route::Any).map(|l| l.clone()).unwrap_or_default(),
                ),
                Err(_) => return,
            }
        };

        for (_, callback) in kind_listeners.iter().chain(any_listeners.iter()) {
            callback(envelope);
        }
    }

    fn buffer(&self, envelope: &Envelope) {
        match envelope.kind {
            EnvelopeKind::DiagnosticsUpdate | EnvelopeKind::SystemHealth => {
                push_capped(&self.diagnostics, envelope.clone(), DIAGNOSTICS_CAP);
            }
            EnvelopeKind::ChatMessage | EnvelopeKind::ConversationUpdate => {
                push_capped(&self.ai_messages, envelope.clone(), AI_MESSAGES_CAP);
            }
            _ => {}
        }
    }

    /// Buffered diagnostics envelopes, newest first.
    pub fn diagnostics_snapshot(&self) -> Vec<Envelope> {
        self.diagnostics.lock().map(|b| b.iter().cloned().collect()).unwrap_or_default()
    }

    /// Buffered AI conversation envelopes, newest first.
    pub fn ai_messages_snapshot(&self) -> Vec<Envelope> {
        self.ai_messages.lock().map(|b| b.iter().cloned().collect()).unwrap_or_default()
    }
}

fn push_capped(buffer: &Mutex<VecDeque<Envelope>>, envelope: Envelope, cap: usize) {
    if let Ok(mut buf) = buffer.lock() {
        buf.push_front(envelope);
        buf.truncate(cap);
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
