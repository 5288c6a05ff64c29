//! Session guard - protects callbacks against torn-down sessions.
//!
//! Adapters run inside a worker that is killed wholesale on any uncaught
//! failure. Asynchronous backend callbacks registered before the kill may
//! still fire afterwards; every delegated call below checks that the session
//! is still alive and is a silent no-op otherwise. This is the single place
//! that check lives, so neither the dispatcher nor the translator repeat it.

use patchbay_as::AsEnvelope;
use std::sync::{Arc, Weak};
use tracing::trace;

/// The minimal session surface an adapter needs.
///
/// `send` delivers a canonical envelope toward the originating client;
/// `debug` is a best-effort diagnostic channel that never blocks and never
/// fails. Implementations queue internally if delivery can stall.
pub trait SessionTransport: Send + Sync {
    fn send_to_client(&self, envelope: AsEnvelope);
    fn debug(&self, text: &str);
}

/// A weak handle to the session, safe to call from any context at any time.
///
/// The guard never owns the session: once the worker drops its `Arc`, every
/// delegated call downgrades to a no-op instead of touching freed state. It
/// takes no locks; liveness is a single upgrade check per call.
#[derive(Clone)]
pub struct SessionGuard {
    /// Identity this guard was built for, kept for diagnostics only.
    identity: String,
    inner: Weak<dyn SessionTransport>,
}

impl SessionGuard {
    pub fn new(identity: impl Into<String>, session: &Arc<dyn SessionTransport>) -> Self {
        Self {
            identity: identity.into(),
            inner: Arc::downgrade(session),
        }
    }

    /// Identity of the actor this guard serves.
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Whether the underlying session is still alive.
    pub fn is_live(&self) -> bool {
        self.inner.strong_count() > 0
    }

    /// Deliver a canonical envelope; dropped silently after teardown.
    pub fn send_to_client(&self, envelope: AsEnvelope) {
        match self.inner.upgrade() {
            Some(session) => session.send_to_client(envelope),
            None => trace!(identity = %self.identity, "dropping envelope for torn-down session"),
        }
    }

    /// Best-effort diagnostic; dropped silently after teardown.
    pub fn debug(&self, text: &str) {
        if let Some(session) = self.inner.upgrade() {
            session.debug(text);
        }
    }
}
