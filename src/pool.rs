//! Connection pool - keyed store of live backend connections.
//!
//! Connections are expensive (network handshake, registration) and are reused
//! across every job for the same identity. The pool centralizes the
//! one-entry-per-identity invariant, makes re-keying atomic, and guards
//! creation with a timeout so a hung handshake fails the caller instead of
//! wedging the adapter.
//!
//! Map mutations happen under a single synchronous lock and never across an
//! await, so `rekey` is observed fully-done or not-at-all. The asynchronous
//! part of creation (the backend handshake) is serialized per identity by a
//! keyed mutex; different identities connect fully in parallel.

use crate::backend::{BackendHandle, Connector, RawEvent};
use crate::creds::Credentials;
use crate::error::DispatchError;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

/// Opaque key naming one actor-on-one-backend pairing.
pub type Identity = String;

/// Lifecycle state of a pooled connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Ready,
    Disconnected,
}

/// A cached live backend connection.
///
/// Owned exclusively by the pool; adapters receive only a shared reference
/// and never construct one directly. Key and credentials are immutable - a
/// credential change produces a new entry via [`ConnectionPool::rekey`].
pub struct PooledConnection {
    key: Identity,
    credentials: Credentials,
    handle: Arc<dyn BackendHandle>,
    state: RwLock<ConnState>,
}

impl PooledConnection {
    fn new(key: Identity, credentials: Credentials, handle: Arc<dyn BackendHandle>) -> Self {
        Self {
            key,
            credentials,
            handle,
            state: RwLock::new(ConnState::Connecting),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn handle(&self) -> &Arc<dyn BackendHandle> {
        &self.handle
    }

    pub fn state(&self) -> ConnState {
        *self.state.read()
    }

    fn set_state(&self, state: ConnState) {
        *self.state.write() = state;
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("key", &self.key)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// Result of [`ConnectionPool::create`]. `events` is populated only when a
/// fresh connection was actually established; an idempotent hit returns the
/// existing entry with no new event stream.
#[derive(Debug)]
pub struct Created {
    pub conn: Arc<PooledConnection>,
    pub events: Option<mpsc::Receiver<RawEvent>>,
}

/// Keyed store of live backend connections.
pub struct ConnectionPool {
    entries: RwLock<HashMap<Identity, Arc<PooledConnection>>>,
    /// Per-identity creation locks: serialize create/disconnect for one key.
    create_locks: DashMap<Identity, Arc<Mutex<()>>>,
    connect_timeout: Duration,
}

impl ConnectionPool {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            create_locks: DashMap::new(),
            connect_timeout,
        }
    }

    fn create_lock(&self, identity: &str) -> Arc<Mutex<()>> {
        self.create_locks
            .entry(identity.to_string())
            .or_default()
            .clone()
    }

    fn lookup(&self, identity: &str) -> Option<Arc<PooledConnection>> {
        self.entries.read().get(identity).cloned()
    }

    /// Pure lookup; never creates. A live entry whose credentials no longer
    /// match the supplied ones is treated as a miss.
    pub fn get(
        &self,
        identity: &str,
        credentials: &Credentials,
    ) -> Option<Arc<PooledConnection>> {
        let conn = self.lookup(identity)?;
        if conn.credentials() != credentials {
            debug!(identity, "pooled entry exists but credentials differ");
            return None;
        }
        Some(conn)
    }

    /// Get-or-create the connection for `identity`.
    ///
    /// If an entry already exists it is returned unchanged. Otherwise the
    /// supplied connector runs under the pool's connect timeout; on success
    /// the entry is stored and returned, on failure or timeout nothing is
    /// left in the pool and the caller gets `ConnectFailed`/`ConnectTimeout`.
    pub async fn create(
        &self,
        identity: &str,
        credentials: &Credentials,
        connector: &Connector,
    ) -> Result<Created, DispatchError> {
        if let Some(conn) = self.lookup(identity) {
            return Ok(Created { conn, events: None });
        }

        // Serialize concurrent creates for the same identity: the loser of
        // the race finds the winner's entry on re-check and reuses it.
        let lock = self.create_lock(identity);
        let _guard = lock.lock().await;

        if let Some(conn) = self.lookup(identity) {
            return Ok(Created { conn, events: None });
        }

        debug!(identity, "no pooled connection, starting handshake");
        let link = match tokio::time::timeout(
            self.connect_timeout,
            (connector)(credentials.clone()),
        )
        .await
        {
            Err(_) => {
                warn!(identity, timeout = ?self.connect_timeout, "backend handshake timed out");
                return Err(DispatchError::ConnectTimeout);
            }
            Ok(Err(e)) => {
                warn!(identity, error = %e, "backend handshake failed");
                return Err(DispatchError::ConnectFailed(e.to_string()));
            }
            Ok(Ok(link)) => link,
        };

        let conn = Arc::new(PooledConnection::new(
            identity.to_string(),
            credentials.clone(),
            link.handle,
        ));

        // Final insert. A rekey may have landed an entry for this identity
        // while we were handshaking; the pool holds at most one entry per
        // identity, so the existing one wins and ours is torn down.
        let inserted = {
            let mut entries = self.entries.write();
            match entries.entry(identity.to_string()) {
                Entry::Occupied(existing) => Err(existing.get().clone()),
                Entry::Vacant(slot) => {
                    slot.insert(conn.clone());
                    Ok(())
                }
            }
        };

        match inserted {
            Ok(()) => {
                conn.set_state(ConnState::Ready);
                Ok(Created {
                    conn,
                    events: Some(link.events),
                })
            }
            Err(existing) => {
                conn.set_state(ConnState::Disconnected);
                let loser = conn.handle.clone();
                tokio::spawn(async move {
                    let _ = loser.quit("duplicate connection").await;
                });
                Ok(Created {
                    conn: existing,
                    events: None,
                })
            }
        }
    }

    /// Re-key an existing entry to a new identity, preserving the underlying
    /// live connection handle (no reconnect).
    ///
    /// Fails with `StaleCredentials` unless the old entry exists and its
    /// credentials match `old_credentials`; on failure the pool is untouched.
    pub fn rekey(
        &self,
        old_key: &str,
        old_credentials: &Credentials,
        new_key: &str,
        new_credentials: &Credentials,
    ) -> Result<Arc<PooledConnection>, DispatchError> {
        let mut entries = self.entries.write();

        let credentials_match = entries
            .get(old_key)
            .is_some_and(|conn| conn.credentials() == old_credentials);
        if !credentials_match {
            debug!(old_key, new_key, "rekey refused: no matching entry");
            return Err(DispatchError::StaleCredentials);
        }
        // Checked above; the remove cannot miss while we hold the lock.
        let old = entries
            .remove(old_key)
            .ok_or(DispatchError::StaleCredentials)?;

        let moved = Arc::new(PooledConnection {
            key: new_key.to_string(),
            credentials: new_credentials.clone(),
            handle: old.handle.clone(),
            state: RwLock::new(old.state()),
        });

        if let Some(displaced) = entries.insert(new_key.to_string(), moved.clone()) {
            warn!(new_key, "rekey displaced an existing pooled connection");
            displaced.set_state(ConnState::Disconnected);
            let handle = displaced.handle.clone();
            tokio::spawn(async move {
                let _ = handle.quit("displaced by rekey").await;
            });
        }

        debug!(old_key, new_key, "pooled connection re-keyed");
        Ok(moved)
    }

    /// Tear down and remove the entry for `identity`; no-op if absent.
    pub async fn disconnect(&self, identity: &str) {
        let lock = self.create_lock(identity);
        let _guard = lock.lock().await;

        let removed = self.entries.write().remove(identity);
        if let Some(conn) = removed {
            conn.set_state(ConnState::Disconnected);
            if let Err(e) = conn.handle.quit("disconnecting").await {
                debug!(identity, error = %e, "backend teardown reported an error");
            }
            debug!(identity, "pooled connection removed");
        }
    }

    /// Tear down every pooled connection. Used by adapter cleanup.
    pub async fn clear(&self) {
        let drained: Vec<Arc<PooledConnection>> =
            self.entries.write().drain().map(|(_, conn)| conn).collect();
        for conn in drained {
            conn.set_state(ConnState::Disconnected);
            if let Err(e) = conn.handle.quit("shutting down").await {
                debug!(key = conn.key(), error = %e, "backend teardown reported an error");
            }
        }
        self.create_locks.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
