//! Verb dispatcher - the IRC platform adapter.
//!
//! One dispatcher instance runs per active identity, inside a worker the
//! supervisor kills and restarts wholesale on uncaught failure. Every verb
//! resolves a pooled connection (creating one on miss), validates its
//! preconditions, issues the backend operation, and completes exactly once.
//! Wire events flow back independently through a per-connection pump that
//! classifies them and hands canonical envelopes to the session guard.

use crate::backend::{BackendError, Connector, RawEvent};
use crate::creds::CredentialStore;
use crate::error::{DispatchError, DispatchResult};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::session::SessionGuard;
use crate::translate::classify;
use dashmap::DashSet;
use parking_lot::Mutex;
use patchbay_as::{AsObject, Job, Verb, looks_like_room, object_type};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

/// Single-resolution completion for one job.
///
/// Backend libraries may report both a success and a late error for the same
/// logical operation; whichever lands first wins and the rest are swallowed.
pub struct Completion {
    tx: Mutex<Option<oneshot::Sender<DispatchResult>>>,
}

impl Completion {
    /// A completion plus the receiver the job's caller awaits.
    pub fn channel() -> (Self, oneshot::Receiver<DispatchResult>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Resolve the job. Returns false if it was already resolved; the result
    /// is dropped in that case.
    pub fn resolve(&self, result: DispatchResult) -> bool {
        match self.tx.lock().take() {
            Some(tx) => {
                // The caller may have gone away; that is not our problem.
                let _ = tx.send(result);
                true
            }
            None => {
                trace!("discarding duplicate job resolution");
                false
            }
        }
    }
}

/// The IRC platform adapter.
pub struct IrcDispatcher {
    guard: SessionGuard,
    pool: Arc<ConnectionPool>,
    creds: Arc<dyn CredentialStore>,
    connector: Connector,
    /// Rooms this adapter believes it is currently part of (lowercased).
    joined: Arc<DashSet<String>>,
    /// Nick the live connection currently registers as; follows renames.
    nick: Arc<Mutex<String>>,
}

fn room_key(target: &str) -> String {
    target.to_lowercase()
}

impl IrcDispatcher {
    pub fn new(
        guard: SessionGuard,
        pool: Arc<ConnectionPool>,
        creds: Arc<dyn CredentialStore>,
        connector: Connector,
    ) -> Self {
        Self {
            guard,
            pool,
            creds,
            connector,
            joined: Arc::new(DashSet::new()),
            nick: Arc::new(Mutex::new(String::new())),
        }
    }

    /// Whether `room` is in this adapter's membership state.
    pub fn is_joined(&self, room: &str) -> bool {
        self.joined.contains(&room_key(room))
    }

    /// Dispatch one job, completing with success or a single error value.
    #[instrument(skip(self, job), fields(verb = %job.verb, actor = %job.actor))]
    pub async fn dispatch(&self, job: &Job) -> DispatchResult {
        let result = match job.verb {
            Verb::Join => self.join(job).await,
            Verb::Leave => self.leave(job).await,
            Verb::Send => self.send(job).await,
            Verb::Update => self.update(job).await,
            Verb::Observe => self.observe(job).await,
            Verb::Error => {
                // Error is an outbound-only verb; a job carrying it is noise.
                Err(DispatchError::BackendError(
                    "error is not a dispatchable verb".into(),
                ))
            }
        };

        if let Err(e) = &result {
            debug!(code = e.error_code(), "job failed: {e}");
        }
        result
    }

    /// Dispatch a job against a defensive single-resolution completion.
    pub async fn run_job(&self, job: &Job, completion: &Completion) {
        let result = self.dispatch(job).await;
        completion.resolve(result);
    }

    /// Release every pooled connection owned by this adapter instance.
    /// Invoked by the supervisor before teardown.
    pub async fn cleanup(&self) {
        info!("releasing pooled connections");
        self.pool.clear().await;
        self.joined.clear();
    }

    /// Resolve the live connection for `identity`, creating one if absent.
    async fn connection_for(&self, identity: &str) -> Result<Arc<PooledConnection>, DispatchError> {
        let credentials = self.creds.get(identity).await.ok_or_else(|| {
            DispatchError::ConnectFailed(format!("no credentials stored for {identity}"))
        })?;

        {
            let mut nick = self.nick.lock();
            if nick.is_empty() {
                *nick = credentials.nick.clone();
            }
        }

        if let Some(conn) = self.pool.get(identity, &credentials) {
            return Ok(conn);
        }

        let created = self
            .pool
            .create(identity, &credentials, &self.connector)
            .await?;
        if let Some(events) = created.events {
            self.spawn_event_pump(identity.to_string(), events);
        }
        Ok(created.conn)
    }

    /// Map a backend operation result, evicting the pooled entry when the
    /// backend says the connection itself is dead. An operation-level error
    /// leaves pool state alone.
    async fn issue(
        &self,
        identity: &str,
        result: Result<(), BackendError>,
    ) -> DispatchResult {
        match result {
            Ok(()) => Ok(()),
            Err(BackendError::Closed) => {
                warn!(identity, "backend connection is dead, evicting pooled entry");
                self.pool.disconnect(identity).await;
                Err(DispatchError::BackendError("connection closed".into()))
            }
            Err(e) => Err(DispatchError::BackendError(e.to_string())),
        }
    }

    async fn join(&self, job: &Job) -> DispatchResult {
        let target = job
            .target_name()
            .ok_or_else(|| DispatchError::BackendError("join requires a target room".into()))?;

        let conn = self.connection_for(&job.actor).await?;
        self.issue(&job.actor, conn.handle().join(target).await)
            .await?;

        // Membership updates only after the operation is accepted.
        self.joined.insert(room_key(target));
        info!(room = target, "joined");
        Ok(())
    }

    async fn leave(&self, job: &Job) -> DispatchResult {
        let target = job
            .target_name()
            .ok_or_else(|| DispatchError::BackendError("leave requires a target room".into()))?;

        let conn = self.connection_for(&job.actor).await?;
        let reason = job.object.content.as_deref();
        self.issue(&job.actor, conn.handle().part(target, reason).await)
            .await?;

        self.joined.remove(&room_key(target));
        info!(room = target, "left");
        Ok(())
    }

    async fn send(&self, job: &Job) -> DispatchResult {
        let target = job
            .target_name()
            .ok_or_else(|| DispatchError::BackendError("send requires a target".into()))?;

        // Room-shaped targets must have been joined; direct addresses are
        // always deliverable. Checked before any backend traffic.
        if looks_like_room(target) && !self.joined.contains(&room_key(target)) {
            return Err(DispatchError::NotJoined(target.to_string()));
        }

        let content = job.object.content.as_deref().unwrap_or("").trim();
        if content.is_empty() {
            return Err(DispatchError::BackendError("no content to send".into()));
        }

        let conn = self.connection_for(&job.actor).await?;
        self.issue(&job.actor, conn.handle().privmsg(target, content).await)
            .await
    }

    async fn update(&self, job: &Job) -> DispatchResult {
        match job.object.object_type.as_deref() {
            Some(object_type::ADDRESS) => self.rename(job).await,
            Some(object_type::TOPIC) => self.retopic(job).await,
            other => {
                // Unrecognized update sub-cases succeed as no-ops.
                debug!(object_type = ?other, "ignoring update with unrecognized object type");
                Ok(())
            }
        }
    }

    /// Identity rename: issue the backend nick change, then atomically move
    /// the pooled entry to the new key and persist the new credentials.
    async fn rename(&self, job: &Job) -> DispatchResult {
        let new_nick = job
            .object
            .name()
            .or(job.target_name())
            .ok_or_else(|| DispatchError::BackendError("address update carries no name".into()))?
            .to_string();

        let old_credentials = self.creds.get(&job.actor).await.ok_or_else(|| {
            DispatchError::ConnectFailed(format!("no credentials stored for {}", job.actor))
        })?;

        let conn = self.connection_for(&job.actor).await?;
        self.issue(&job.actor, conn.handle().set_nick(&new_nick).await)
            .await?;

        let new_credentials = old_credentials.with_nick(&new_nick);
        let new_identity = new_credentials.identity();
        self.pool
            .rekey(&job.actor, &old_credentials, &new_identity, &new_credentials)?;
        self.creds.set(&new_identity, new_credentials).await;
        *self.nick.lock() = new_nick.clone();

        info!(from = %job.actor, to = %new_identity, "identity renamed");
        Ok(())
    }

    async fn retopic(&self, job: &Job) -> DispatchResult {
        let target = job
            .target_name()
            .ok_or_else(|| DispatchError::BackendError("topic update requires a target".into()))?;
        let topic = job.object.content.as_deref().unwrap_or("");

        let conn = self.connection_for(&job.actor).await?;
        self.issue(&job.actor, conn.handle().set_topic(target, topic).await)
            .await
    }

    /// `observe` supports only attendance queries; the roster arrives
    /// asynchronously through the event pump, not via this job's completion.
    async fn observe(&self, job: &Job) -> DispatchResult {
        if !job.object.is_type(object_type::ATTENDANCE) {
            let kind = job
                .object
                .object_type
                .clone()
                .unwrap_or_else(|| "(none)".to_string());
            return Err(DispatchError::UnsupportedObjectType(kind));
        }

        let target = job
            .target_name()
            .ok_or_else(|| DispatchError::BackendError("observe requires a target room".into()))?;

        let conn = self.connection_for(&job.actor).await?;
        self.issue(&job.actor, conn.handle().names(target).await)
            .await
    }

    /// Pump wire events for one pooled connection: classify each into at most
    /// one canonical envelope and hand it to the session guard. Connection
    /// loss evicts the pooled entry so the next job reconnects fresh.
    fn spawn_event_pump(&self, identity: String, mut events: mpsc::Receiver<RawEvent>) {
        let guard = self.guard.clone();
        let pool = self.pool.clone();
        let joined = self.joined.clone();
        let nick = self.nick.clone();

        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                let lost = event.is_connection_lost();
                if lost {
                    warn!(identity = %identity, "backend connection lost");
                    pool.disconnect(&identity).await;
                    joined.clear();
                }

                if let Some(envelope) = classify(&event) {
                    // Backend-confirmed leaves of our own nick (kick, part,
                    // quit) also retire the room from membership state.
                    if envelope.verb == Verb::Leave
                        && envelope.actor.name() == Some(nick.lock().as_str())
                    {
                        if let Some(room) = envelope.target.as_ref().and_then(AsObject::name) {
                            if !room.is_empty() {
                                joined.remove(&room_key(room));
                            }
                        }
                    }
                    guard.send_to_client(envelope.stamped());
                }

                if lost {
                    break;
                }
            }
            trace!(identity = %identity, "event pump finished");
        });
    }
}
