//! Backend connection surface.
//!
//! A platform adapter drives its backend through the [`BackendHandle`] trait
//! and receives asynchronous wire notifications as [`RawEvent`]s. Both sides
//! are deliberately loose: the handle is the smallest set of operations the
//! verbs need, and events are bags of optional fields that the translator
//! disambiguates by structure, never by an explicit discriminant.

pub mod irc;

use crate::creds::Credentials;
use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Capacity of the wire-event channel handed to the adapter.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Failures reported by a backend connection.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Protocol(String),

    #[error("connection closed")]
    Closed,
}

/// The live-connection surface a pooled entry exposes to the dispatcher.
///
/// Operations are fire-and-forget at the wire level; acknowledgments and
/// failures come back asynchronously as [`RawEvent`]s.
#[async_trait]
pub trait BackendHandle: Send + Sync {
    async fn join(&self, channel: &str) -> Result<(), BackendError>;
    async fn part(&self, channel: &str, reason: Option<&str>) -> Result<(), BackendError>;
    async fn privmsg(&self, target: &str, text: &str) -> Result<(), BackendError>;
    async fn set_nick(&self, nick: &str) -> Result<(), BackendError>;
    async fn set_topic(&self, channel: &str, topic: &str) -> Result<(), BackendError>;
    async fn names(&self, channel: &str) -> Result<(), BackendError>;
    async fn quit(&self, reason: &str) -> Result<(), BackendError>;
}

/// An operation-level error stanza reported by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawError {
    /// Raw error text as the backend produced it.
    pub text: String,
    /// The target the failing operation addressed, when the stanza names one.
    pub target: Option<String>,
    /// Identity the stanza came from, when attributed.
    pub from: Option<String>,
    /// Whether the originating stanza was itself a presence notification
    /// rather than a generic message.
    pub from_presence: bool,
}

/// One asynchronous backend notification.
///
/// Raw events have no tag; which fields are populated determines what the
/// event means. The translator owns that precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawEvent {
    /// Raw protocol marker, e.g. `JOIN`, `PART`, `QUIT`, `PRIVMSG`, `MODE`.
    pub command: Option<String>,
    /// Originating identity, when the backend attributed the event.
    pub from: Option<String>,
    pub channel: Option<String>,
    pub target: Option<String>,
    /// Message body.
    pub text: Option<String>,
    pub topic: Option<String>,
    pub topic_set_by: Option<String>,
    pub old_nick: Option<String>,
    pub new_nick: Option<String>,
    /// Full roster snapshot.
    pub members: Option<Vec<String>>,
    pub reason: Option<String>,
    /// Operation-level error stanza, classified separately.
    pub error: Option<RawError>,
    /// Terminal marker: the connection itself is no longer usable.
    pub connection_lost: bool,
}

impl RawEvent {
    /// An event with only a raw command marker set.
    pub fn command(marker: impl Into<String>) -> Self {
        Self {
            command: Some(marker.into()),
            ..Self::default()
        }
    }

    /// Whether this event signals that the whole connection is dead, as
    /// opposed to one failed operation.
    pub fn is_connection_lost(&self) -> bool {
        self.connection_lost
    }
}

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A freshly established backend connection: the operation handle plus the
/// stream of wire events it will emit until it dies.
pub struct BackendLink {
    pub handle: Arc<dyn BackendHandle>,
    pub events: mpsc::Receiver<RawEvent>,
}

/// Backend-specific handshake routine, supplied by the adapter that owns the
/// protocol. The pool invokes it on a creation miss and guards it with the
/// configured timeout.
pub type Connector =
    Arc<dyn Fn(Credentials) -> BoxFuture<'static, Result<BackendLink, BackendError>> + Send + Sync>;
