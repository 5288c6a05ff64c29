//! Unified error handling for the gateway core.
//!
//! Every job completes exactly once, either with success or with one of the
//! error kinds below. Kinds carry an `error_code()` for log labeling and can
//! be rendered as a canonical `error` envelope for delivery to the client.

use patchbay_as::{AsEnvelope, AsObject, Verb};
use thiserror::Error;

/// Errors surfaced to a job's completion.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Backend handshake did not finish within the configured window.
    #[error("connection attempt timed out")]
    ConnectTimeout,

    /// Backend rejected the handshake outright.
    #[error("connection failed: {0}")]
    ConnectFailed(String),

    /// Re-key attempted against an entry whose credentials no longer match.
    #[error("credentials do not match the pooled connection")]
    StaleCredentials,

    /// `send` to a room-shaped target that was never joined.
    #[error("not joined to {0}")]
    NotJoined(String),

    /// Verb sub-case the adapter does not implement.
    #[error("unsupported object type: {0}")]
    UnsupportedObjectType(String),

    /// Opaque backend-reported failure, passed through verbatim.
    #[error("backend error: {0}")]
    BackendError(String),
}

impl DispatchError {
    /// Get a static error code string for log labeling.
    #[inline]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectTimeout => "connect_timeout",
            Self::ConnectFailed(_) => "connect_failed",
            Self::StaleCredentials => "stale_credentials",
            Self::NotJoined(_) => "not_joined",
            Self::UnsupportedObjectType(_) => "unsupported_object_type",
            Self::BackendError(_) => "backend_error",
        }
    }

    /// Render this failure as a canonical `error` envelope addressed back to
    /// the actor that issued the failing job.
    pub fn to_error_envelope(&self, actor: &str, target: Option<&str>) -> AsEnvelope {
        let mut env = AsEnvelope::new(Verb::Error, AsObject::person(actor))
            .with_object(AsObject::error(self.to_string()));
        if let Some(target) = target {
            env = env.with_target(AsObject::room(target));
        }
        env.stamped()
    }
}

/// Result type for verb dispatch.
pub type DispatchResult = Result<(), DispatchError>;
