//! Activity Streams envelope model for the patchbay gateway.
//!
//! Clients of the gateway speak a single canonical format regardless of which
//! backend protocol a platform adapter drives: an envelope of
//! `type` (verb), `actor`, optional `target` and `object`. This crate holds
//! those types plus the `Job` shape the gateway accepts from its host, so the
//! gateway core and host processes share one vocabulary.
//!
//! Objects are deliberately loose: an [`AsObject`] is a bag of optional
//! fields, and consumers disambiguate by which fields are present rather than
//! by a tagged union. That mirrors what actually arrives on the wire.

mod envelope;
mod object;

pub use envelope::{AsEnvelope, Job};
pub use object::{AsObject, object_type};

use serde::{Deserialize, Serialize};
use std::fmt;

/// The closed set of canonical verbs.
///
/// `join`/`leave`/`send`/`update`/`observe` arrive as jobs; `error` only ever
/// travels outbound, carrying a failure back to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verb {
    Join,
    Leave,
    Send,
    Update,
    Observe,
    Error,
}

impl Verb {
    /// The wire spelling of this verb.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Join => "join",
            Self::Leave => "leave",
            Self::Send => "send",
            Self::Update => "update",
            Self::Observe => "observe",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether a target identifier has the shape of a room rather than a person.
///
/// Room identifiers carry a channel sigil (`#chat`, `&local`); anything else
/// is treated as a direct address and is always deliverable.
pub fn looks_like_room(target: &str) -> bool {
    target.starts_with('#') || target.starts_with('&')
}
