//! Canonical envelopes and inbound jobs.

use crate::{AsObject, Verb};
use serde::{Deserialize, Serialize};

/// One canonical outbound message: the verb/actor/target/object envelope
/// delivered to the originating client session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsEnvelope {
    #[serde(rename = "type")]
    pub verb: Verb,
    pub actor: AsObject,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AsObject>,
    #[serde(default)]
    pub object: AsObject,
    /// RFC 3339 timestamp set when the envelope leaves the gateway.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<String>,
}

impl AsEnvelope {
    pub fn new(verb: Verb, actor: AsObject) -> Self {
        Self {
            verb,
            actor,
            target: None,
            object: AsObject::default(),
            published: None,
        }
    }

    pub fn with_target(mut self, target: AsObject) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_object(mut self, object: AsObject) -> Self {
        self.object = object;
        self
    }

    /// Stamp `published` with the current wall-clock time.
    pub fn stamped(mut self) -> Self {
        self.published = Some(chrono::Utc::now().to_rfc3339());
        self
    }
}

/// One unit of work handed to a platform adapter.
///
/// Immutable once dispatched; completion is signaled exactly once by the
/// adapter, as success or a single error value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub verb: Verb,
    /// Identity of the actor this job runs as, e.g. `irc://alice@example.org`.
    pub actor: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<AsObject>,
    #[serde(default)]
    pub object: AsObject,
}

impl Job {
    pub fn new(verb: Verb, actor: impl Into<String>) -> Self {
        Self {
            verb,
            actor: actor.into(),
            target: None,
            object: AsObject::default(),
        }
    }

    pub fn with_target(mut self, target: AsObject) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_object(mut self, object: AsObject) -> Self {
        self.object = object;
        self
    }

    /// The target's address, wherever the job put it.
    pub fn target_name(&self) -> Option<&str> {
        self.target.as_ref().and_then(AsObject::name)
    }
}
