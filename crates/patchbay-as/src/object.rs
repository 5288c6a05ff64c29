//! Loosely-typed Activity Streams objects.

use serde::{Deserialize, Serialize};

/// Well-known `objectType` values used by the gateway.
pub mod object_type {
    pub const PERSON: &str = "person";
    pub const ROOM: &str = "room";
    pub const MESSAGE: &str = "message";
    pub const TOPIC: &str = "topic";
    pub const ADDRESS: &str = "address";
    pub const ATTENDANCE: &str = "attendance";
    pub const PRESENCE: &str = "presence";
    pub const ERROR: &str = "error";
    pub const CREDENTIALS: &str = "credentials";
}

/// One Activity Streams object: actor, target or payload of an envelope.
///
/// All fields are optional on the wire. Consumers key off `object_type` where
/// it is present and otherwise off which fields are populated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsObject {
    #[serde(rename = "objectType", skip_serializing_if = "Option::is_none")]
    pub object_type: Option<String>,
    /// Canonical address, e.g. `irc://alice@irc.example.org` or `#kosmos`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "displayName", skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Message body, topic text, or error text depending on the object type.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Roster for `attendance` objects.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub members: Option<Vec<String>>,
}

impl AsObject {
    /// A `person` object with the given display name.
    pub fn person(name: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type::PERSON.into()),
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A `room` object addressed by channel name.
    pub fn room(name: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type::ROOM.into()),
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// A `message` payload.
    pub fn message(content: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type::MESSAGE.into()),
            content: Some(content.into()),
            ..Self::default()
        }
    }

    /// A `topic` payload carrying the new topic text.
    pub fn topic(text: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type::TOPIC.into()),
            content: Some(text.into()),
            ..Self::default()
        }
    }

    /// An `address` payload carrying a new display name.
    pub fn address(name: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type::ADDRESS.into()),
            display_name: Some(name.into()),
            ..Self::default()
        }
    }

    /// An `attendance` payload listing room members.
    pub fn attendance(members: Vec<String>) -> Self {
        Self {
            object_type: Some(object_type::ATTENDANCE.into()),
            members: Some(members),
            ..Self::default()
        }
    }

    /// An `error` payload carrying diagnostic text.
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            object_type: Some(object_type::ERROR.into()),
            content: Some(text.into()),
            ..Self::default()
        }
    }

    /// True when `object_type` equals `kind`.
    pub fn is_type(&self, kind: &str) -> bool {
        self.object_type.as_deref() == Some(kind)
    }

    /// The best human-readable name this object carries.
    pub fn name(&self) -> Option<&str> {
        self.display_name.as_deref().or(self.id.as_deref())
    }
}
