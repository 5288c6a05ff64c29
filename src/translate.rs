//! Event translator - raw backend notifications to canonical envelopes.
//!
//! Raw events carry no discriminant; which optional fields are populated is
//! the only signal. Classification therefore runs by structural pattern
//! precedence, most specific shape first - the order below is load-bearing
//! and reordering it changes outcomes, so it is pinned by tests.
//!
//! Each event yields at most one canonical envelope. Unknown backend chatter
//! is dropped, never an error: new server noise must not crash translation.

use crate::backend::{RawError, RawEvent};
use patchbay_as::{AsEnvelope, AsObject, Verb, looks_like_room, object_type};
use tracing::{debug, trace};

/// Raw-protocol markers the translator deliberately ignores: server MOTD
/// numerics and generic mode changes, plus keepalive traffic.
const IGNORABLE_MARKERS: &[&str] = &["MODE", "MOTD", "PING", "PONG", "372", "375", "376"];

/// Candidate event shapes, in classification precedence order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Full member-list snapshot for a channel.
    Roster,
    /// Topic text together with the identity that set it.
    TopicChange,
    /// Old and new nickname both present.
    Rename,
    /// Channel plus a raw join marker.
    Join,
    /// Target plus message body.
    Message,
    /// Identity present with no target: the peer went away entirely.
    Quit,
    /// Channel plus a raw part marker.
    Part,
    /// Recognized-and-ignored chatter.
    Ignorable,
    Unknown,
}

/// Determine the structural shape of a raw event.
///
/// First match wins; a specialized shape must never fall through to a more
/// generic one (a roster payload that also carries a topic is still a
/// roster).
pub fn shape_of(event: &RawEvent) -> Shape {
    let marker = event.command.as_deref();

    if event.members.is_some() && event.channel.is_some() {
        Shape::Roster
    } else if event.topic.is_some() && event.topic_set_by.is_some() {
        Shape::TopicChange
    } else if event.old_nick.is_some() && event.new_nick.is_some() {
        Shape::Rename
    } else if event.channel.is_some() && marker == Some("JOIN") {
        Shape::Join
    } else if event.target.is_some() && event.text.is_some() {
        Shape::Message
    } else if event.from.is_some() && event.target.is_none() && event.channel.is_none() {
        Shape::Quit
    } else if event.channel.is_some() && marker == Some("PART") {
        Shape::Part
    } else if marker.is_some_and(|m| IGNORABLE_MARKERS.contains(&m)) {
        Shape::Ignorable
    } else {
        Shape::Unknown
    }
}

/// Classify one raw backend event into zero or one canonical envelope.
///
/// Pure and deterministic: the same event always classifies the same way.
pub fn classify(event: &RawEvent) -> Option<AsEnvelope> {
    // Operation-level error stanzas never enter the shape ladder.
    if let Some(error) = &event.error {
        return Some(classify_error(error));
    }

    match shape_of(event) {
        Shape::Roster => {
            let channel = event.channel.as_deref()?;
            let members = event.members.clone()?;
            Some(
                AsEnvelope::new(Verb::Observe, AsObject::room(channel))
                    .with_target(AsObject::room(channel))
                    .with_object(AsObject::attendance(members)),
            )
        }

        Shape::TopicChange => {
            let set_by = event.topic_set_by.as_deref()?;
            let topic = event.topic.clone()?;
            let room = event.channel.as_deref().or(event.target.as_deref())?;
            Some(
                AsEnvelope::new(Verb::Update, AsObject::person(set_by))
                    .with_target(AsObject::room(room))
                    .with_object(AsObject::topic(topic)),
            )
        }

        Shape::Rename => {
            let old = event.old_nick.as_deref()?;
            let new = event.new_nick.clone()?;
            Some(
                AsEnvelope::new(Verb::Update, AsObject::person(old))
                    .with_target(AsObject::person(new.clone()))
                    .with_object(AsObject::address(new)),
            )
        }

        Shape::Join => {
            let channel = event.channel.as_deref()?;
            // A join with no originating identity cannot be attributed to
            // anyone; forwarding a placeholder would be a lie, so drop it.
            let Some(who) = event.from.as_deref() else {
                debug!(channel, "dropping unattributed join event");
                return None;
            };
            Some(
                AsEnvelope::new(Verb::Join, AsObject::person(who))
                    .with_target(AsObject::room(channel)),
            )
        }

        Shape::Message => {
            let target = event.target.as_deref()?;
            let text = event.text.clone()?;
            let Some(who) = event.from.as_deref() else {
                debug!(target, "dropping message event with no originating identity");
                return None;
            };
            let target_obj = if looks_like_room(target) {
                AsObject::room(target)
            } else {
                AsObject::person(target)
            };
            Some(
                AsEnvelope::new(Verb::Send, AsObject::person(who))
                    .with_target(target_obj)
                    .with_object(AsObject::message(text)),
            )
        }

        Shape::Quit => {
            let who = event.from.as_deref()?;
            let reason = event
                .reason
                .clone()
                .unwrap_or_else(|| "connection closed".to_string());
            Some(
                AsEnvelope::new(Verb::Leave, AsObject::person(who))
                    .with_target(AsObject::room(""))
                    .with_object(AsObject::message(reason)),
            )
        }

        Shape::Part => {
            let channel = event.channel.as_deref()?;
            let who = event.from.as_deref()?;
            Some(
                AsEnvelope::new(Verb::Leave, AsObject::person(who))
                    .with_target(AsObject::room(channel)),
            )
        }

        Shape::Ignorable => {
            trace!(marker = ?event.command, "ignoring known backend chatter");
            None
        }

        Shape::Unknown => {
            trace!(?event, "dropping unclassifiable backend event");
            None
        }
    }
}

/// Classify an operation-level error stanza.
///
/// A "not found" sub-reason with a named target is a failed room join and is
/// reported as such, directed at the attempted room. Everything else becomes
/// a generic `error` envelope carrying the raw text; whether the original
/// stanza was a presence notification is preserved on the object type rather
/// than flattened away.
pub fn classify_error(error: &RawError) -> AsEnvelope {
    let lowered = error.text.to_lowercase();
    if lowered.contains("not found") {
        if let Some(target) = error.target.as_deref() {
            let actor = match error.from.as_deref() {
                Some(from) => AsObject::person(from),
                None => AsObject::room(target),
            };
            return AsEnvelope::new(Verb::Join, actor)
                .with_target(AsObject::room(target))
                .with_object(AsObject::error(error.text.clone()));
        }
    }

    let object = AsObject {
        object_type: Some(
            if error.from_presence {
                object_type::PRESENCE
            } else {
                object_type::ERROR
            }
            .to_string(),
        ),
        content: Some(error.text.clone()),
        ..AsObject::default()
    };

    let actor = match error.from.as_deref() {
        Some(from) => AsObject::person(from),
        None => AsObject::person("server"),
    };

    let mut envelope = AsEnvelope::new(Verb::Error, actor).with_object(object);
    if let Some(target) = error.target.as_deref() {
        envelope = envelope.with_target(AsObject::room(target));
    }
    envelope
}
