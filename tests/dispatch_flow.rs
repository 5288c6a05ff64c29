//! End-to-end verb dispatch against a mock backend.
//!
//! Covers the canonical job flows: join/send gating, identity rename with
//! pool re-key, observe, and the translation of wire events arriving through
//! a live connection's pump.

mod common;

use common::{alice, harness, wait_until};
use patchbay::DispatchError;
use patchbay::backend::{RawError, RawEvent};
use patchbay_as::{AsObject, Job, Verb, object_type};

fn join_job(actor: &str, room: &str) -> Job {
    Job::new(Verb::Join, actor).with_target(AsObject::room(room))
}

#[tokio::test]
async fn join_creates_connection_and_membership() {
    let h = harness([alice()]);
    let actor = alice().identity();

    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();

    assert_eq!(h.net.connects(), 1);
    assert_eq!(h.pool.len(), 1);
    assert!(h.dispatcher.is_joined("#kosmos"));
    assert_eq!(h.net.last_handle().ops(), ["join #kosmos"]);
}

#[tokio::test]
async fn send_before_join_never_reaches_the_backend() {
    let h = harness([alice()]);
    let actor = alice().identity();

    let job = Job::new(Verb::Send, actor.clone())
        .with_target(AsObject::room("#kosmos"))
        .with_object(AsObject::message("hello"));

    let err = h.dispatcher.dispatch(&job).await.unwrap_err();
    assert_eq!(err, DispatchError::NotJoined("#kosmos".into()));
    // Precondition failures must not even open a connection.
    assert_eq!(h.net.connects(), 0);
    assert!(h.pool.is_empty());
}

#[tokio::test]
async fn send_to_a_person_is_always_deliverable() {
    let h = harness([alice()]);
    let actor = alice().identity();

    let job = Job::new(Verb::Send, actor.clone())
        .with_target(AsObject::person("bob"))
        .with_object(AsObject::message("  psst  "));

    h.dispatcher.dispatch(&job).await.unwrap();
    // Content is trimmed before it goes out.
    assert_eq!(h.net.last_handle().ops(), ["privmsg bob psst"]);
}

#[tokio::test]
async fn send_with_only_whitespace_is_rejected() {
    let h = harness([alice()]);
    let actor = alice().identity();

    let job = Job::new(Verb::Send, actor.clone())
        .with_target(AsObject::person("bob"))
        .with_object(AsObject::message("   "));

    let err = h.dispatcher.dispatch(&job).await.unwrap_err();
    assert_eq!(err.error_code(), "backend_error");
    assert_eq!(h.net.connects(), 0);
}

#[tokio::test]
async fn join_then_send_reuses_the_pooled_connection() {
    let h = harness([alice()]);
    let actor = alice().identity();

    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();
    let job = Job::new(Verb::Send, actor.clone())
        .with_target(AsObject::room("#kosmos"))
        .with_object(AsObject::message("hello"));
    h.dispatcher.dispatch(&job).await.unwrap();

    assert_eq!(h.net.connects(), 1);
    assert_eq!(
        h.net.last_handle().ops(),
        ["join #kosmos", "privmsg #kosmos hello"]
    );
}

#[tokio::test]
async fn leave_retires_membership() {
    let h = harness([alice()]);
    let actor = alice().identity();

    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();
    let job = Job::new(Verb::Leave, actor.clone()).with_target(AsObject::room("#kosmos"));
    h.dispatcher.dispatch(&job).await.unwrap();

    assert!(!h.dispatcher.is_joined("#kosmos"));

    // A later send fails again.
    let send = Job::new(Verb::Send, actor.clone())
        .with_target(AsObject::room("#kosmos"))
        .with_object(AsObject::message("anyone?"));
    assert_eq!(
        h.dispatcher.dispatch(&send).await.unwrap_err(),
        DispatchError::NotJoined("#kosmos".into())
    );
}

#[tokio::test]
async fn address_update_renames_identity_and_rekeys_the_pool() {
    let h = harness([alice()]);
    let old_creds = alice();
    let actor = old_creds.identity();

    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();

    let job = Job::new(Verb::Update, actor.clone()).with_object(AsObject::address("alice2"));
    h.dispatcher.dispatch(&job).await.unwrap();

    let new_creds = old_creds.with_nick("alice2");
    let new_identity = new_creds.identity();

    // Backend rename was issued, the entry moved keys without reconnecting,
    // and the renamed credentials were persisted under the new identity.
    assert!(h.net.last_handle().ops().contains(&"nick alice2".to_string()));
    assert_eq!(h.net.connects(), 1);
    assert!(h.pool.get(&actor, &old_creds).is_none());
    assert!(h.pool.get(&new_identity, &new_creds).is_some());

    use patchbay::CredentialStore as _;
    let stored = h.store.get(&new_identity).await.unwrap();
    assert_eq!(stored.nick, "alice2");
}

#[tokio::test]
async fn update_with_unrecognized_object_type_is_a_noop_success() {
    let h = harness([alice()]);
    let actor = alice().identity();

    let job = Job::new(Verb::Update, actor.clone()).with_object(AsObject {
        object_type: Some("mood".into()),
        content: Some("sleepy".into()),
        ..AsObject::default()
    });

    h.dispatcher.dispatch(&job).await.unwrap();
    assert_eq!(h.net.connects(), 0);
}

#[tokio::test]
async fn topic_update_reaches_the_backend() {
    let h = harness([alice()]);
    let actor = alice().identity();

    let job = Job::new(Verb::Update, actor.clone())
        .with_target(AsObject::room("#kosmos"))
        .with_object(AsObject::topic("welcome home"));
    h.dispatcher.dispatch(&job).await.unwrap();

    assert_eq!(h.net.last_handle().ops(), ["topic #kosmos welcome home"]);
}

#[tokio::test]
async fn observe_attendance_issues_a_roster_query() {
    let h = harness([alice()]);
    let actor = alice().identity();

    let job = Job::new(Verb::Observe, actor.clone())
        .with_target(AsObject::room("#kosmos"))
        .with_object(AsObject::attendance(Vec::new()));
    h.dispatcher.dispatch(&job).await.unwrap();

    assert_eq!(h.net.last_handle().ops(), ["names #kosmos"]);
}

#[tokio::test]
async fn observe_rejects_other_object_types() {
    let h = harness([alice()]);
    let actor = alice().identity();

    let job = Job::new(Verb::Observe, actor.clone())
        .with_target(AsObject::room("#kosmos"))
        .with_object(AsObject::topic("nope"));

    let err = h.dispatcher.dispatch(&job).await.unwrap_err();
    assert_eq!(err, DispatchError::UnsupportedObjectType("topic".into()));
    assert_eq!(h.net.connects(), 0);
}

#[tokio::test]
async fn roster_event_reaches_the_session_as_attendance() {
    let h = harness([alice()]);
    let actor = alice().identity();
    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();

    h.net
        .emit(RawEvent {
            channel: Some("#kosmos".into()),
            members: Some(vec!["alice".into(), "bob".into(), "carol".into()]),
            ..RawEvent::default()
        })
        .await;

    wait_until(|| !h.session.envelopes().is_empty()).await;
    let envelopes = h.session.envelopes();
    assert_eq!(envelopes.len(), 1);
    assert_eq!(envelopes[0].verb, Verb::Observe);
    assert!(envelopes[0].object.is_type(object_type::ATTENDANCE));
    assert_eq!(
        envelopes[0].object.members.as_ref().unwrap().len(),
        3
    );
}

#[tokio::test]
async fn connection_loss_emits_leave_and_evicts_the_pool() {
    let h = harness([alice()]);
    let actor = alice().identity();
    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();
    assert_eq!(h.pool.len(), 1);

    h.net
        .emit(RawEvent {
            from: Some("alice".into()),
            reason: Some("ping timeout".into()),
            connection_lost: true,
            ..RawEvent::default()
        })
        .await;

    wait_until(|| !h.session.envelopes().is_empty()).await;
    wait_until(|| h.pool.is_empty()).await;

    let envelopes = h.session.envelopes();
    assert_eq!(envelopes[0].verb, Verb::Leave);
    assert_eq!(envelopes[0].target.as_ref().unwrap().name(), Some(""));
    assert_eq!(
        envelopes[0].object.content.as_deref(),
        Some("ping timeout")
    );

    // Membership was cleared with the connection.
    assert!(!h.dispatcher.is_joined("#kosmos"));

    // The next job for this identity triggers a fresh creation.
    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();
    assert_eq!(h.net.connects(), 2);
}

#[tokio::test]
async fn backend_kick_retires_membership_through_the_pump() {
    let h = harness([alice()]);
    let actor = alice().identity();
    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();
    assert!(h.dispatcher.is_joined("#kosmos"));

    // A kick arrives normalized as a part of our own nick.
    h.net
        .emit(RawEvent {
            command: Some("PART".into()),
            from: Some("alice".into()),
            channel: Some("#kosmos".into()),
            reason: Some("flooding".into()),
            ..RawEvent::default()
        })
        .await;

    wait_until(|| !h.dispatcher.is_joined("#kosmos")).await;
    let envelopes = h.session.envelopes();
    assert_eq!(envelopes[0].verb, Verb::Leave);
}

#[tokio::test]
async fn operation_error_stanza_becomes_a_join_failure_envelope() {
    let h = harness([alice()]);
    let actor = alice().identity();
    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();

    h.net
        .emit(RawEvent {
            error: Some(RawError {
                text: "channel not found".into(),
                target: Some("#nowhere".into()),
                from: None,
                from_presence: true,
            }),
            ..RawEvent::default()
        })
        .await;

    wait_until(|| !h.session.envelopes().is_empty()).await;
    let envelopes = h.session.envelopes();
    assert_eq!(envelopes[0].verb, Verb::Join);
    assert_eq!(envelopes[0].target.as_ref().unwrap().name(), Some("#nowhere"));
    assert!(envelopes[0].object.is_type(object_type::ERROR));
}

#[tokio::test]
async fn dead_connection_surfaces_error_and_evicts_entry() {
    let h = harness([alice()]);
    let actor = alice().identity();
    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();

    // The backend now reports the connection itself as unusable.
    h.net.last_handle().close();

    let job = Job::new(Verb::Send, actor.clone())
        .with_target(AsObject::room("#kosmos"))
        .with_object(AsObject::message("hello?"));
    let err = h.dispatcher.dispatch(&job).await.unwrap_err();
    assert_eq!(err.error_code(), "backend_error");
    assert!(h.pool.is_empty());

    // Next job reconnects fresh.
    h.dispatcher.dispatch(&join_job(&actor, "#kosmos")).await.unwrap();
    assert_eq!(h.net.connects(), 2);
}

#[tokio::test]
async fn unknown_actor_fails_without_credentials() {
    let h = harness([alice()]);
    let err = h
        .dispatcher
        .dispatch(&join_job("irc://nobody@irc.example.org", "#kosmos"))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "connect_failed");
}
