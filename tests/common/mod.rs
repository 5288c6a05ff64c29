//! Integration test common infrastructure.
//!
//! Provides a scripted mock backend, a recording session transport, and a
//! harness wiring both into a dispatcher the way the daemon does.

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use patchbay::backend::{
    BackendError, BackendHandle, BackendLink, BoxFuture, Connector, RawEvent,
};
use patchbay::{
    ConnectionPool, Credentials, IrcDispatcher, MemoryCredentialStore, SessionGuard,
    SessionTransport,
};
use patchbay_as::AsEnvelope;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// Backend handle that records every operation instead of hitting a network.
#[derive(Default)]
pub struct MockHandle {
    pub ops: Mutex<Vec<String>>,
    /// When set, every operation reports the connection as dead.
    pub closed: AtomicBool,
}

impl MockHandle {
    pub fn ops(&self) -> Vec<String> {
        self.ops.lock().clone()
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn record(&self, op: String) -> Result<(), BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        self.ops.lock().push(op);
        Ok(())
    }
}

#[async_trait]
impl BackendHandle for MockHandle {
    async fn join(&self, channel: &str) -> Result<(), BackendError> {
        self.record(format!("join {channel}"))
    }
    async fn part(&self, channel: &str, _reason: Option<&str>) -> Result<(), BackendError> {
        self.record(format!("part {channel}"))
    }
    async fn privmsg(&self, target: &str, text: &str) -> Result<(), BackendError> {
        self.record(format!("privmsg {target} {text}"))
    }
    async fn set_nick(&self, nick: &str) -> Result<(), BackendError> {
        self.record(format!("nick {nick}"))
    }
    async fn set_topic(&self, channel: &str, topic: &str) -> Result<(), BackendError> {
        self.record(format!("topic {channel} {topic}"))
    }
    async fn names(&self, channel: &str) -> Result<(), BackendError> {
        self.record(format!("names {channel}"))
    }
    async fn quit(&self, reason: &str) -> Result<(), BackendError> {
        // Teardown is always allowed, even on a dead connection.
        self.ops.lock().push(format!("quit {reason}"));
        Ok(())
    }
}

/// Scripted backend network: hands out a fresh [`MockHandle`] per connect and
/// keeps a tap for injecting wire events into the adapter.
#[derive(Default)]
pub struct MockNet {
    pub connects: AtomicUsize,
    handles: Mutex<Vec<Arc<MockHandle>>>,
    event_taps: Mutex<Vec<mpsc::Sender<RawEvent>>>,
}

impl MockNet {
    pub fn connector(net: &Arc<Self>) -> Connector {
        let net = net.clone();
        Arc::new(move |_credentials| {
            let net = net.clone();
            Box::pin(async move {
                net.connects.fetch_add(1, Ordering::SeqCst);
                let handle = Arc::new(MockHandle::default());
                let (tap, events) = mpsc::channel(32);
                net.handles.lock().push(handle.clone());
                net.event_taps.lock().push(tap);
                Ok(BackendLink {
                    handle: handle as Arc<dyn BackendHandle>,
                    events,
                })
            }) as BoxFuture<'static, Result<BackendLink, BackendError>>
        })
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// The most recently established connection's handle.
    pub fn last_handle(&self) -> Arc<MockHandle> {
        self.handles.lock().last().cloned().expect("no connection made")
    }

    /// Push a wire event into the most recent connection's event stream.
    pub async fn emit(&self, event: RawEvent) {
        let tap = self
            .event_taps
            .lock()
            .last()
            .cloned()
            .expect("no connection made");
        let _ = tap.send(event).await;
    }
}

/// Session transport that records every delivered envelope.
#[derive(Default)]
pub struct RecordingSession {
    pub sent: Mutex<Vec<AsEnvelope>>,
    pub debugs: Mutex<Vec<String>>,
}

impl RecordingSession {
    pub fn envelopes(&self) -> Vec<AsEnvelope> {
        self.sent.lock().clone()
    }
}

impl SessionTransport for RecordingSession {
    fn send_to_client(&self, envelope: AsEnvelope) {
        self.sent.lock().push(envelope);
    }
    fn debug(&self, text: &str) {
        self.debugs.lock().push(text.to_string());
    }
}

/// A dispatcher wired to mocks, the way the daemon wires the real thing.
pub struct Harness {
    pub dispatcher: IrcDispatcher,
    pub session: Arc<RecordingSession>,
    pub transport: Arc<dyn SessionTransport>,
    pub store: Arc<MemoryCredentialStore>,
    pub pool: Arc<ConnectionPool>,
    pub net: Arc<MockNet>,
}

pub fn harness(accounts: impl IntoIterator<Item = Credentials>) -> Harness {
    patchbay::telemetry::try_init();

    let session = Arc::new(RecordingSession::default());
    let transport: Arc<dyn SessionTransport> = session.clone();
    let store = Arc::new(MemoryCredentialStore::seeded(accounts));
    let pool = Arc::new(ConnectionPool::new(Duration::from_secs(1)));
    let net = Arc::new(MockNet::default());

    let dispatcher = IrcDispatcher::new(
        SessionGuard::new("test", &transport),
        pool.clone(),
        store.clone(),
        MockNet::connector(&net),
    );

    Harness {
        dispatcher,
        session,
        transport,
        store,
        pool,
        net,
    }
}

/// Poll until `cond` holds or a short deadline passes.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..200 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached within deadline");
}

pub fn alice() -> Credentials {
    let mut credentials = Credentials::new("alice", "irc.example.org");
    credentials.secure = false;
    credentials
}
