//! patchbayd - Activity Streams gateway daemon.
//!
//! A minimal host for the gateway core: jobs arrive as newline-delimited
//! JSON on stdin, canonical envelopes leave as JSON lines on stdout. The
//! full worker-supervisor / job-queue machinery lives outside this crate;
//! this binary stands in for it with one adapter per actor identity.

use anyhow::Context as _;
use patchbay::backend::irc;
use patchbay::{
    Config, ConnectionPool, CredentialStore, IrcDispatcher, MemoryCredentialStore, SessionGuard,
    SessionTransport,
};
use patchbay_as::{AsEnvelope, Job};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, error, info, warn};

/// Session transport that prints canonical envelopes as JSON lines.
struct StdoutSession;

impl SessionTransport for StdoutSession {
    fn send_to_client(&self, envelope: AsEnvelope) {
        match serde_json::to_string(&envelope) {
            Ok(json) => println!("{json}"),
            Err(e) => error!(error = %e, "failed to serialize envelope"),
        }
    }

    fn debug(&self, text: &str) {
        debug!(target: "session", "{text}");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    patchbay::telemetry::init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "patchbay.toml".to_string());

    let config = Config::load(&config_path)
        .with_context(|| format!("failed to load config from {config_path}"))?;

    info!(
        accounts = config.account.len(),
        connect_timeout = ?config.gateway.connect_timeout(),
        "starting patchbayd"
    );

    let store: Arc<dyn CredentialStore> =
        Arc::new(MemoryCredentialStore::seeded(config.account.clone()));
    let session: Arc<dyn SessionTransport> = Arc::new(StdoutSession);

    // One adapter per active identity, created lazily on first job.
    let mut adapters: HashMap<String, Arc<IrcDispatcher>> = HashMap::new();

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let job: Job = match serde_json::from_str(line) {
            Ok(job) => job,
            Err(e) => {
                warn!(error = %e, "discarding malformed job");
                continue;
            }
        };

        let adapter = adapters
            .entry(job.actor.clone())
            .or_insert_with(|| {
                info!(identity = %job.actor, "spinning up adapter");
                let guard = SessionGuard::new(job.actor.clone(), &session);
                let pool = Arc::new(ConnectionPool::new(config.gateway.connect_timeout()));
                Arc::new(IrcDispatcher::new(
                    guard,
                    pool,
                    store.clone(),
                    irc::connector(),
                ))
            })
            .clone();

        match adapter.dispatch(&job).await {
            Ok(()) => debug!(verb = %job.verb, actor = %job.actor, "job completed"),
            Err(e) => {
                warn!(verb = %job.verb, actor = %job.actor, code = e.error_code(), "job failed");
                session.send_to_client(e.to_error_envelope(&job.actor, job.target_name()));
            }
        }
    }

    info!("stdin closed, shutting down");
    for adapter in adapters.values() {
        adapter.cleanup().await;
    }

    Ok(())
}
