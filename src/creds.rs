//! Credentials and the credential-store seam.
//!
//! Credentials are immutable per connection instance. A credential change is
//! never an in-place mutation: it produces a new identity and a pool re-key.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Default port for TLS connections.
pub const DEFAULT_SECURE_PORT: u16 = 6697;
/// Default port for plaintext connections.
pub const DEFAULT_PLAIN_PORT: u16 = 6667;

fn default_secure() -> bool {
    true
}

/// Connection configuration for one actor identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "objectType", default = "Credentials::default_object_type")]
    pub object_type: String,
    /// Nickname the actor registers with.
    pub nick: String,
    /// Backend host, e.g. `irc.libera.chat`.
    pub server: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default = "default_secure")]
    pub secure: bool,
}

impl Credentials {
    fn default_object_type() -> String {
        patchbay_as::object_type::CREDENTIALS.to_string()
    }

    pub fn new(nick: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            object_type: Self::default_object_type(),
            nick: nick.into(),
            server: server.into(),
            password: None,
            port: None,
            secure: true,
        }
    }

    /// The opaque identity key these credentials connect as.
    pub fn identity(&self) -> String {
        format!("irc://{}@{}", self.nick, self.server)
    }

    /// Host and effective port, applying the 6697/6667 defaults.
    pub fn endpoint(&self) -> (&str, u16) {
        let port = self.port.unwrap_or(if self.secure {
            DEFAULT_SECURE_PORT
        } else {
            DEFAULT_PLAIN_PORT
        });
        (&self.server, port)
    }

    /// These credentials with a different nick (identity rename).
    pub fn with_nick(&self, nick: impl Into<String>) -> Self {
        Self {
            nick: nick.into(),
            ..self.clone()
        }
    }
}

/// External credential store collaborator.
///
/// Lookup is by identity; `set` persists renamed-identity credentials under
/// their new key.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn get(&self, identity: &str) -> Option<Credentials>;
    async fn set(&self, identity: &str, credentials: Credentials);
}

/// In-memory store used by the daemon and by tests.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    entries: DashMap<String, Credentials>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store, keying each entry by its derived identity.
    pub fn seeded(credentials: impl IntoIterator<Item = Credentials>) -> Self {
        let store = Self::new();
        for creds in credentials {
            store.entries.insert(creds.identity(), creds);
        }
        store
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn get(&self, identity: &str) -> Option<Credentials> {
        self.entries.get(identity).map(|e| e.clone())
    }

    async fn set(&self, identity: &str, credentials: Credentials) {
        self.entries.insert(identity.to_string(), credentials);
    }
}
