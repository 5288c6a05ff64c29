//! patchbay - Activity Streams protocol gateway.
//!
//! Clients speak one canonical message format (a verb/actor/target/object
//! envelope) while the gateway talks to heterogeneous chat backends over
//! their native wire protocols. Each backend sits behind a platform adapter
//! that turns canonical verb jobs into protocol operations over a pooled
//! live connection, and turns asynchronous wire events back into canonical
//! messages for the originating client session.
//!
//! The crate's core is the machinery every adapter shares:
//!
//! - [`pool::ConnectionPool`] - creates, reuses, re-keys and tears down live
//!   backend connections per actor identity.
//! - [`dispatcher::IrcDispatcher`] - the verb-dispatch contract, tracking the
//!   membership state that gates `send`.
//! - [`translate`] - classifies the open-ended stream of backend
//!   notifications into the closed set of canonical outbound shapes.
//! - [`session::SessionGuard`] - absorbs callbacks that fire after the
//!   owning worker was torn down.

pub mod backend;
pub mod config;
pub mod creds;
pub mod dispatcher;
pub mod error;
pub mod pool;
pub mod session;
pub mod telemetry;
pub mod translate;

pub use config::Config;
pub use creds::{CredentialStore, Credentials, MemoryCredentialStore};
pub use dispatcher::{Completion, IrcDispatcher};
pub use error::{DispatchError, DispatchResult};
pub use pool::{ConnState, ConnectionPool, Identity, PooledConnection};
pub use session::{SessionGuard, SessionTransport};

// The canonical envelope model, re-exported for hosts.
pub use patchbay_as::{AsEnvelope, AsObject, Job, Verb};
