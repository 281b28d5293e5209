//! Server-side HTTP sessions.
//!
//! This crate keeps per-user state on the server, identified by a session cookie.
//! A [`Session`] is a set of typed values behind a lock, shared between the store and the handlers
//! of a request. Sessions are persisted by one of three interchangeable [`SessionStore`]s:
//!
//! * [`MemoryStore`] keeps sessions in memory,
//! * [`FileStore`] writes one file per session into a directory,
//! * [`RemoteStore`] delegates to a remote key-value service such as Redis.
//!
//! The stores that hold state locally run a background worker that removes expired sessions.
//!
//! # Change tracking
//!
//! Changes are tracked automatically.
//! Whenever a value is set or a flash value is taken, the session is marked as dirty,
//! and [`SessionManager::finish`] only asks the store to save dirty sessions.
//! Sessions loaded from a store are never dirty.
//!
//! # Value types
//!
//! Stores that serialize sessions need to know every type that may be stored in a session.
//! These types are registered with a [`TypeRegistry`] before the store is opened.
//!
//! # Security
//!
//! Generating unguessable session ids is the job of the [`SessionIdGenerator`], and setting the cookie flags
//! is the job of the caller. A session store is not a security boundary on its own.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use std::time::Duration;
//! use web_session::{FileStore, Session, SessionStore, TypeRegistry};
//!
//! # fn main() -> web_session::Result {
//! # async_std::task::block_on(async {
//! # let directory = tempfile::tempdir()?;
//! // Register the types that sessions may hold, then open the store.
//! let registry = Arc::new(TypeRegistry::with_builtin_types());
//! let store = FileStore::open(directory.path(), registry).await?;
//!
//! // Create and store a new session.
//! let session = Arc::new(Session::new("some-session-id"));
//! session.set_value("user", "alice".to_string());
//! store.save(&session, Duration::from_secs(60)).await?;
//!
//! // Load it again, e.g. in the next request.
//! let session = store.get("some-session-id").await?;
//! assert_eq!(session.get::<String>("user").unwrap().as_str(), "alice");
//! assert!(!session.need_save());
//! store.close().await;
//! #
//! # Ok(()) }) }
//! ```

#![forbid(unsafe_code)]
#![deny(
    future_incompatible,
    missing_debug_implementations,
    nonstandard_style,
    missing_docs,
    unreachable_pub,
    missing_copy_implementations,
    unused_qualifications
)]

/// A std::result::Result with this crate's [`Error`] and a default return type of ()
pub type Result<T = ()> = std::result::Result<T, Error>;

mod codec;
mod config;
pub mod context;
mod error;
mod file_store;
mod gc;
mod manager;
mod memory_store;
mod principal;
mod remote_store;
mod session;
mod session_id;
mod session_store;

pub use codec::{SessionValue, TypeRegistry};
pub use config::SessionConfig;
pub use error::Error;
pub use file_store::FileStore;
pub use gc::DEFAULT_GC_INTERVAL;
pub use manager::{SessionCookie, SessionManager};
pub use memory_store::MemoryStore;
pub use principal::UserPrincipal;
pub use remote_store::{RemoteClient, RemoteStore};
pub use session::Session;
pub use session_id::{
    is_valid_session_id, DebugSessionIdGenerator, DefaultSessionIdGenerator,
    RandomSessionIdGenerator, SessionIdGenerator,
};
pub use session_store::{is_expired, SessionStore};
