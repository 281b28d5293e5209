//! Session store over a remote key-value service.
//!
//! The remote service owns the expiry of the sessions: every save sets the entry with a time to live,
//! so there is no local garbage collection.
//! Any service that offers get and set-with-ttl can be plugged in by implementing [`RemoteClient`].
//! With the `redis` feature, [`RemoteClient`] is implemented for [`redis::aio::MultiplexedConnection`].
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use web_session::{RemoteStore, TypeRegistry};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = redis::Client::open("redis://127.0.0.1:6379")?;
//! let connection = client.get_multiplexed_async_connection().await?;
//! let store = RemoteStore::new(connection, Arc::new(TypeRegistry::with_builtin_types()))
//!     .with_key_prefix("session:");
//! # Ok(())
//! # }
//! ```

use crate::session_store::KeyLocks;
use crate::{Error, Result, Session, SessionStore, TypeRegistry};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// The primitives a remote key-value service has to offer to back a [`RemoteStore`].
#[async_trait]
pub trait RemoteClient: Send + Sync {
    /// Returns the value under `key`, or `None` if there is none.
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Set `key` to `value`, expiring after `ttl`.
    async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()>;
}

/// # remote session store
///
/// Saves map to a set-with-ttl, loads to a get.
/// A missing entry, a backend failure on load, and an undecodable payload are all reported as
/// [`Error::SessionNotFound`].
///
/// Saving an invalidated session overwrites its entry with a tombstone that expires after the given timeout.
/// A save first reads the entry and leaves a live tombstone in place.
/// Saves through one store are serialized per id, saves from different processes are not.
///
/// All value types stored in sessions must be registered with the [`TypeRegistry`] the store is created with.
pub struct RemoteStore<Client> {
    client: Client,
    registry: Arc<TypeRegistry>,
    key_prefix: String,
    key_locks: KeyLocks,
    closed: AtomicBool,
}

/// The value stored under a session key.
#[derive(Debug, Serialize, Deserialize)]
enum RemoteEntry {
    Live(Vec<u8>),
    Invalidated,
}

impl<Client: RemoteClient> RemoteStore<Client> {
    /// Create a store over a pre-configured client.
    /// Session ids are used as keys as they are.
    pub fn new(client: Client, registry: Arc<TypeRegistry>) -> Self {
        Self {
            client,
            registry,
            key_prefix: String::new(),
            key_locks: KeyLocks::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Prepend `key_prefix` to each session id to form the key.
    pub fn with_key_prefix(mut self, key_prefix: impl Into<String>) -> Self {
        self.key_prefix = key_prefix.into();
        self
    }

    /// Returns a reference to the client.
    pub fn client(&self) -> &Client {
        &self.client
    }

    fn key(&self, id: &str) -> String {
        format!("{}{id}", self.key_prefix)
    }

    fn ensure_open(&self) -> Result {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::StoreClosed)
        } else {
            Ok(())
        }
    }
}

impl<Client> Debug for RemoteStore<Client> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteStore")
            .field("registry", &self.registry)
            .field("key_prefix", &self.key_prefix)
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl<Client: RemoteClient> SessionStore for RemoteStore<Client> {
    async fn save(&self, session: &Arc<Session>, timeout: Duration) -> Result {
        self.ensure_open()?;
        let key = self.key(session.id());
        let _guard = self.key_locks.lock_for(&key).lock().await;

        if !session.is_valid() {
            let tombstone = bincode::serialize(&RemoteEntry::Invalidated)?;
            match self.client.set_with_ttl(&key, tombstone, timeout).await {
                Ok(()) => log::debug!("session {key} invalidated"),
                Err(error) => log::warn!("failed to invalidate session {key}: {error:#}"),
            }
            return Ok(());
        }

        let existing = self.client.get(&key).await.map_err(Error::Remote)?;
        let invalidated = existing.is_some_and(|bytes| {
            matches!(
                bincode::deserialize::<RemoteEntry>(&bytes),
                Ok(RemoteEntry::Invalidated)
            )
        });
        if invalidated {
            log::debug!("refusing to save session {key} which was invalidated");
            return Ok(());
        }

        let (data, version) = session.snapshot(&self.registry)?;
        let entry = bincode::serialize(&RemoteEntry::Live(data))?;
        self.client
            .set_with_ttl(&key, entry, timeout)
            .await
            .map_err(Error::Remote)?;
        session.mark_saved(version);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.ensure_open()?;
        let key = self.key(id);

        let bytes = match self.client.get(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return Err(Error::SessionNotFound),
            Err(error) => {
                log::warn!("failed to load session {key}: {error:#}");
                return Err(Error::SessionNotFound);
            }
        };

        let decoded = bincode::deserialize::<RemoteEntry>(&bytes)
            .map_err(Error::from)
            .and_then(|entry| match entry {
                RemoteEntry::Live(data) => Session::from_bytes(id, &data, &self.registry).map(Some),
                RemoteEntry::Invalidated => Ok(None),
            });
        match decoded {
            Ok(Some(session)) => Ok(Arc::new(session)),
            Ok(None) => Err(Error::SessionNotFound),
            Err(error) => {
                log::warn!("data of session {key} cannot be decoded, treating it as missing: {error}");
                Err(Error::SessionNotFound)
            }
        }
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::debug!("remote session store closed");
        }
    }
}

#[cfg(feature = "redis")]
mod redis_client {
    use super::RemoteClient;
    use async_trait::async_trait;
    use redis::aio::MultiplexedConnection;
    use redis::AsyncCommands;
    use std::time::Duration;

    #[async_trait]
    impl RemoteClient for MultiplexedConnection {
        async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
            let mut connection = self.clone();
            Ok(AsyncCommands::get::<_, Option<Vec<u8>>>(&mut connection, key).await?)
        }

        async fn set_with_ttl(&self, key: &str, value: Vec<u8>, ttl: Duration) -> anyhow::Result<()> {
            let mut connection = self.clone();
            // Redis rejects a zero time to live.
            let milliseconds = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            connection.pset_ex::<_, _, ()>(key, value, milliseconds).await?;
            Ok(())
        }
    }
}
