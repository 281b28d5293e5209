use crate::{Error, Result, Session};
use async_std::sync::Mutex;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::hash_map::DefaultHasher;
use std::fmt::Debug;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

/// An async session store.
///
/// Exactly one store is shared by all requests of a server, and it is the only owner of the backing storage.
/// Three backends are provided: [`MemoryStore`](crate::MemoryStore), [`FileStore`](crate::FileStore)
/// and [`RemoteStore`](crate::RemoteStore).
#[async_trait]
pub trait SessionStore: Debug + Send + Sync {
    /// Persist the session so that it expires `timeout` from now.
    /// Saving the same session again slides the expiry forward.
    ///
    /// If the session was invalidated, it is replaced by a tombstone that lives for `timeout`.
    /// Until then, [`SessionStore::get`] reports the id as missing and saves of other copies are ignored.
    /// Writing the tombstone is best effort: a failure is logged, and `Ok(())` is returned.
    async fn save(&self, session: &Arc<Session>, timeout: Duration) -> Result;

    /// Load the session with the given `id`.
    ///
    /// Returns [`Error::SessionNotFound`] if the session is missing, expired, corrupt or was invalidated.
    /// The returned session is never dirty.
    async fn get(&self, id: &str) -> Result<Arc<Session>>;

    /// Stop the background work of this store and release its resources.
    /// Calling this more than once has no further effect.
    async fn close(&self);
}

#[async_trait]
impl<Store: SessionStore + ?Sized> SessionStore for Arc<Store> {
    async fn save(&self, session: &Arc<Session>, timeout: Duration) -> Result {
        (**self).save(session, timeout).await
    }

    async fn get(&self, id: &str) -> Result<Arc<Session>> {
        (**self).get(id).await
    }

    async fn close(&self) {
        (**self).close().await
    }
}

/// Returns true if an entry with the given `expiration` is expired at `now`.
/// An entry expiring exactly at `now` is still alive.
pub fn is_expired(expiration: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    expiration < now
}

/// The expiration of an entry saved at `now` with the given `timeout`.
pub(crate) fn expiration_after(now: DateTime<Utc>, timeout: Duration) -> Result<DateTime<Utc>> {
    chrono::Duration::from_std(timeout)
        .ok()
        .and_then(|timeout| now.checked_add_signed(timeout))
        .ok_or(Error::TimeoutOutOfRange)
}

const KEY_LOCK_STRIPES: usize = 64;

/// Serializes the check, snapshot and write of a save per session id, selected by hashing the id.
/// Distinct ids may share a stripe.
#[derive(Debug)]
pub(crate) struct KeyLocks {
    stripes: Vec<Mutex<()>>,
}

impl KeyLocks {
    pub(crate) fn new() -> Self {
        Self {
            stripes: (0..KEY_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        }
    }

    pub(crate) fn lock_for(&self, id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        id.hash(&mut hasher);
        &self.stripes[(hasher.finish() % self.stripes.len() as u64) as usize]
    }
}
