use crate::gc::{Collector, Sweep, DEFAULT_GC_INTERVAL};
use crate::session_store::{expiration_after, is_expired};
use crate::{Error, Result, Session, SessionConfig, SessionStore};
use async_std::sync::RwLock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// # in-memory session store
///
/// Sessions are stored by reference and never serialized, so values do not need to be registered
/// with a [`TypeRegistry`](crate::TypeRegistry).
/// Saving a session that is still alive only extends its expiry, and every [`SessionStore::get`]
/// returns the very same `Arc<Session>`.
/// Nothing survives a restart, and sessions are only visible to the process that stored them.
///
/// A background worker removes expired sessions every [`DEFAULT_GC_INTERVAL`], or the interval given to
/// [`MemoryStore::with_gc_interval`].
#[derive(Debug)]
pub struct MemoryStore {
    inner: Arc<MemoryStoreInner>,
    collector: Collector,
    closed: AtomicBool,
}

#[derive(Debug, Default)]
struct MemoryStoreInner {
    session_map: RwLock<HashMap<String, SessionItem>>,
}

#[derive(Debug)]
struct SessionItem {
    /// `None` marks an invalidated session that must not come back before `expiration`.
    session: Option<Arc<Session>>,
    expiration: DateTime<Utc>,
}

impl MemoryStore {
    /// Create a new empty memory store.
    pub fn new() -> Self {
        Self::with_gc_interval(DEFAULT_GC_INTERVAL)
    }

    /// Create a new empty memory store that removes expired sessions every `gc_interval`.
    pub fn with_gc_interval(gc_interval: Duration) -> Self {
        let inner = Arc::new(MemoryStoreInner::default());
        let collector = Collector::spawn(Arc::clone(&inner), gc_interval);
        Self {
            inner,
            collector,
            closed: AtomicBool::new(false),
        }
    }

    /// Create a new empty memory store that collects expired sessions every [`SessionConfig::gc_interval`].
    pub fn from_config(config: &SessionConfig) -> Self {
        Self::with_gc_interval(config.gc_interval())
    }

    /// Returns the number of entries in the memory store,
    /// including expired ones that were not yet collected.
    pub async fn len(&self) -> usize {
        self.inner.session_map.read().await.len()
    }

    /// Returns true if the memory store is empty.
    pub async fn is_empty(&self) -> bool {
        self.inner.session_map.read().await.is_empty()
    }

    /// Delete all sessions in the store.
    pub async fn clear(&self) {
        self.inner.session_map.write().await.clear();
    }

    /// Performs one garbage collection sweep and returns the number of removed entries.
    /// The background worker calls this periodically.
    pub async fn cleanup(&self) -> usize {
        self.inner.cleanup().await
    }

    fn ensure_open(&self) -> Result {
        if self.closed.load(Ordering::Acquire) {
            Err(Error::StoreClosed)
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn save(&self, session: &Arc<Session>, timeout: Duration) -> Result {
        self.ensure_open()?;
        let now = Utc::now();
        let expiration = expiration_after(now, timeout)?;
        let version = session.version();

        let mut session_map = self.inner.session_map.write().await;
        if !session.is_valid() {
            session_map.insert(
                session.id().to_owned(),
                SessionItem {
                    session: None,
                    expiration,
                },
            );
            log::debug!("session {} invalidated", session.id());
            return Ok(());
        }

        if let Some(item) = session_map.get_mut(session.id()) {
            if !is_expired(item.expiration, now) {
                match &item.session {
                    Some(stored) if stored.is_valid() => {
                        item.expiration = expiration;
                        if Arc::ptr_eq(stored, session) {
                            session.mark_saved(version);
                        }
                        return Ok(());
                    }
                    None => {
                        log::debug!(
                            "refusing to save session {} which was invalidated",
                            session.id()
                        );
                        return Ok(());
                    }
                    Some(_) => { /* replace the invalidated instance */ }
                }
            }
        }

        session_map.insert(
            session.id().to_owned(),
            SessionItem {
                session: Some(Arc::clone(session)),
                expiration,
            },
        );
        session.mark_saved(version);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.ensure_open()?;
        let session_map = self.inner.session_map.read().await;
        match session_map.get(id) {
            Some(SessionItem {
                session: Some(session),
                expiration,
            }) if !is_expired(*expiration, Utc::now()) && session.is_valid() => {
                session.mark_clean();
                Ok(Arc::clone(session))
            }
            _ => Err(Error::SessionNotFound),
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.collector.stop().await;
        self.clear().await;
    }
}

impl MemoryStoreInner {
    /// Collect expired ids under the read lock, then remove them under the write lock.
    /// An entry that was saved again in between is left alone.
    async fn cleanup(&self) -> usize {
        let now = Utc::now();
        let expired: Vec<String> = self
            .session_map
            .read()
            .await
            .iter()
            .filter(|(_, item)| is_expired(item.expiration, now))
            .map(|(id, _)| id.clone())
            .collect();
        if expired.is_empty() {
            return 0;
        }

        let mut session_map = self.session_map.write().await;
        let mut removed = 0;
        for id in expired {
            if session_map
                .get(&id)
                .is_some_and(|item| is_expired(item.expiration, now))
            {
                session_map.remove(&id);
                removed += 1;
                log::debug!("session {id} released by garbage collector");
            }
        }
        log::trace!("deleted {removed} expired sessions");
        removed
    }
}

#[async_trait]
impl Sweep for MemoryStoreInner {
    async fn sweep(&self) {
        self.cleanup().await;
    }
}
