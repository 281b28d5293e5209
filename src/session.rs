use crate::codec::{SessionValue, TypeRegistry};
use crate::Result;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A session with a client.
///
/// Sessions are shared as `Arc<Session>` between the session store, the request context and the handlers,
/// so all mutation goes through `&self` and an internal lock.
/// Whenever the data is changed, the session is marked as dirty, and it has to be handed back to
/// [`SessionStore::save`](crate::SessionStore::save) for the change to persist.
///
/// # Example
///
/// ```rust
/// # use web_session::Session;
/// let session = Session::new("abc");
/// assert!(!session.need_save());
/// assert!(session.set_value("name", "alice".to_string()).is_none());
/// assert!(session.need_save());
/// assert_eq!(session.get::<String>("name").as_deref().map(String::as_str), Some("alice"));
/// ```
pub struct Session {
    id: String,
    valid: AtomicBool,
    state: RwLock<SessionState>,
}

#[derive(Default)]
struct SessionState {
    data: HashMap<String, SessionValue>,
    dirty: bool,
    /// Incremented on every mutation.
    version: u64,
}

impl SessionState {
    fn touch(&mut self) {
        self.dirty = true;
        self.version = self.version.wrapping_add(1);
    }
}

impl Session {
    /// Create a new, valid and empty session with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            valid: AtomicBool::new(true),
            state: RwLock::new(SessionState::default()),
        }
    }

    /// **This method should only be called by a session store!**
    ///
    /// Reconstitute a session from a payload produced by [`Session::serialize`].
    /// The session is not dirty.
    pub fn from_bytes(id: impl Into<String>, bytes: &[u8], registry: &TypeRegistry) -> Result<Self> {
        let session = Self::new(id);
        session.deserialize(bytes, registry)?;
        Ok(session)
    }

    /// The id of this session, stable for its whole life.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Returns false once the session was invalidated.
    pub fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Acquire)
    }

    /// Mark this session as invalid, e.g. on logout.
    /// This cannot be undone, and saving an invalid session removes it from the store.
    ///
    /// ```rust
    /// # use web_session::Session;
    /// let session = Session::new("abc");
    /// session.invalidate();
    /// assert!(!session.is_valid());
    /// assert!(session.need_save());
    /// ```
    pub fn invalidate(&self) {
        let mut state = self.state.write();
        self.valid.store(false, Ordering::Release);
        state.touch();
    }

    /// Store `value` under `key`, returning the previous value if there was one.
    /// Marks the session as dirty.
    pub fn set_value<T: Any + Send + Sync>(
        &self,
        key: impl Into<String>,
        value: T,
    ) -> Option<SessionValue> {
        let mut state = self.state.write();
        state.touch();
        state.data.insert(key.into(), SessionValue::new(value))
    }

    /// Returns the value under `key`. This does not mark the session as dirty.
    pub fn get_value(&self, key: &str) -> Option<SessionValue> {
        self.state.read().data.get(key).cloned()
    }

    /// Returns the value under `key` if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, key: &str) -> Option<Arc<T>> {
        self.get_value(key)?.downcast()
    }

    /// Read and remove the value under `key` in one step.
    ///
    /// A flash value is read exactly once, e.g. a validation error that survives one redirect.
    /// Marks the session as dirty if the key existed.
    ///
    /// ```rust
    /// # use web_session::Session;
    /// let session = Session::new("abc");
    /// session.set_value("msg", "hi".to_string());
    /// let flash = session.take_flash_value("msg").unwrap();
    /// assert_eq!(flash.downcast_ref::<String>().unwrap(), "hi");
    /// assert!(session.take_flash_value("msg").is_none());
    /// ```
    pub fn take_flash_value(&self, key: &str) -> Option<SessionValue> {
        let mut state = self.state.write();
        let value = state.data.remove(key);
        if value.is_some() {
            state.touch();
        }
        value
    }

    /// Returns true if the session contains `key`.
    pub fn contains_key(&self, key: &str) -> bool {
        self.state.read().data.contains_key(key)
    }

    /// Returns the keys of this session, in no particular order.
    pub fn keys(&self) -> Vec<String> {
        self.state.read().data.keys().cloned().collect()
    }

    /// Returns the number of values in this session.
    pub fn len(&self) -> usize {
        self.state.read().data.len()
    }

    /// Returns true if this session holds no values.
    pub fn is_empty(&self) -> bool {
        self.state.read().data.is_empty()
    }

    /// Returns true if the session was changed since it was created, loaded or last saved.
    pub fn need_save(&self) -> bool {
        self.state.read().dirty
    }

    /// Encode all values of this session.
    ///
    /// Only the read lock is taken, so this must not be called while holding a write lock on the same session.
    pub fn serialize(&self, registry: &TypeRegistry) -> Result<Vec<u8>> {
        self.snapshot(registry).map(|(bytes, _)| bytes)
    }

    /// Replace all values of this session with the decoded payload.
    /// On failure, the session is left unchanged.
    pub fn deserialize(&self, bytes: &[u8], registry: &TypeRegistry) -> Result {
        let data = registry.decode(bytes)?;
        let mut state = self.state.write();
        state.data = data;
        state.dirty = false;
        Ok(())
    }

    /// Encode the values together with the version they were read at.
    pub(crate) fn snapshot(&self, registry: &TypeRegistry) -> Result<(Vec<u8>, u64)> {
        let state = self.state.read();
        let bytes = registry.encode(&state.data)?;
        Ok((bytes, state.version))
    }

    /// The current mutation version.
    pub(crate) fn version(&self) -> u64 {
        self.state.read().version
    }

    /// Clear the dirty flag after persisting the snapshot taken at `version`.
    /// If the session was mutated since, it stays dirty.
    pub(crate) fn mark_saved(&self, version: u64) {
        let mut state = self.state.write();
        if state.version == version {
            state.dirty = false;
        }
    }

    /// Clear the dirty flag, used when a store hands out a session.
    pub(crate) fn mark_clean(&self) {
        self.state.write().dirty = false;
    }
}

impl Debug for Session {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("valid", &self.is_valid())
            .field("dirty", &state.dirty)
            .field("data", &state.data)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserPrincipal;
    use std::thread;

    #[test]
    fn round_trip_keeps_values_and_is_clean() {
        let registry = TypeRegistry::with_builtin_types();
        let session = Session::new("abc");
        session.set_value("name", "alice".to_string());
        session.set_value("age", 42i64);
        session.set_value("tags", vec!["a".to_string(), "b".to_string()]);
        session.set_value(
            "principal",
            UserPrincipal {
                id: "1".to_string(),
                roles: vec!["admin".to_string()],
                ..Default::default()
            },
        );

        let bytes = session.serialize(&registry).unwrap();
        let loaded = Session::from_bytes("abc", &bytes, &registry).unwrap();
        assert!(!loaded.need_save());
        assert_eq!(loaded.len(), 4);
        assert_eq!(loaded.get::<String>("name").unwrap().as_str(), "alice");
        assert_eq!(*loaded.get::<i64>("age").unwrap(), 42);
        assert_eq!(loaded.get::<Vec<String>>("tags").unwrap().len(), 2);
        assert!(loaded.get::<UserPrincipal>("principal").unwrap().has_role("admin"));
        // A value is only handed out as the type it was stored with.
        assert!(loaded.get::<i32>("age").is_none());
    }

    #[test]
    fn failed_deserialize_leaves_session_unchanged() {
        let registry = TypeRegistry::with_builtin_types();
        let session = Session::new("abc");
        session.set_value("kept", true);
        assert!(session.deserialize(b"\x01", &registry).is_err());
        assert!(session.contains_key("kept"));
        assert!(session.need_save());
    }

    #[test]
    fn mutation_after_snapshot_stays_dirty() {
        let registry = TypeRegistry::with_builtin_types();
        let session = Session::new("abc");
        session.set_value("a", 1u32);
        let (_, version) = session.snapshot(&registry).unwrap();
        session.set_value("b", 2u32);
        session.mark_saved(version);
        assert!(session.need_save());

        let (_, version) = session.snapshot(&registry).unwrap();
        session.mark_saved(version);
        assert!(!session.need_save());
    }

    #[test]
    fn concurrent_writers_and_readers() {
        let session = Arc::new(Session::new("abc"));
        let handles: Vec<_> = (0..8u64)
            .map(|index| {
                let session = Arc::clone(&session);
                thread::spawn(move || {
                    for round in 0..100u64 {
                        session.set_value(format!("{index}"), round);
                        let _ = session.get::<u64>(&format!("{}", (index + 1) % 8));
                        let _ = session.keys();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(session.len(), 8);
        for index in 0..8u64 {
            assert_eq!(*session.get::<u64>(&format!("{index}")).unwrap(), 99);
        }
    }
}
