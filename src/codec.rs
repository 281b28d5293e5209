use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// A type-erased value stored in a [`Session`](crate::Session).
///
/// Cloning is cheap, the value itself is shared.
#[derive(Clone)]
pub struct SessionValue {
    value: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl SessionValue {
    /// Wrap a value.
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            value: Arc::new(value),
            type_name: std::any::type_name::<T>(),
        }
    }

    /// Returns a reference to the value if it is of type `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref()
    }

    /// Returns the shared value if it is of type `T`.
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        Arc::clone(&self.value).downcast().ok()
    }

    /// Returns true if the value is of type `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// The Rust name of the wrapped type.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    fn inner_type_id(&self) -> TypeId {
        (*self.value).type_id()
    }
}

impl Debug for SessionValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "SessionValue({})", self.type_name)
    }
}

type EncodeFn = fn(&SessionValue) -> Result<Vec<u8>>;
type DecodeFn = fn(&[u8]) -> Result<SessionValue>;

#[derive(Clone)]
struct RegisteredType {
    name: String,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// The set of value types that may be persisted in sessions.
///
/// Stores that serialize sessions receive the registry at construction and keep it for their whole lifetime.
/// Every type that is put into a session must be registered before the store is opened,
/// otherwise saving the session fails with [`Error::UnregisteredType`].
///
/// The registered name is written next to each value, so it must stay stable across restarts
/// for sessions that were persisted by a previous process to remain readable.
///
/// # Example
///
/// ```
/// use web_session::TypeRegistry;
///
/// #[derive(serde::Serialize, serde::Deserialize)]
/// struct Cart {
///     items: Vec<u32>,
/// }
///
/// # fn main() -> web_session::Result {
/// let mut registry = TypeRegistry::with_builtin_types();
/// registry.register::<Cart>("cart")?;
/// assert!(registry.contains::<Cart>());
/// assert!(registry.register::<Cart>("cart").is_err());
/// # Ok(()) }
/// ```
#[derive(Clone, Default)]
pub struct TypeRegistry {
    by_type: HashMap<TypeId, RegisteredType>,
    by_name: HashMap<String, RegisteredType>,
}

impl TypeRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Default::default()
    }

    /// Create a registry with common primitive types and [`UserPrincipal`](crate::UserPrincipal) registered.
    pub fn with_builtin_types() -> Self {
        let mut registry = Self::new();
        registry.register_builtin::<String>("string");
        registry.register_builtin::<bool>("bool");
        registry.register_builtin::<i32>("i32");
        registry.register_builtin::<i64>("i64");
        registry.register_builtin::<u32>("u32");
        registry.register_builtin::<u64>("u64");
        registry.register_builtin::<f64>("f64");
        registry.register_builtin::<Vec<String>>("string_list");
        registry.register_builtin::<crate::UserPrincipal>("user_principal");
        registry
    }

    fn register_builtin<T>(&mut self, name: &str)
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        if let Err(error) = self.register::<T>(name) {
            unreachable!("builtin types are distinct: {error}");
        }
    }

    /// Register `T` under the persisted type name `name`.
    ///
    /// Fails if either the name or the type was registered before.
    pub fn register<T>(&mut self, name: impl Into<String>) -> Result<&mut Self>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        let name = name.into();
        let type_id = TypeId::of::<T>();
        if self.by_type.contains_key(&type_id) || self.by_name.contains_key(&name) {
            return Err(Error::DuplicateType { name });
        }

        let registered = RegisteredType {
            name: name.clone(),
            encode: encode_value::<T>,
            decode: decode_value::<T>,
        };
        self.by_type.insert(type_id, registered.clone());
        self.by_name.insert(name, registered);
        Ok(self)
    }

    /// Returns true if `T` is registered.
    pub fn contains<T: 'static>(&self) -> bool {
        self.by_type.contains_key(&TypeId::of::<T>())
    }

    /// Returns the number of registered types.
    pub fn len(&self) -> usize {
        self.by_type.len()
    }

    /// Returns true if no type is registered.
    pub fn is_empty(&self) -> bool {
        self.by_type.is_empty()
    }

    /// Encode a key/value mapping into an opaque payload.
    /// Entries are written sorted by key, so equal mappings give equal payloads.
    pub fn encode<'a>(
        &self,
        entries: impl IntoIterator<Item = (&'a String, &'a SessionValue)>,
    ) -> Result<Vec<u8>> {
        let mut records = entries
            .into_iter()
            .map(|(key, value)| {
                let registered =
                    self.by_type
                        .get(&value.inner_type_id())
                        .ok_or(Error::UnregisteredType {
                            type_name: value.type_name(),
                        })?;
                Ok(Record {
                    key: key.clone(),
                    type_name: registered.name.clone(),
                    payload: (registered.encode)(value)?,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        records.sort_unstable_by(|a, b| a.key.cmp(&b.key));
        Ok(bincode::serialize(&records)?)
    }

    /// Decode a payload produced by [`TypeRegistry::encode`].
    pub fn decode(&self, bytes: &[u8]) -> Result<HashMap<String, SessionValue>> {
        let records: Vec<Record> = bincode::deserialize(bytes)?;
        records
            .into_iter()
            .map(|record| {
                let registered =
                    self.by_name
                        .get(&record.type_name)
                        .ok_or_else(|| Error::UnknownType {
                            name: record.type_name.clone(),
                        })?;
                Ok((record.key, (registered.decode)(&record.payload)?))
            })
            .collect()
    }
}

impl Debug for TypeRegistry {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.by_name.keys().collect();
        names.sort_unstable();
        f.debug_struct("TypeRegistry").field("types", &names).finish()
    }
}

#[derive(Serialize, Deserialize)]
struct Record {
    key: String,
    type_name: String,
    payload: Vec<u8>,
}

fn encode_value<T: Serialize + 'static>(value: &SessionValue) -> Result<Vec<u8>> {
    let value = value
        .downcast_ref::<T>()
        .ok_or(Error::UnregisteredType {
            type_name: value.type_name(),
        })?;
    Ok(bincode::serialize(value)?)
}

fn decode_value<T: DeserializeOwned + Send + Sync + 'static>(bytes: &[u8]) -> Result<SessionValue> {
    let value: T = bincode::deserialize(bytes)?;
    Ok(SessionValue::new(value))
}
