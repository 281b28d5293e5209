use std::path::PathBuf;

/// All errors that can occur in this crate.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// There is no usable session with the requested id.
    /// This covers missing, expired, corrupt and invalidated sessions alike,
    /// and callers are expected to treat all of them by creating a new session.
    #[error("session not found")]
    SessionNotFound,

    /// A directory was expected, but the path points to something else.
    #[error("a directory is required, but {path:?} is not a directory")]
    DirectoryRequired {
        /// The offending path.
        path: PathBuf,
    },

    /// A file was expected, but the path points to a directory.
    #[error("a file is required, but {path:?} is a directory")]
    FileRequired {
        /// The offending path.
        path: PathBuf,
    },

    /// A persisted session file exists, but its content cannot be decoded.
    #[error("bad session file {path:?}: {source}")]
    BadSessionFile {
        /// The offending file.
        path: PathBuf,
        /// The decoding error.
        source: bincode::Error,
    },

    /// The session id cannot be used as a storage key.
    #[error("the session id {id:?} contains characters outside of the url-safe base64 alphabet")]
    InvalidSessionId {
        /// The rejected id.
        id: String,
    },

    /// A session value has a type that was never registered with the [`TypeRegistry`](crate::TypeRegistry).
    #[error("the type `{type_name}` is not registered with the type registry")]
    UnregisteredType {
        /// The Rust name of the unregistered type.
        type_name: &'static str,
    },

    /// A persisted session value references a type name unknown to the [`TypeRegistry`](crate::TypeRegistry).
    #[error("the persisted type name {name:?} is not registered with the type registry")]
    UnknownType {
        /// The persisted type name.
        name: String,
    },

    /// A type or a type name was registered twice.
    #[error("the type name {name:?} or its type is already registered")]
    DuplicateType {
        /// The persisted type name that was registered twice.
        name: String,
    },

    /// Encoding or decoding a payload failed.
    #[error("codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// The session timeout cannot be represented as a point in time.
    #[error("the session timeout is out of range")]
    TimeoutOutOfRange,

    /// The session store was closed.
    #[error("the session store is closed")]
    StoreClosed,

    /// An I/O error occurred in a file-based store.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// The remote key-value backend reported an error.
    #[error("remote session store error: {0}")]
    Remote(#[source] anyhow::Error),
}

impl Error {
    /// Returns true if this error means that the session does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound)
    }
}

mod expect_impl_error {
    trait ExpectImplError: std::error::Error + Send + Sync + 'static {}

    impl ExpectImplError for super::Error {}
}
