use crate::gc::{Collector, Sweep, DEFAULT_GC_INTERVAL};
use crate::session_id::is_valid_session_id;
use crate::session_store::{expiration_after, is_expired, KeyLocks};
use crate::{Error, Result, Session, SessionConfig, SessionStore, TypeRegistry};
use async_std::fs;
use async_std::prelude::*;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// # file-based session store
///
/// Every session is written to its own file inside one directory, named exactly like the session id.
/// The file holds the serialized session data together with its expiry,
/// since the file system does not expire anything by itself.
/// Expired files are removed by a background worker every [`DEFAULT_GC_INTERVAL`],
/// or the interval given to [`FileStore::open_with_gc_interval`].
///
/// Files are replaced as a whole: a save writes a temporary file next to the session file
/// and renames it over the old one, so a concurrent read never sees a partially written file.
/// Temporary files left behind by a crash are removed by the collector once they are older than one interval.
///
/// Saving an invalidated session replaces its file with a tombstone that lives for the given timeout.
/// While it lives, the id is reported as missing and saves of other copies of the session are ignored,
/// so a request that loaded the session before the logout cannot bring it back.
///
/// All value types stored in sessions must be registered with the [`TypeRegistry`] the store is opened with.
#[derive(Debug)]
pub struct FileStore {
    inner: Arc<FileStoreInner>,
    collector: Collector,
    closed: AtomicBool,
}

#[derive(Debug)]
struct FileStoreInner {
    directory: PathBuf,
    registry: Arc<TypeRegistry>,
    /// Guards a session file while it is checked, replaced or removed.
    path_locks: KeyLocks,
    /// Temporary files older than this are leftovers and may be removed.
    stale_temporary_age: Duration,
}

/// The content of a session file.
#[derive(Debug, Serialize, Deserialize)]
struct FileSessionItem {
    data: Vec<u8>,
    expiration: DateTime<Utc>,
    /// A tombstone of an invalidated session, `data` is empty.
    invalidated: bool,
}

impl FileStore {
    /// Open a store over an existing directory.
    ///
    /// Fails with [`Error::Io`] if the directory cannot be inspected,
    /// and with [`Error::DirectoryRequired`] if the path is not a directory.
    pub async fn open(directory: impl Into<PathBuf>, registry: Arc<TypeRegistry>) -> Result<Self> {
        Self::open_with_gc_interval(directory, registry, DEFAULT_GC_INTERVAL).await
    }

    /// Like [`FileStore::open`], removing expired session files every [`SessionConfig::gc_interval`].
    pub async fn open_with_config(
        directory: impl Into<PathBuf>,
        registry: Arc<TypeRegistry>,
        config: &SessionConfig,
    ) -> Result<Self> {
        Self::open_with_gc_interval(directory, registry, config.gc_interval()).await
    }

    /// Like [`FileStore::open`], removing expired session files every `gc_interval`.
    pub async fn open_with_gc_interval(
        directory: impl Into<PathBuf>,
        registry: Arc<TypeRegistry>,
        gc_interval: Duration,
    ) -> Result<Self> {
        let directory = directory.into();
        let metadata = fs::metadata(async_path(&directory)).await?;
        if !metadata.is_dir() {
            return Err(Error::DirectoryRequired { path: directory });
        }

        let inner = Arc::new(FileStoreInner {
            directory,
            registry,
            path_locks: KeyLocks::new(),
            stale_temporary_age: gc_interval,
        });
        let collector = Collector::spawn(Arc::clone(&inner), gc_interval);
        Ok(Self {
            inner,
            collector,
            closed: AtomicBool::new(false),
        })
    }

    /// The directory holding the session files.
    pub fn directory(&self) -> &Path {
        &self.inner.directory
    }

    /// Performs one garbage collection sweep and returns the number of removed session files.
    /// Stale temporary files are removed too, but not counted.
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

#[async_trait]
impl SessionStore for FileStore {
    async fn save(&self, session: &Arc<Session>, timeout: Duration) -> Result {
        self.ensure_open()?;
        let id = session.id();
        let path = self.inner.session_path(id)?;
        let expiration = expiration_after(Utc::now(), timeout)?;
        let _guard = self.inner.path_locks.lock_for(id).lock().await;

        if !session.is_valid() {
            let tombstone = FileSessionItem {
                data: Vec::new(),
                expiration,
                invalidated: true,
            };
            match self.inner.write_item(id, &path, &tombstone).await {
                Ok(()) => log::debug!("session {id} invalidated"),
                Err(error) => log::warn!("failed to invalidate session file {path:?}: {error}"),
            }
            return Ok(());
        }

        if let Ok(existing) = self.inner.read_item(&path).await {
            if existing.invalidated && !is_expired(existing.expiration, Utc::now()) {
                log::debug!("refusing to save session {id} which was invalidated");
                return Ok(());
            }
        }

        // Taken under the path lock, so the file never goes back to an older snapshot.
        let (data, version) = session.snapshot(&self.inner.registry)?;
        let item = FileSessionItem {
            data,
            expiration,
            invalidated: false,
        };
        self.inner.write_item(id, &path, &item).await?;
        session.mark_saved(version);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Arc<Session>> {
        self.ensure_open()?;
        let Ok(path) = self.inner.session_path(id) else {
            return Err(Error::SessionNotFound);
        };

        let item = match self.inner.read_item(&path).await {
            Ok(item) => item,
            Err(Error::BadSessionFile { path, source }) => {
                log::warn!("bad session file {path:?}, treating it as missing: {source}");
                return Err(Error::SessionNotFound);
            }
            Err(error) => return Err(error),
        };
        if item.invalidated || is_expired(item.expiration, Utc::now()) {
            return Err(Error::SessionNotFound);
        }

        match Session::from_bytes(id, &item.data, &self.inner.registry) {
            Ok(session) => Ok(Arc::new(session)),
            Err(error) => {
                log::warn!("data of session file {path:?} cannot be decoded, treating it as missing: {error}");
                Err(Error::SessionNotFound)
            }
        }
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.collector.stop().await;
    }
}

impl FileStoreInner {
    fn session_path(&self, id: &str) -> Result<PathBuf> {
        if is_valid_session_id(id) {
            Ok(self.directory.join(id))
        } else {
            Err(Error::InvalidSessionId { id: id.to_owned() })
        }
    }

    /// Replace the file at `path` with `item`. The caller holds the path lock of `id`.
    async fn write_item(&self, id: &str, path: &Path, item: &FileSessionItem) -> Result {
        let bytes = bincode::serialize(item)?;
        let temporary = self
            .directory
            .join(format!(".{id}.{:016x}.tmp", rand::random::<u64>()));
        if let Err(error) = replace_file(&temporary, path, &bytes).await {
            if let Err(cleanup_error) = fs::remove_file(async_path(&temporary)).await {
                log::debug!("failed to remove temporary file {temporary:?}: {cleanup_error}");
            }
            return Err(error.into());
        }
        Ok(())
    }

    /// Read and decode one session file.
    /// A missing file is [`Error::SessionNotFound`], an undecodable one [`Error::BadSessionFile`].
    async fn read_item(&self, path: &Path) -> Result<FileSessionItem> {
        let metadata = match fs::metadata(async_path(path)).await {
            Ok(metadata) => metadata,
            Err(error) if error.kind() == ErrorKind::NotFound => return Err(Error::SessionNotFound),
            Err(error) => return Err(error.into()),
        };
        if metadata.is_dir() {
            return Err(Error::FileRequired {
                path: path.to_owned(),
            });
        }

        let bytes = match fs::read(async_path(path)).await {
            Ok(bytes) => bytes,
            Err(error) if error.kind() == ErrorKind::NotFound => return Err(Error::SessionNotFound),
            Err(error) => return Err(error.into()),
        };
        bincode::deserialize(&bytes).map_err(|source| Error::BadSessionFile {
            path: path.to_owned(),
            source,
        })
    }

    /// Remove all expired session files and tombstones, and stale temporary files.
    /// Session files that cannot be read or decoded are skipped.
    async fn cleanup(&self) -> usize {
        let mut entries = match fs::read_dir(async_path(&self.directory)).await {
            Ok(entries) => entries,
            Err(error) => {
                log::error!(
                    "failed to run garbage collection on session directory {:?}: {error}",
                    self.directory
                );
                return 0;
            }
        };

        let now = Utc::now();
        let mut removed = 0;
        while let Some(entry) = entries.next().await {
            let entry = match entry {
                Ok(entry) => entry,
                Err(error) => {
                    log::debug!("skipping unreadable directory entry: {error}");
                    continue;
                }
            };
            let file_name = entry.file_name();
            let Some(name) = file_name.to_str() else {
                continue;
            };
            if is_temporary_file_name(name) {
                self.remove_if_stale(&self.directory.join(name)).await;
                continue;
            }
            if !is_valid_session_id(name) {
                continue;
            }
            if self.remove_if_expired(name, now).await {
                removed += 1;
            }
        }
        log::trace!("deleted {removed} expired session files");
        removed
    }

    async fn remove_if_expired(&self, id: &str, now: DateTime<Utc>) -> bool {
        let path = self.directory.join(id);
        let _guard = self.path_locks.lock_for(id).lock().await;
        match self.read_item(&path).await {
            Ok(item) if is_expired(item.expiration, now) => {
                match fs::remove_file(async_path(&path)).await {
                    Ok(()) => {
                        log::debug!("session file {path:?} expired, removed by garbage collector");
                        true
                    }
                    Err(error) => {
                        log::debug!("failed to remove expired session file {path:?}: {error}");
                        false
                    }
                }
            }
            Ok(_) => false,
            Err(error) => {
                log::debug!("skipping session file {path:?}: {error}");
                false
            }
        }
    }

    /// Remove a temporary file that was not modified for longer than one collection interval.
    async fn remove_if_stale(&self, path: &Path) {
        let modified = fs::metadata(async_path(path))
            .await
            .and_then(|metadata| metadata.modified());
        let age = match modified {
            Ok(modified) => modified.elapsed().unwrap_or_default(),
            Err(error) => {
                log::debug!("skipping temporary file {path:?}: {error}");
                return;
            }
        };
        if age <= self.stale_temporary_age {
            return;
        }
        match fs::remove_file(async_path(path)).await {
            Ok(()) => log::debug!("stale temporary file {path:?} removed by garbage collector"),
            Err(error) => log::debug!("failed to remove stale temporary file {path:?}: {error}"),
        }
    }
}

#[async_trait]
impl Sweep for FileStoreInner {
    async fn sweep(&self) {
        self.cleanup().await;
    }
}

async fn replace_file(temporary: &Path, path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    fs::write(async_path(temporary), bytes).await?;
    fs::rename(async_path(temporary), async_path(path)).await
}

fn is_temporary_file_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

fn async_path(path: &Path) -> &async_std::path::Path {
    async_std::path::Path::new(path.as_os_str())
}
