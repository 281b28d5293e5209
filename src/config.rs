use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Settings of a [`SessionManager`](crate::SessionManager) and the stores it drives.
///
/// Missing fields take their default, so a partial configuration deserializes fine.
///
/// ```
/// use std::time::Duration;
/// use web_session::SessionConfig;
///
/// let config = SessionConfig::default();
/// assert_eq!(config.cookie_name, "_SESS_ID");
/// assert_eq!(config.cookie_max_age(), Duration::from_secs(24 * 60 * 60));
/// assert_eq!(config.gc_interval(), web_session::DEFAULT_GC_INTERVAL);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// The name of the session cookie.
    pub cookie_name: String,
    /// The max-age of the session cookie, in seconds.
    pub cookie_max_age_secs: u64,
    /// The path of the session cookie.
    pub cookie_path: String,
    /// How long a session lives after it was last saved, in seconds.
    pub session_timeout_secs: u64,
    /// The interval between garbage collection sweeps of local stores, in seconds.
    /// Taken by [`MemoryStore::from_config`](crate::MemoryStore::from_config) and
    /// [`FileStore::open_with_config`](crate::FileStore::open_with_config).
    pub gc_interval_secs: u64,
}

impl SessionConfig {
    /// The max-age of the session cookie.
    pub fn cookie_max_age(&self) -> Duration {
        Duration::from_secs(self.cookie_max_age_secs)
    }

    /// How long a session lives after it was last saved.
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    /// The interval between garbage collection sweeps of local stores.
    /// Zero means [`DEFAULT_GC_INTERVAL`](crate::DEFAULT_GC_INTERVAL).
    pub fn gc_interval(&self) -> Duration {
        match self.gc_interval_secs {
            0 => crate::DEFAULT_GC_INTERVAL,
            secs => Duration::from_secs(secs),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            cookie_name: "_SESS_ID".to_string(),
            cookie_max_age_secs: 24 * 60 * 60,
            cookie_path: "/".to_string(),
            session_timeout_secs: 30 * 60,
            gc_interval_secs: crate::DEFAULT_GC_INTERVAL.as_secs(),
        }
    }
}
