use crate::context::RequestContext;
use crate::session_id::{DefaultSessionIdGenerator, SessionIdGenerator};
use crate::{Error, Result, Session, SessionConfig, SessionStore};
use std::sync::Arc;
use std::time::Duration;

/// Drives the session lifecycle of requests.
///
/// This is the middleware-facing side of a [`SessionStore`]:
/// at the start of a request, [`SessionManager::begin`] resolves the session cookie into a session
/// and attaches it to the request context, and at the end of the request,
/// [`SessionManager::finish`] saves the session if it was changed.
///
/// # Example
///
/// ```
/// use web_session::context::{get_session, RequestContext};
/// use web_session::{MemoryStore, SessionConfig, SessionManager};
///
/// # fn main() -> web_session::Result { async_std::task::block_on(async {
/// let manager = SessionManager::new(MemoryStore::new(), SessionConfig::default());
///
/// // First request: no cookie, so a new session is created and a cookie has to be set.
/// let (ctx, cookie) = manager.begin(&RequestContext::background(), None).await?;
/// let cookie = cookie.expect("new sessions set a cookie");
/// get_session(&ctx).unwrap().set_value("visits", 1u64);
/// manager.finish(&ctx).await;
///
/// // Second request: the cookie resolves to the stored session.
/// let (ctx, cookie2) = manager.begin(&RequestContext::background(), Some(cookie.value.as_str())).await?;
/// assert!(cookie2.is_none());
/// assert_eq!(*get_session(&ctx).unwrap().get::<u64>("visits").unwrap(), 1);
/// # manager.close().await;
/// # Ok(()) }) }
/// ```
#[derive(Debug)]
pub struct SessionManager<Store, Generator = DefaultSessionIdGenerator> {
    store: Store,
    generator: Generator,
    config: SessionConfig,
}

/// Indicates that the client's session cookie has to be set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionCookie {
    /// The name of the session cookie.
    pub name: String,
    /// The value of the session cookie, i.e. the session id.
    pub value: String,
    /// How long the client should keep the cookie.
    pub max_age: Duration,
    /// The path of the cookie.
    pub path: String,
}

impl<Store: SessionStore> SessionManager<Store> {
    /// Create a manager that generates session ids with the [`DefaultSessionIdGenerator`].
    pub fn new(store: Store, config: SessionConfig) -> Self {
        Self::with_generator(store, DefaultSessionIdGenerator, config)
    }
}

impl<Store: SessionStore, Generator: SessionIdGenerator> SessionManager<Store, Generator> {
    /// Create a manager with a custom session id generator.
    pub fn with_generator(store: Store, generator: Generator, config: SessionConfig) -> Self {
        Self {
            store,
            generator,
            config,
        }
    }

    /// Resolve the session for a request.
    ///
    /// The `cookie_value` is the value of the session cookie, if the request carries one.
    /// If it does not resolve to a session, a new session is created,
    /// and a [`SessionCookie`] is returned that has to be sent to the client.
    /// Store failures other than a missing session are returned.
    pub async fn load_session(
        &self,
        ctx: &RequestContext,
        cookie_value: Option<&str>,
    ) -> Result<(Arc<Session>, Option<SessionCookie>)> {
        if let Some(cookie_value) = cookie_value {
            match self.store.get(cookie_value).await {
                Ok(session) => return Ok((session, None)),
                Err(Error::SessionNotFound) => {}
                Err(error) => {
                    log::error!(
                        "not able to get session from session store (trace id {}): {error}",
                        ctx.trace_id_for_log()
                    );
                    return Err(error);
                }
            }
        }

        let session = Arc::new(Session::new(self.generator.generate()));
        let cookie = SessionCookie {
            name: self.config.cookie_name.clone(),
            value: session.id().to_owned(),
            max_age: self.config.cookie_max_age(),
            path: self.config.cookie_path.clone(),
        };
        Ok((session, Some(cookie)))
    }

    /// Resolve the session for a request and attach it to a child of `ctx`.
    pub async fn begin(
        &self,
        ctx: &RequestContext,
        cookie_value: Option<&str>,
    ) -> Result<(RequestContext, Option<SessionCookie>)> {
        let (session, cookie) = self.load_session(ctx, cookie_value).await?;
        Ok((ctx.with_session(session), cookie))
    }

    /// Save the session of `ctx` if it needs saving.
    /// Failures are logged, they do not fail the request.
    pub async fn finish(&self, ctx: &RequestContext) {
        let Some(session) = ctx.session() else {
            return;
        };
        if !session.need_save() {
            return;
        }
        if let Err(error) = self
            .store
            .save(&session, self.config.session_timeout())
            .await
        {
            log::error!(
                "not able to save session {} (trace id {}): {error}",
                session.id(),
                ctx.trace_id_for_log()
            );
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns a reference to the session store.
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Consume the manager and return the session store.
    pub fn into_inner(self) -> Store {
        self.store
    }

    /// Close the session store.
    pub async fn close(&self) {
        self.store.close().await
    }
}
