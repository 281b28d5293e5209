//! Request-scoped context.
//!
//! A [`RequestContext`] carries the values resolved for one request (the session, the user principal and the
//! trace id) on top of a base context that decides cancellation and deadline.
//! Contexts are immutable: [`RequestContext::with_value`] returns a child that shares everything with its
//! parent and adds one layer, so attaching a value never affects another holder of the parent.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use web_session::context::{get_session, CancelContext, ContextKey, RequestContext};
//! use web_session::Session;
//!
//! let cancel = CancelContext::new();
//! let ctx = RequestContext::new(cancel.clone()).with_trace_id("trace-1");
//! let with_session = ctx.with_session(Arc::new(Session::new("abc")));
//!
//! assert!(get_session(&ctx).is_none());
//! assert_eq!(get_session(&with_session).unwrap().id(), "abc");
//! assert_eq!(with_session.trace_id().as_deref(), Some("trace-1"));
//!
//! cancel.cancel();
//! assert!(with_session.value(ContextKey::Session).is_some());
//! assert!(web_session::context::BaseContext::err(&with_session).is_some());
//! ```

use crate::{Session, UserPrincipal};
use async_std::channel::{self, Receiver, Sender};
use async_std::future;
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// The well-known keys of a [`RequestContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    /// The session of the request.
    Session,
    /// The authenticated user.
    UserPrincipal,
    /// The id correlating all log lines of the request.
    TraceId,
}

/// A value attached to a [`RequestContext`].
#[derive(Debug, Clone)]
pub enum ContextValue {
    /// The session of the request.
    Session(Arc<Session>),
    /// The authenticated user.
    UserPrincipal(Arc<UserPrincipal>),
    /// The id correlating all log lines of the request.
    TraceId(Arc<str>),
}

impl ContextValue {
    /// The key this value is stored under.
    pub fn key(&self) -> ContextKey {
        match self {
            Self::Session(_) => ContextKey::Session,
            Self::UserPrincipal(_) => ContextKey::UserPrincipal,
            Self::TraceId(_) => ContextKey::TraceId,
        }
    }
}

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    /// The context was cancelled.
    #[error("context cancelled")]
    Cancelled,
    /// The deadline of the context has passed.
    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation, deadline and values of a request.
#[async_trait]
pub trait BaseContext: Debug + Send + Sync {
    /// The point in time at which the context is done, if there is one.
    fn deadline(&self) -> Option<Instant>;

    /// Returns why the context is done, or `None` while it is not.
    fn err(&self) -> Option<ContextError>;

    /// Resolves once the context is done.
    async fn done(&self);

    /// Look up a value.
    fn value(&self, _key: ContextKey) -> Option<ContextValue> {
        None
    }
}

/// A context that is never done and holds no values.
#[derive(Debug, Default, Clone, Copy)]
pub struct Background;

#[async_trait]
impl BaseContext for Background {
    fn deadline(&self) -> Option<Instant> {
        None
    }

    fn err(&self) -> Option<ContextError> {
        None
    }

    async fn done(&self) {
        future::pending::<()>().await
    }
}

/// A context that is done once [`CancelContext::cancel`] is called, or once its deadline passes.
/// Clones share the same state.
#[derive(Debug, Clone)]
pub struct CancelContext {
    shared: Arc<CancelState>,
}

#[derive(Debug)]
struct CancelState {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    /// Closed on cancellation, which wakes every receiver.
    signal: Sender<()>,
    cancelled_signal: Receiver<()>,
}

impl CancelContext {
    /// A context without deadline.
    pub fn new() -> Self {
        Self::with_optional_deadline(None)
    }

    /// A context that is done at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::with_optional_deadline(Some(deadline))
    }

    /// A context that is done `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_optional_deadline(Instant::now().checked_add(timeout))
    }

    fn with_optional_deadline(deadline: Option<Instant>) -> Self {
        let (signal, cancelled_signal) = channel::bounded(1);
        Self {
            shared: Arc::new(CancelState {
                cancelled: AtomicBool::new(false),
                deadline,
                signal,
                cancelled_signal,
            }),
        }
    }

    /// Cancel the context. Cancelling again has no effect.
    pub fn cancel(&self) {
        self.shared.cancelled.store(true, Ordering::Release);
        self.shared.signal.close();
    }
}

impl Default for CancelContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BaseContext for CancelContext {
    fn deadline(&self) -> Option<Instant> {
        self.shared.deadline
    }

    fn err(&self) -> Option<ContextError> {
        if self.shared.cancelled.load(Ordering::Acquire) {
            Some(ContextError::Cancelled)
        } else if self
            .shared
            .deadline
            .is_some_and(|deadline| deadline <= Instant::now())
        {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    async fn done(&self) {
        let cancelled = self.shared.cancelled_signal.recv();
        match self.shared.deadline {
            Some(deadline) => {
                let remaining = deadline.saturating_duration_since(Instant::now());
                // Either outcome means done.
                let _ = future::timeout(remaining, cancelled).await;
            }
            None => {
                let _ = cancelled.await;
            }
        }
    }
}

/// The context of one request: a base context plus the values attached to it.
///
/// Cloning is cheap. Lookups check the attached values from the most recent one backwards,
/// and then ask the base, so a `RequestContext` can itself be the base of another one.
#[derive(Clone)]
pub struct RequestContext {
    base: Arc<dyn BaseContext>,
    layer: Option<Arc<Layer>>,
}

struct Layer {
    value: ContextValue,
    parent: Option<Arc<Layer>>,
}

impl RequestContext {
    /// An empty context over `base`.
    pub fn new(base: impl BaseContext + 'static) -> Self {
        Self::from_base(Arc::new(base))
    }

    /// An empty context over a shared `base`.
    pub fn from_base(base: Arc<dyn BaseContext>) -> Self {
        Self { base, layer: None }
    }

    /// An empty context that is never done.
    pub fn background() -> Self {
        Self::new(Background)
    }

    /// Returns a child context that holds `value`, shadowing any value under the same key.
    /// `self` is not changed.
    pub fn with_value(&self, value: ContextValue) -> Self {
        Self {
            base: Arc::clone(&self.base),
            layer: Some(Arc::new(Layer {
                value,
                parent: self.layer.clone(),
            })),
        }
    }

    /// Returns a child context holding `session`.
    pub fn with_session(&self, session: Arc<Session>) -> Self {
        self.with_value(ContextValue::Session(session))
    }

    /// Returns a child context holding `principal`.
    pub fn with_principal(&self, principal: Arc<UserPrincipal>) -> Self {
        self.with_value(ContextValue::UserPrincipal(principal))
    }

    /// Returns a child context holding `trace_id`.
    pub fn with_trace_id(&self, trace_id: impl Into<Arc<str>>) -> Self {
        self.with_value(ContextValue::TraceId(trace_id.into()))
    }

    /// Look up the value under `key`, first in this context, then in its base.
    pub fn value(&self, key: ContextKey) -> Option<ContextValue> {
        let mut layer = self.layer.as_deref();
        while let Some(current) = layer {
            if current.value.key() == key {
                return Some(current.value.clone());
            }
            layer = current.parent.as_deref();
        }
        self.base.value(key)
    }

    /// The session of the request.
    pub fn session(&self) -> Option<Arc<Session>> {
        match self.value(ContextKey::Session)? {
            ContextValue::Session(session) => Some(session),
            _ => None,
        }
    }

    /// The authenticated user of the request.
    pub fn principal(&self) -> Option<Arc<UserPrincipal>> {
        match self.value(ContextKey::UserPrincipal)? {
            ContextValue::UserPrincipal(principal) => Some(principal),
            _ => None,
        }
    }

    /// The trace id of the request.
    pub fn trace_id(&self) -> Option<Arc<str>> {
        match self.value(ContextKey::TraceId)? {
            ContextValue::TraceId(trace_id) => Some(trace_id),
            _ => None,
        }
    }

    /// The trace id of the request, or an empty string, for log lines.
    pub(crate) fn trace_id_for_log(&self) -> Arc<str> {
        self.trace_id().unwrap_or_else(|| Arc::from(""))
    }
}

#[async_trait]
impl BaseContext for RequestContext {
    fn deadline(&self) -> Option<Instant> {
        self.base.deadline()
    }

    fn err(&self) -> Option<ContextError> {
        self.base.err()
    }

    async fn done(&self) {
        self.base.done().await
    }

    fn value(&self, key: ContextKey) -> Option<ContextValue> {
        RequestContext::value(self, key)
    }
}

impl Debug for RequestContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let mut keys = Vec::new();
        let mut layer = self.layer.as_deref();
        while let Some(current) = layer {
            keys.push(current.value.key());
            layer = current.parent.as_deref();
        }
        f.debug_struct("RequestContext")
            .field("base", &self.base)
            .field("keys", &keys)
            .finish()
    }
}

/// Returns the session that the session middleware attached to `ctx`.
///
/// `None` means that no session middleware runs upstream, which is a configuration error.
pub fn get_session(ctx: &RequestContext) -> Option<Arc<Session>> {
    ctx.session()
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_std::task;

    #[test]
    fn child_shadows_without_touching_parent() {
        let parent = RequestContext::background().with_trace_id("parent");
        let child = parent.with_trace_id("child");
        assert_eq!(parent.trace_id().as_deref(), Some("parent"));
        assert_eq!(child.trace_id().as_deref(), Some("child"));
    }

    #[test]
    fn nested_contexts_fall_back_to_their_base() {
        let principal = Arc::new(UserPrincipal {
            id: "42".to_string(),
            ..Default::default()
        });
        let outer = RequestContext::background().with_principal(Arc::clone(&principal));
        let inner = RequestContext::new(outer.clone()).with_trace_id("t");
        let innermost = RequestContext::new(inner);
        assert_eq!(innermost.principal().unwrap().id, "42");
        assert_eq!(innermost.trace_id().as_deref(), Some("t"));
        assert!(innermost.session().is_none());
    }

    #[async_std::test]
    async fn cancellation_reaches_wrapping_contexts() {
        let cancel = CancelContext::new();
        let ctx = RequestContext::new(RequestContext::new(cancel.clone()));
        assert_eq!(BaseContext::err(&ctx), None);

        let waiter = {
            let ctx = ctx.clone();
            task::spawn(async move { ctx.done().await })
        };
        cancel.cancel();
        cancel.cancel();
        waiter.await;
        assert_eq!(BaseContext::err(&ctx), Some(ContextError::Cancelled));
    }

    #[async_std::test]
    async fn deadline_makes_context_done() {
        let ctx = RequestContext::new(CancelContext::with_timeout(Duration::from_millis(20)));
        assert!(BaseContext::deadline(&ctx).is_some());
        ctx.done().await;
        assert_eq!(BaseContext::err(&ctx), Some(ContextError::DeadlineExceeded));
    }
}
