#![allow(dead_code)]

use async_std::task;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use web_session::{
    DefaultSessionIdGenerator, Error, Session, SessionIdGenerator, SessionStore, TypeRegistry,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestObj {
    pub id: i32,
    pub name: String,
}

pub fn registry() -> Arc<TypeRegistry> {
    let mut registry = TypeRegistry::with_builtin_types();
    registry.register::<TestObj>("test_obj").unwrap();
    Arc::new(registry)
}

pub fn new_session() -> Arc<Session> {
    Arc::new(Session::new(DefaultSessionIdGenerator.generate()))
}

pub fn assert_not_found(result: web_session::Result<Arc<Session>>) {
    match result {
        Err(Error::SessionNotFound) => {}
        other => panic!("expected SessionNotFound, got {other:?}"),
    }
}

/// Save, load, and let the session expire.
pub async fn basic_lifecycle(store: &impl SessionStore) {
    let session = new_session();
    session.set_value("key1", "value1".to_string());
    session.set_value(
        "key2",
        TestObj {
            id: 123,
            name: "abc".to_string(),
        },
    );
    assert!(session.need_save());

    store
        .save(&session, Duration::from_millis(50))
        .await
        .unwrap();
    let loaded = store.get(session.id()).await.unwrap();
    assert!(!loaded.need_save());
    assert_eq!(loaded.get::<String>("key1").unwrap().as_str(), "value1");
    assert_eq!(
        *loaded.get::<TestObj>("key2").unwrap(),
        TestObj {
            id: 123,
            name: "abc".to_string()
        }
    );

    task::sleep(Duration::from_millis(60)).await;
    assert_not_found(store.get(session.id()).await);
}

/// A saved session that is invalidated and saved again is gone for good.
pub async fn explicit_logout(store: &impl SessionStore) {
    let session = new_session();
    session.set_value("user", "alice".to_string());
    store.save(&session, Duration::from_secs(60)).await.unwrap();
    assert!(store.get(session.id()).await.is_ok());

    session.invalidate();
    store.save(&session, Duration::from_secs(60)).await.unwrap();
    assert_not_found(store.get(session.id()).await);

    // Saving the invalidated session again must not bring it back.
    store.save(&session, Duration::from_secs(60)).await.unwrap();
    assert_not_found(store.get(session.id()).await);
}

/// Invalidating a session that was never saved is not an error.
pub async fn logout_of_unsaved_session(store: &impl SessionStore) {
    let session = new_session();
    session.invalidate();
    store.save(&session, Duration::from_secs(60)).await.unwrap();
    assert_not_found(store.get(session.id()).await);
}

/// A flash value survives one save and is read exactly once after reloading.
pub async fn flash_value(store: &impl SessionStore) {
    let session = new_session();
    session.set_value("msg", "hi".to_string());
    store.save(&session, Duration::from_secs(60)).await.unwrap();

    let loaded = store.get(session.id()).await.unwrap();
    assert!(!loaded.need_save());
    let flash = loaded.take_flash_value("msg").unwrap();
    assert_eq!(flash.downcast_ref::<String>().unwrap(), "hi");
    assert!(loaded.need_save());
    assert!(loaded.take_flash_value("msg").is_none());
}

/// Saving again before expiry slides the expiry forward.
pub async fn sliding_expiration(store: &impl SessionStore) {
    let session = new_session();
    session.set_value("key", 1u64);
    store
        .save(&session, Duration::from_millis(300))
        .await
        .unwrap();
    task::sleep(Duration::from_millis(200)).await;
    store
        .save(&session, Duration::from_millis(300))
        .await
        .unwrap();
    task::sleep(Duration::from_millis(200)).await;

    // 400ms after the first save, 200ms after the second one.
    let loaded = store.get(session.id()).await.unwrap();
    assert_eq!(*loaded.get::<u64>("key").unwrap(), 1);
}

/// Saving clears the dirty flag, mutating sets it again.
pub async fn dirty_flag_discipline(store: &impl SessionStore) {
    let session = new_session();
    assert!(!session.need_save());
    session.set_value("a", 1i64);
    assert!(session.need_save());
    store.save(&session, Duration::from_secs(60)).await.unwrap();
    assert!(!session.need_save());

    let loaded = store.get(session.id()).await.unwrap();
    assert!(!loaded.need_save());
    assert!(loaded.take_flash_value("missing").is_none());
    assert!(!loaded.need_save());
    loaded.set_value("b", 2i64);
    assert!(loaded.need_save());
}

/// Loading an id that was never saved.
pub async fn unknown_id(store: &impl SessionStore) {
    assert_not_found(store.get("never-saved").await);
}

/// After closing, the store refuses to work, and closing again is harmless.
pub async fn close_is_idempotent(store: &impl SessionStore) {
    store.close().await;
    store.close().await;
    let session = new_session();
    assert!(matches!(
        store.save(&session, Duration::from_secs(60)).await,
        Err(Error::StoreClosed)
    ));
    assert!(matches!(
        store.get(session.id()).await,
        Err(Error::StoreClosed)
    ));
}

/// Copies of a session that were loaded before the logout cannot bring it back.
pub async fn stale_save_after_logout(store: &impl SessionStore) {
    let session = new_session();
    session.set_value("user", "alice".to_string());
    store.save(&session, Duration::from_secs(60)).await.unwrap();

    let first_tab = store.get(session.id()).await.unwrap();
    let second_tab = store.get(session.id()).await.unwrap();
    let in_flight = Arc::new(Session::new(session.id()));
    in_flight.set_value("user", "alice".to_string());

    first_tab.invalidate();
    store.save(&first_tab, Duration::from_secs(60)).await.unwrap();

    second_tab.set_value("page", "settings".to_string());
    store
        .save(&second_tab, Duration::from_secs(60))
        .await
        .unwrap();
    store
        .save(&in_flight, Duration::from_secs(60))
        .await
        .unwrap();
    assert_not_found(store.get(session.id()).await);
}
