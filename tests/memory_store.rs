mod common;

use async_std::task;
use common::{assert_not_found, new_session};
use std::sync::Arc;
use std::time::Duration;
use web_session::{MemoryStore, Session, SessionConfig, SessionStore};

#[async_std::test]
async fn test_basic_lifecycle() {
    let store = MemoryStore::new();
    common::basic_lifecycle(&store).await;
    store.close().await;
}

#[async_std::test]
async fn test_explicit_logout() {
    let store = MemoryStore::new();
    common::explicit_logout(&store).await;
    common::logout_of_unsaved_session(&store).await;
    store.close().await;
}

#[async_std::test]
async fn test_stale_save_after_logout() {
    let store = MemoryStore::new();
    common::stale_save_after_logout(&store).await;
    store.close().await;
}

#[async_std::test]
async fn test_flash_value() {
    let store = MemoryStore::new();
    common::flash_value(&store).await;
    store.close().await;
}

#[async_std::test]
async fn test_sliding_expiration() {
    let store = MemoryStore::new();
    common::sliding_expiration(&store).await;
    store.close().await;
}

#[async_std::test]
async fn test_dirty_flag_discipline() {
    let store = MemoryStore::new();
    common::dirty_flag_discipline(&store).await;
    common::unknown_id(&store).await;
    store.close().await;
}

#[async_std::test]
async fn test_close_is_idempotent() {
    let store = MemoryStore::new();
    common::close_is_idempotent(&store).await;
}

/// Values that are not registered anywhere can be stored, since the memory store never serializes.
#[async_std::test]
async fn test_unregistered_values_are_fine() {
    struct NotSerializable(u8);

    let store = MemoryStore::new();
    let session = new_session();
    session.set_value("raw", NotSerializable(7));
    store.save(&session, Duration::from_secs(60)).await.unwrap();
    let loaded = store.get(session.id()).await.unwrap();
    assert_eq!(loaded.get::<NotSerializable>("raw").unwrap().0, 7);
    store.close().await;
}

/// Saving a live session only extends its expiry, and every load returns the stored instance.
#[async_std::test]
async fn test_sliding_expiration_keeps_identity() {
    let store = MemoryStore::new();
    let session = new_session();
    session.set_value("key", "original".to_string());
    store
        .save(&session, Duration::from_millis(200))
        .await
        .unwrap();
    let held = store.get(session.id()).await.unwrap();
    assert!(Arc::ptr_eq(&held, &session));

    // Another instance with the same id does not replace the live one.
    let impostor = Arc::new(Session::new(session.id()));
    impostor.set_value("key", "impostor".to_string());
    store
        .save(&impostor, Duration::from_millis(200))
        .await
        .unwrap();
    let loaded = store.get(session.id()).await.unwrap();
    assert!(Arc::ptr_eq(&loaded, &held));
    assert_eq!(loaded.get::<String>("key").unwrap().as_str(), "original");
    assert!(impostor.need_save());

    // The second save extended the expiry.
    task::sleep(Duration::from_millis(120)).await;
    store
        .save(&session, Duration::from_millis(200))
        .await
        .unwrap();
    task::sleep(Duration::from_millis(120)).await;
    assert!(Arc::ptr_eq(&store.get(session.id()).await.unwrap(), &held));
    store.close().await;
}

/// An expired entry is replaced as a whole.
#[async_std::test]
async fn test_expired_entry_is_replaced() {
    let store = MemoryStore::new();
    let first = new_session();
    store.save(&first, Duration::from_millis(10)).await.unwrap();
    task::sleep(Duration::from_millis(30)).await;

    let second = Arc::new(Session::new(first.id()));
    second.set_value("fresh", true);
    store
        .save(&second, Duration::from_secs(60))
        .await
        .unwrap();
    let loaded = store.get(first.id()).await.unwrap();
    assert!(Arc::ptr_eq(&loaded, &second));
    store.close().await;
}

/// A stale instance of a logged-out session cannot bring it back.
#[async_std::test]
async fn test_invalidation_is_not_resurrected() {
    let store = MemoryStore::new();
    let session = new_session();
    store.save(&session, Duration::from_secs(60)).await.unwrap();
    session.invalidate();
    store.save(&session, Duration::from_secs(60)).await.unwrap();

    let stale = Arc::new(Session::new(session.id()));
    stale.set_value("user", "alice".to_string());
    store.save(&stale, Duration::from_secs(60)).await.unwrap();
    assert_not_found(store.get(session.id()).await);
    store.close().await;
}

#[async_std::test]
async fn test_cleanup_removes_only_expired_sessions() {
    let store = MemoryStore::new();
    let short = new_session();
    let long = new_session();
    store.save(&short, Duration::from_millis(10)).await.unwrap();
    store.save(&long, Duration::from_secs(60)).await.unwrap();
    assert_eq!(store.len().await, 2);

    task::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.cleanup().await, 1);
    assert_eq!(store.len().await, 1);
    assert!(store.get(long.id()).await.is_ok());
    assert_eq!(store.cleanup().await, 0);
    store.close().await;
}

#[async_std::test]
async fn test_background_collector_removes_expired_sessions() {
    let store = MemoryStore::with_gc_interval(Duration::from_millis(20));
    let session = new_session();
    store.save(&session, Duration::from_millis(10)).await.unwrap();
    assert!(!store.is_empty().await);

    task::sleep(Duration::from_millis(200)).await;
    assert!(store.is_empty().await);
    store.close().await;
}

#[async_std::test]
async fn test_concurrent_mutation() {
    let store = Arc::new(MemoryStore::new());
    let session = new_session();
    store.save(&session, Duration::from_secs(60)).await.unwrap();

    let handles: Vec<_> = (0..16u64)
        .map(|index| {
            let store = Arc::clone(&store);
            let id = session.id().to_owned();
            task::spawn(async move {
                let session = store.get(&id).await.unwrap();
                session.set_value(format!("key{index}"), index);
                store.save(&session, Duration::from_secs(60)).await.unwrap();
            })
        })
        .collect();
    for handle in handles {
        handle.await;
    }

    let loaded = store.get(session.id()).await.unwrap();
    assert_eq!(loaded.len(), 16);
    for index in 0..16u64 {
        assert_eq!(*loaded.get::<u64>(&format!("key{index}")).unwrap(), index);
    }
    store.close().await;
}

#[async_std::test]
async fn test_clear() {
    let store = MemoryStore::new();
    store
        .save(&new_session(), Duration::from_secs(60))
        .await
        .unwrap();
    store.clear().await;
    assert!(store.is_empty().await);
    store.close().await;
}

#[async_std::test]
async fn test_from_config() {
    let config = SessionConfig {
        gc_interval_secs: 1,
        ..Default::default()
    };
    let store = MemoryStore::from_config(&config);
    store
        .save(&new_session(), Duration::from_millis(10))
        .await
        .unwrap();

    task::sleep(Duration::from_millis(1300)).await;
    assert!(store.is_empty().await);
    store.close().await;
}
