use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;

use super::*;

fn open_temp_store() -> (tempfile::TempDir, SledStore) {
    let dir = tempfile::tempdir().unwrap();
    let store = SledStore::open(dir.path().join("db"), "confr_test").unwrap();
    (dir, store)
}

#[tokio::test]
async fn read_reflects_put_and_delete() {
    let (_dir, store) = open_temp_store();

    assert_eq!(store.read("db.host").await.unwrap(), None);
    store.put("db.host", "10.0.0.1").unwrap();
    assert_eq!(store.read("db.host").await.unwrap().as_deref(), Some("10.0.0.1"));
    store.delete("db.host").unwrap();
    assert_eq!(store.read("db.host").await.unwrap(), None);
}

#[tokio::test]
async fn subscription_filters_prefix_matches_down_to_the_exact_key() {
    let (_dir, store) = open_temp_store();
    let (tx, mut rx) = mpsc::unbounded_channel();
    store.subscribe("db", tx).await.unwrap();

    store.put("db.host", "ignored").unwrap();
    store.put("db", "primary").unwrap();
    store.delete("db").unwrap();

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, StoreEvent {
        key: "db".to_string(),
        value: Some("primary".to_string()),
    });
    let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second.value, None);
}

#[tokio::test]
async fn unsubscribe_stops_the_watcher_thread() {
    let (_dir, store) = open_temp_store();
    let (tx, mut rx) = mpsc::unbounded_channel();
    store.subscribe("k", tx).await.unwrap();
    assert_eq!(store.subscription_count(), 1);

    store.unsubscribe("k").await.unwrap();
    assert_eq!(store.subscription_count(), 0);

    // The watcher thread drops its sender once it observes cancellation.
    let closed = timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Some(_) => continue,
                None => break,
            }
        }
    })
    .await;
    assert!(closed.is_ok());
}

#[tokio::test]
async fn subscribing_a_closed_sink_fails() {
    let (_dir, store) = open_temp_store();
    let (tx, rx) = mpsc::unbounded_channel();
    drop(rx);

    let result = store.subscribe("db.host", tx).await;

    assert!(matches!(
        result,
        Err(crate::Error::Store(crate::StoreError::Subscribe { .. }))
    ));
}
