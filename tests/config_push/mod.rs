//! Watch then push, end to end over TCP.

use std::sync::Arc;

use confr::MemoryStore;

use crate::commons::start_client;
use crate::commons::start_server;
use crate::commons::wait_for_value;
use crate::enable_logger;

#[tokio::test]
async fn absent_key_reads_empty_then_follows_store_updates() {
    enable_logger();
    let store = Arc::new(MemoryStore::new());
    let mut server = start_server(store.clone(), 0).await;
    let port = server.local_addr().unwrap().port();
    let client = start_client(port, &[]).await;

    assert_eq!(client.watch_config("db.host").await.unwrap(), "");

    store.put("db.host", "10.0.0.1");
    wait_for_value(&client, "db.host", "10.0.0.1").await;

    store.delete("db.host");
    wait_for_value(&client, "db.host", "").await;

    client.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn one_store_subscription_serves_every_client() {
    enable_logger();
    let store = Arc::new(MemoryStore::new());
    store.put("feature.flag", "off");
    let mut server = start_server(store.clone(), 0).await;
    let port = server.local_addr().unwrap().port();
    let first = start_client(port, &[]).await;
    let second = start_client(port, &[]).await;

    assert_eq!(first.watch_config("feature.flag").await.unwrap(), "off");
    assert_eq!(second.watch_config("feature.flag").await.unwrap(), "off");
    assert_eq!(store.subscription_count(), 1);
    assert_eq!(server.watcher_count(), 1);

    store.put("feature.flag", "on");
    wait_for_value(&first, "feature.flag", "on").await;
    wait_for_value(&second, "feature.flag", "on").await;

    first.shutdown().await.unwrap();
    second.shutdown().await.unwrap();
    server.shutdown().await.unwrap();
    assert_eq!(store.subscription_count(), 0);
}

#[tokio::test]
async fn client_departure_releases_the_store_subscription() {
    enable_logger();
    let store = Arc::new(MemoryStore::new());
    let mut server = start_server(store.clone(), 0).await;
    let port = server.local_addr().unwrap().port();
    let client = start_client(port, &[]).await;
    client.watch_config("k").await.unwrap();
    assert!(store.is_subscribed("k"));

    client.shutdown().await.unwrap();

    let released = tokio::time::timeout(std::time::Duration::from_secs(2), async {
        while store.is_subscribed("k") {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(released.is_ok(), "subscription should be cancelled");
    server.shutdown().await.unwrap();
}
