//! Client resubscription across a server restart.

use std::sync::Arc;

use confr::ConnectionState;
use confr::MemoryStore;

use crate::commons::start_client;
use crate::commons::start_server;
use crate::commons::wait_for_value;
use crate::enable_logger;

#[tokio::test]
async fn client_rewatches_after_server_restart() {
    enable_logger();
    let store = Arc::new(MemoryStore::new());
    store.put("a", "1");
    store.put("b", "2");
    let mut server = start_server(store.clone(), 0).await;
    let port = server.local_addr().unwrap().port();

    let client = start_client(port, &["a", "b"]).await;
    wait_for_value(&client, "a", "1").await;
    wait_for_value(&client, "b", "2").await;
    let session_id = client.session_id().to_string();

    server.shutdown().await.unwrap();
    store.put("a", "10");

    let mut restarted = start_server(store.clone(), port).await;
    wait_for_value(&client, "a", "10").await;
    wait_for_value(&client, "b", "2").await;

    assert_eq!(client.session_id(), session_id);
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    assert_eq!(restarted.watcher_count(), 2);

    store.put("b", "20");
    wait_for_value(&client, "b", "20").await;

    client.shutdown().await.unwrap();
    restarted.shutdown().await.unwrap();
}
