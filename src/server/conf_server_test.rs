use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::BufMut;
use bytes::BytesMut;
use futures::SinkExt;
use futures::StreamExt;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_util::codec::Framed;

use super::*;
use crate::constants::DEFAULT_SERVER_IDLE_TIMEOUT_IN_SECS;
use crate::test_utils::enable_logger;
use crate::test_utils::key_set;
use crate::test_utils::value_map;
use crate::ConfrCodec;
use crate::MemoryStore;
use crate::Message;
use crate::Payload;
use crate::ServerConfig;

fn test_config() -> ServerConfig {
    ServerConfig {
        bind_address: "127.0.0.1".to_string(),
        port: 0,
        ..ServerConfig::default()
    }
}

async fn start_server(config: ServerConfig) -> (Arc<MemoryStore>, ConfServer, SocketAddr) {
    enable_logger();
    let store = Arc::new(MemoryStore::new());
    let mut server = ConfServer::new(config, store.clone());
    server.start().await.unwrap();
    let addr = server.local_addr().unwrap();
    (store, server, addr)
}

async fn connect(addr: SocketAddr) -> Framed<TcpStream, ConfrCodec> {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, ConfrCodec::new(4 * 1024 * 1024))
}

async fn recv(framed: &mut Framed<TcpStream, ConfrCodec>) -> Message {
    timeout(Duration::from_secs(2), framed.next())
        .await
        .expect("message should arrive")
        .expect("stream open")
        .expect("decodable")
}

async fn wait_until(mut condition: impl FnMut() -> bool) {
    timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition should become true");
}

#[tokio::test]
async fn ping_over_tcp_is_answered() {
    let (_store, mut server, addr) = start_server(test_config()).await;
    let mut client = connect(addr).await;

    client.send(Message::ping("s")).await.unwrap();

    assert_eq!(recv(&mut client).await.payload, Payload::Pong);
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn watch_then_change_over_tcp() {
    let (store, mut server, addr) = start_server(test_config()).await;
    let mut client = connect(addr).await;

    client
        .send(Message::watch_request(0, "s", key_set(&["db.host"])))
        .await
        .unwrap();
    assert_eq!(
        recv(&mut client).await,
        Message::watch_response(0, "s", value_map(&[("db.host", "")]))
    );

    store.put("db.host", "10.0.0.1");

    assert_eq!(
        recv(&mut client).await,
        Message::config_change("s", value_map(&[("db.host", "10.0.0.1")]))
    );
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn unknown_kind_closes_the_connection_and_clears_the_session() {
    let (store, mut server, addr) = start_server(test_config()).await;
    let mut client = connect(addr).await;
    client
        .send(Message::watch_request(0, "s", key_set(&["k"])))
        .await
        .unwrap();
    recv(&mut client).await;
    assert!(store.is_subscribed("k"));

    let mut stream = client.into_inner();
    let mut frame = BytesMut::new();
    frame.put_i32(8);
    frame.put_i32(-1);
    stream.write_all(&frame).await.unwrap();

    let mut buf = [0u8; 16];
    let read = timeout(Duration::from_secs(2), stream.read(&mut buf))
        .await
        .expect("server should close the connection");
    assert!(matches!(read, Ok(0) | Err(_)));

    wait_until(|| !store.is_subscribed("k")).await;
    wait_until(|| server.session_count() == 0).await;
    server.shutdown().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn idle_connections_are_closed() {
    let (store, mut server, addr) = start_server(test_config()).await;
    let mut client = connect(addr).await;
    let started = tokio::time::Instant::now();
    client
        .send(Message::watch_request(0, "s", key_set(&["k"])))
        .await
        .unwrap();
    let response = timeout(Duration::from_secs(120), client.next())
        .await
        .expect("response should arrive")
        .expect("stream open")
        .expect("decodable");
    assert_eq!(response.correlation_id(), 0);

    let closed = timeout(Duration::from_secs(120), client.next())
        .await
        .expect("idle timeout should close the connection");
    assert!(closed.is_none() || matches!(closed, Some(Err(_))));
    assert!(started.elapsed() >= Duration::from_secs(DEFAULT_SERVER_IDLE_TIMEOUT_IN_SECS));

    wait_until(|| store.subscription_count() == 0).await;
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn requests_on_one_connection_are_answered_in_order() {
    let (_store, mut server, addr) = start_server(test_config()).await;
    let mut client = connect(addr).await;

    for id in 0..20 {
        let key = format!("k{id}");
        client
            .send(Message::watch_request(id, "s", key_set(&[key.as_str()])))
            .await
            .unwrap();
    }

    for id in 0..20 {
        assert_eq!(recv(&mut client).await.correlation_id(), id);
    }
    server.shutdown().await.unwrap();
}

#[tokio::test]
async fn shutdown_closes_connections_and_cancels_subscriptions() {
    let (store, mut server, addr) = start_server(test_config()).await;
    let mut client = connect(addr).await;
    client
        .send(Message::watch_request(0, "s", key_set(&["a", "b"])))
        .await
        .unwrap();
    recv(&mut client).await;
    assert_eq!(server.watcher_count(), 2);

    server.shutdown().await.unwrap();

    assert_eq!(store.subscription_count(), 0);
    assert!(!server.is_running());
    let next = timeout(Duration::from_secs(2), client.next()).await.unwrap();
    assert!(next.is_none() || matches!(next, Some(Err(_))));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let (_store, mut server, _addr) = start_server(test_config()).await;

    assert!(server.start().await.is_err());
    server.shutdown().await.unwrap();
}
