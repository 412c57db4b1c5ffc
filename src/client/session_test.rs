use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::timeout;

use super::*;
use crate::test_utils::enable_logger;
use crate::test_utils::key_set;
use crate::test_utils::value_map;
use crate::Error;
use crate::Message;
use crate::NetworkError;
use crate::Payload;
use crate::WatchError;

type Sent = Arc<Mutex<Vec<Message>>>;

fn recording_transport() -> (MockTransport, Sent) {
    let sent: Sent = Arc::new(Mutex::new(Vec::new()));
    let recorder = sent.clone();
    let mut transport = MockTransport::new();
    transport.expect_send().returning(move |message| {
        recorder.lock().push(message);
        Ok(())
    });
    (transport, sent)
}

fn session_with(
    transport: MockTransport,
    keys: &[&str],
) -> Arc<ConfrSession> {
    enable_logger();
    Arc::new(ConfrSession::new(Arc::new(transport), key_set(keys), None))
}

async fn wait_for_sent(
    sent: &Sent,
    count: usize,
) -> Message {
    timeout(Duration::from_secs(1), async {
        loop {
            if let Some(message) = sent.lock().get(count - 1) {
                return message.clone();
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("request should be sent")
}

#[tokio::test]
async fn cached_key_is_served_without_a_request() {
    let (transport, sent) = recording_transport();
    let session = session_with(transport, &[]);

    let watcher = session.clone();
    let first = tokio::spawn(async move { watcher.watch_config("db.host").await });
    let request = wait_for_sent(&sent, 1).await;
    assert_eq!(
        request.payload,
        Payload::WatchRequest {
            keys: key_set(&["db.host"])
        }
    );
    session.handle_message(Message::watch_response(
        request.correlation_id(),
        session.session_id(),
        value_map(&[("db.host", "10.0.0.1")]),
    ));
    assert_eq!(first.await.unwrap().unwrap(), "10.0.0.1");

    assert_eq!(session.watch_config("db.host").await.unwrap(), "10.0.0.1");
    assert_eq!(sent.lock().len(), 1);
}

#[tokio::test]
async fn reconnect_rewatches_all_keys_in_one_request_with_the_same_session_id() {
    let (transport, sent) = recording_transport();
    let session = session_with(transport, &["A", "B"]);

    session.on_connected();
    session.on_disconnected();
    session.on_connected();

    let sent = sent.lock();
    assert_eq!(sent.len(), 2);
    for request in sent.iter() {
        assert_eq!(request.client_id(), session.session_id());
        assert_eq!(
            request.payload,
            Payload::WatchRequest {
                keys: key_set(&["A", "B"])
            }
        );
    }
}

#[tokio::test]
async fn nothing_is_sent_on_connect_without_watched_keys() {
    let mut transport = MockTransport::new();
    transport.expect_send().never();
    let session = session_with(transport, &[]);

    session.on_connected();
}

#[tokio::test]
async fn correlation_ids_increase_from_zero() {
    let (transport, sent) = recording_transport();
    let session = session_with(transport, &["k"]);

    session.on_connected();
    session.on_connected();

    let ids: Vec<i64> = sent.lock().iter().map(|m| m.correlation_id()).collect();
    assert_eq!(ids, vec![0, 1]);
}

#[tokio::test]
async fn messages_for_another_session_are_counted_and_dropped() {
    let (transport, _sent) = recording_transport();
    let session = session_with(transport, &["k"]);

    session.handle_message(Message::watch_response(0, "someone-else", value_map(&[("k", "v")])));
    session.handle_message(Message::config_change("someone-else", value_map(&[("k", "v")])));

    assert_eq!(session.session_mismatch_count(), 2);
    assert_eq!(session.get_config("k"), None);
}

#[tokio::test]
async fn change_of_an_unwatched_key_is_a_protocol_violation() {
    let (transport, _sent) = recording_transport();
    let session = session_with(transport, &["watched"]);
    let mut changes = session.subscribe_changes();

    session.handle_message(Message::config_change(
        session.session_id(),
        value_map(&[("watched", "1"), ("stray", "2")]),
    ));

    assert_eq!(session.protocol_violation_count(), 1);
    assert_eq!(session.get_config("stray"), None);
    assert_eq!(session.get_config("watched").as_deref(), Some("1"));
    assert_eq!(changes.recv().await.unwrap(), ConfigChange {
        key: "watched".to_string(),
        value: "1".to_string(),
    });
}

#[tokio::test]
async fn disconnect_fails_pending_watches() {
    let (transport, sent) = recording_transport();
    let session = session_with(transport, &[]);

    let watcher = session.clone();
    let pending = tokio::spawn(async move { watcher.watch_config("k").await });
    wait_for_sent(&sent, 1).await;

    session.on_disconnected();

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Network(NetworkError::ConnectionLost))));
    assert_eq!(session.inflight_count(), 0);
    assert!(session.watched_keys().contains("k"));
}

#[tokio::test(start_paused = true)]
async fn watch_times_out_and_forgets_the_request() {
    enable_logger();
    let (transport, _sent) = recording_transport();
    let limit = Duration::from_secs(30);
    let session = ConfrSession::new(Arc::new(transport), key_set(&[]), Some(limit));
    let started = tokio::time::Instant::now();

    let result = session.watch_config("k").await;

    assert!(matches!(result, Err(Error::Network(NetworkError::Timeout(d))) if d == limit));
    assert!(started.elapsed() >= limit);
    assert_eq!(session.inflight_count(), 0);
}

#[tokio::test]
async fn send_failure_is_returned_and_nothing_stays_pending() {
    let mut transport = MockTransport::new();
    transport
        .expect_send()
        .times(1)
        .returning(|_| Err(NetworkError::ChannelNotWritable.into()));
    let session = session_with(transport, &[]);

    let result = session.watch_config("k").await;

    assert!(matches!(result, Err(Error::Network(NetworkError::ChannelNotWritable))));
    assert_eq!(session.inflight_count(), 0);
}

#[tokio::test]
async fn response_without_the_key_is_not_confirmed() {
    let (transport, sent) = recording_transport();
    let session = session_with(transport, &[]);

    let watcher = session.clone();
    let pending = tokio::spawn(async move { watcher.watch_config("k").await });
    let request = wait_for_sent(&sent, 1).await;
    session.handle_message(Message::watch_response(
        request.correlation_id(),
        session.session_id(),
        value_map(&[]),
    ));

    let result = pending.await.unwrap();
    assert!(matches!(result, Err(Error::Watch(WatchError::NotConfirmed(key))) if key == "k"));
}

#[tokio::test]
async fn rewatch_response_refreshes_the_cache() {
    let (transport, sent) = recording_transport();
    let session = session_with(transport, &["a", "b"]);

    session.on_connected();
    let request = wait_for_sent(&sent, 1).await;
    session.handle_message(Message::watch_response(
        request.correlation_id(),
        session.session_id(),
        value_map(&[("a", "1"), ("b", "")]),
    ));

    assert_eq!(session.get_config("a").as_deref(), Some("1"));
    assert_eq!(session.get_config("b").as_deref(), Some(""));
    assert_eq!(session.inflight_count(), 0);
}
