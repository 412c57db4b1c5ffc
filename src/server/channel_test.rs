use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::timeout;

use super::*;
use crate::Message;

fn connection(id: ConnectionId) -> ConnectionHandle {
    let peer: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    ConnectionHandle::new(id, peer).0
}

fn ping_from(conn: &ConnectionHandle, seq: i64) -> RequestInfo {
    let mut message = Message::ping("client");
    message.header.correlation_id = seq;
    RequestInfo {
        connection: conn.clone(),
        message,
    }
}

#[tokio::test]
async fn commands_of_one_connection_stay_on_one_lane_in_order() {
    let channel = RequestResponseChannel::new(3, 30, 10);
    let mut lanes = channel.take_lane_receivers().unwrap();
    let conn = connection(4);

    for seq in 0..5 {
        channel.send_request(ping_from(&conn, seq)).await.unwrap();
    }
    channel.send_clear_session(conn.clone()).await.unwrap();

    let lane = &mut lanes[(4 % 3) as usize];
    for seq in 0..5 {
        match lane.recv().await.unwrap() {
            ChannelCommand::Request(request) => assert_eq!(request.message.correlation_id(), seq),
            other => panic!("unexpected command {other:?}"),
        }
    }
    assert!(matches!(lane.recv().await.unwrap(), ChannelCommand::ClearSession(c) if c.id() == 4));
}

#[tokio::test]
async fn shutdown_reaches_every_lane() {
    let channel = RequestResponseChannel::new(2, 10, 10);
    let mut lanes = channel.take_lane_receivers().unwrap();

    channel.send_shutdown().await.unwrap();

    for lane in lanes.iter_mut() {
        assert!(matches!(lane.recv().await.unwrap(), ChannelCommand::Shutdown));
    }
}

#[tokio::test]
async fn full_lane_blocks_the_producer() {
    let channel = RequestResponseChannel::new(1, 1, 1);
    let mut lanes = channel.take_lane_receivers().unwrap();
    let conn = connection(1);

    channel.send_request(ping_from(&conn, 0)).await.unwrap();
    assert_eq!(channel.pending_requests(), 1);

    let blocked = timeout(Duration::from_millis(50), channel.send_request(ping_from(&conn, 1))).await;
    assert!(blocked.is_err(), "second send must wait for capacity");

    lanes[0].recv().await.unwrap();
    timeout(Duration::from_millis(50), channel.send_request(ping_from(&conn, 1)))
        .await
        .expect("capacity freed")
        .unwrap();
}

#[tokio::test]
async fn receivers_can_only_be_taken_once() {
    let channel = RequestResponseChannel::new(2, 10, 10);

    assert!(channel.take_lane_receivers().is_some());
    assert!(channel.take_lane_receivers().is_none());
    assert!(channel.take_response_receiver().is_some());
    assert!(channel.take_response_receiver().is_none());
}

#[tokio::test]
async fn close_connection_queues_an_empty_response() {
    let channel = RequestResponseChannel::new(1, 10, 10);
    let mut responses = channel.take_response_receiver().unwrap();

    channel.close_connection(connection(9)).await.unwrap();

    assert_eq!(channel.pending_responses(), 1);
    let response = responses.recv().await.unwrap();
    assert_eq!(response.connection.id(), 9);
    assert!(response.message.is_none());
}

#[tokio::test]
async fn sends_fail_once_the_consumer_is_gone() {
    let channel = RequestResponseChannel::new(1, 10, 10);
    drop(channel.take_lane_receivers());

    assert!(channel.send_request(ping_from(&connection(1), 0)).await.is_err());
}

#[tokio::test]
async fn response_writer_drops_messages_for_closed_connections_and_honors_close() {
    let channel = RequestResponseChannel::new(1, 10, 10);
    let writer = ResponseHandler::start(&channel).unwrap();
    let (open, mut open_rx) = ConnectionHandle::new(1, "127.0.0.1:1".parse().unwrap());
    let (closed, mut closed_rx) = ConnectionHandle::new(2, "127.0.0.1:2".parse().unwrap());
    closed.close();

    channel
        .send_response(ResponseInfo::message(open.clone(), Message::ping("a")))
        .await
        .unwrap();
    channel
        .send_response(ResponseInfo::message(closed.clone(), Message::ping("b")))
        .await
        .unwrap();
    channel.close_connection(open.clone()).await.unwrap();

    assert!(matches!(open_rx.recv().await.unwrap(), Outbound::Message(m) if m.client_id() == "a"));
    assert!(matches!(open_rx.recv().await.unwrap(), Outbound::Close));
    assert!(!open.is_active());
    assert!(matches!(closed_rx.recv().await.unwrap(), Outbound::Close));
    assert!(closed_rx.try_recv().is_err());

    writer.shutdown().await.unwrap();
}
