use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::SinkExt;
use futures::StreamExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::trace;
use tracing::warn;

use super::RequestInfo;
use super::RequestResponseChannel;
use crate::metrics::FRAMING_ERRORS;
use crate::metrics::IDLE_CLOSES;
use crate::ConfrCodec;
use crate::Message;
use crate::NetworkError;
use crate::Result;

pub type ConnectionId = u64;

#[derive(Debug)]
pub(crate) enum Outbound {
    Message(Message),
    Close,
}

/// Cloneable reference to one accepted connection.
///
/// Writes are queued to the connection's writer task, so holders never touch
/// the socket directly.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    outbound: mpsc::UnboundedSender<Outbound>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    pub(crate) fn new(
        id: ConnectionId,
        peer: SocketAddr,
    ) -> (Self, mpsc::UnboundedReceiver<Outbound>) {
        let (outbound, rx) = mpsc::unbounded_channel();
        let handle = Self {
            id,
            peer,
            outbound,
            closed: CancellationToken::new(),
        };
        (handle, rx)
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn is_active(&self) -> bool {
        !self.closed.is_cancelled()
    }

    pub(crate) fn write(
        &self,
        message: Message,
    ) -> Result<()> {
        if !self.is_active() {
            return Err(NetworkError::ChannelNotOpen.into());
        }
        self.outbound
            .send(Outbound::Message(message))
            .map_err(|_| NetworkError::ChannelNotOpen.into())
    }

    /// Marks the connection closed. Messages queued before the call are still
    /// flushed by the writer.
    pub(crate) fn close(&self) {
        if !self.closed.is_cancelled() {
            self.closed.cancel();
            let _ = self.outbound.send(Outbound::Close);
        }
    }

    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await
    }
}

/// Drives one accepted connection until it closes.
///
/// Decoded messages are queued as requests in arrival order. End of stream,
/// the idle timeout and framing errors close the connection; in every case a
/// clear-session command follows the connection's last request.
pub(crate) async fn serve_connection(
    stream: TcpStream,
    handle: ConnectionHandle,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    channel: Arc<RequestResponseChannel>,
    idle_timeout: Duration,
    max_frame_length: usize,
) {
    let (read_half, write_half) = stream.into_split();
    let mut reader = FramedRead::new(read_half, ConfrCodec::new(max_frame_length));
    let writer = FramedWrite::new(write_half, ConfrCodec::new(max_frame_length));
    let writer_task = tokio::spawn(write_outbound(writer, outbound, handle.clone()));

    loop {
        tokio::select! {
            _ = handle.closed() => {
                trace!(conn_id = handle.id(), "Connection closed locally");
                break;
            }
            next = tokio::time::timeout(idle_timeout, reader.next()) => match next {
                Err(_) => {
                    warn!(conn_id = handle.id(), peer = %handle.peer(), ?idle_timeout, "Idle timeout, closing connection");
                    IDLE_CLOSES.inc();
                    break;
                }
                Ok(None) => {
                    debug!(conn_id = handle.id(), peer = %handle.peer(), "Peer closed connection");
                    break;
                }
                Ok(Some(Err(e))) => {
                    error!(conn_id = handle.id(), peer = %handle.peer(), error = %e, "Undecodable frame, closing connection");
                    FRAMING_ERRORS.inc();
                    break;
                }
                Ok(Some(Ok(message))) => {
                    trace!(conn_id = handle.id(), kind = %message.kind(), correlation_id = message.correlation_id(), "Request received");
                    let request = RequestInfo {
                        connection: handle.clone(),
                        message,
                    };
                    if let Err(e) = channel.send_request(request).await {
                        warn!(conn_id = handle.id(), error = %e, "Request queue closed");
                        break;
                    }
                }
            }
        }
    }

    handle.close();
    if let Err(e) = channel.send_clear_session(handle.clone()).await {
        debug!(conn_id = handle.id(), error = %e, "Could not queue session cleanup");
    }
    if let Err(e) = writer_task.await {
        warn!(conn_id = handle.id(), error = %e, "Writer task failed");
    }
}

async fn write_outbound(
    mut writer: FramedWrite<OwnedWriteHalf, ConfrCodec>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    handle: ConnectionHandle,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Message(message) => {
                if let Err(e) = writer.send(message).await {
                    warn!(conn_id = handle.id(), error = %e, "Write failed, closing connection");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }
    handle.close();
    let _ = writer.close().await;
}
