//! Connection management: connect, reconnect with a fixed delay, and
//! keepalive pings while the link is quiet.

use std::pin::pin;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use futures::SinkExt;
use futures::StreamExt;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::trace;
use tracing::warn;

#[cfg(test)]
use mockall::automock;

use super::ClientConfig;
use super::ConfrSession;
use crate::ConfrCodec;
use crate::Message;
use crate::NetworkError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Disconnected,
    Closed,
}

/// Outbound path of the client session.
#[cfg_attr(test, automock)]
pub trait Transport: Send + Sync + 'static {
    /// Queues `message` on the current connection without waiting.
    ///
    /// # Errors
    /// - `NetworkError::ChannelNotOpen` when no connection is up
    /// - `NetworkError::ChannelNotWritable` when the outbound queue is full
    fn send(
        &self,
        message: Message,
    ) -> Result<()>;
}

/// Swappable handle to the outbound queue of the live connection.
#[derive(Debug, Default, Clone)]
pub struct ClientTransport {
    outbound: Arc<ArcSwapOption<mpsc::Sender<Message>>>,
}

impl ClientTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn install(
        &self,
        sender: mpsc::Sender<Message>,
    ) {
        self.outbound.store(Some(Arc::new(sender)));
    }

    pub(crate) fn uninstall(&self) {
        self.outbound.store(None);
    }

    pub fn is_open(&self) -> bool {
        match &*self.outbound.load() {
            Some(sender) => !sender.is_closed(),
            None => false,
        }
    }
}

impl Transport for ClientTransport {
    fn send(
        &self,
        message: Message,
    ) -> Result<()> {
        let guard = self.outbound.load();
        let Some(sender) = &*guard else {
            return Err(NetworkError::ChannelNotOpen.into());
        };
        sender.try_send(message).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => NetworkError::ChannelNotWritable.into(),
            mpsc::error::TrySendError::Closed(_) => NetworkError::ChannelNotOpen.into(),
        })
    }
}

/// Owns the socket lifecycle for one client session.
pub struct ConnectionManager {
    config: ClientConfig,
    session: Arc<ConfrSession>,
    transport: ClientTransport,
    state: watch::Sender<ConnectionState>,
    shutdown: CancellationToken,
}

impl ConnectionManager {
    pub fn new(
        config: ClientConfig,
        session: Arc<ConfrSession>,
        transport: ClientTransport,
        state: watch::Sender<ConnectionState>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            config,
            session,
            transport,
            state,
            shutdown,
        }
    }

    /// Connects and reconnects until shutdown. Every failure, whether a
    /// refused connect or a dropped link, is followed by the fixed
    /// reconnect delay; there is no attempt limit.
    pub async fn run(self) {
        let addr = self.config.server_addr();
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }
            self.state.send_replace(ConnectionState::Connecting);

            match self.connect(&addr).await {
                Ok(stream) => {
                    info!(%addr, session_id = %self.session.session_id(), "Connected to config server");
                    self.serve(stream).await;
                    info!(%addr, "Disconnected from config server");
                }
                Err(e) => warn!(%addr, error = %e, "Connect failed"),
            }

            if self.shutdown.is_cancelled() {
                break;
            }
            self.state.send_replace(ConnectionState::Disconnected);

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = sleep(self.config.reconnect_delay) => {
                    debug!(%addr, "Reconnecting");
                }
            }
        }
        self.transport.uninstall();
        self.state.send_replace(ConnectionState::Closed);
        debug!(session_id = %self.session.session_id(), "Connection manager stopped");
    }

    async fn connect(
        &self,
        addr: &str,
    ) -> Result<TcpStream> {
        let stream = match timeout(self.config.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(NetworkError::ConnectError {
                    addr: addr.to_string(),
                    source,
                }
                .into())
            }
            Err(_) => {
                return Err(NetworkError::ConnectTimeout {
                    addr: addr.to_string(),
                    duration: self.config.connect_timeout,
                }
                .into())
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }
        Ok(stream)
    }

    async fn serve(
        &self,
        stream: TcpStream,
    ) {
        let (read_half, write_half) = stream.into_split();
        let mut reader = FramedRead::new(read_half, ConfrCodec::new(self.config.max_frame_length));
        let mut writer = FramedWrite::new(write_half, ConfrCodec::new(self.config.max_frame_length));

        let (tx, mut rx) = mpsc::channel(self.config.outbound_capacity);
        self.transport.install(tx);
        self.state.send_replace(ConnectionState::Connected);
        self.session.on_connected();

        let idle_interval = self.config.idle_interval;
        let mut idle = pin!(sleep(idle_interval));

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,

                Some(message) = rx.recv() => {
                    if let Err(e) = writer.send(message).await {
                        warn!(error = %e, "Write failed, dropping connection");
                        break;
                    }
                }

                _ = &mut idle => {
                    trace!(session_id = %self.session.session_id(), "Link idle, sending ping");
                    if let Err(e) = writer.send(Message::ping(self.session.session_id())).await {
                        warn!(error = %e, "Ping failed, dropping connection");
                        break;
                    }
                    idle.as_mut().reset(Instant::now() + idle_interval);
                }

                frame = reader.next() => match frame {
                    Some(Ok(message)) => {
                        idle.as_mut().reset(Instant::now() + idle_interval);
                        self.session.handle_message(message);
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "Unreadable frame from server, dropping connection");
                        break;
                    }
                    None => {
                        debug!("Server closed the connection");
                        break;
                    }
                },
            }
        }

        self.transport.uninstall();
        self.session.on_disconnected();
    }
}
