use std::net::SocketAddr;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::serve_connection;
use super::ConfRequests;
use super::ConnectionHandle;
use super::ConnectionId;
use super::RequestHandlerPool;
use super::RequestResponseChannel;
use super::ResponseHandler;
use crate::metrics::ACTIVE_CONNECTIONS;
use crate::Error;
use crate::NetworkError;
use crate::Result;
use crate::ServerConfig;
use crate::SystemError;
use crate::ValueDispatcher;
use crate::ValueStore;

/// Pause after a failed accept before trying again
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

type ConnectionTable = DashMap<ConnectionId, ConnectionHandle>;

struct Running {
    local_addr: SocketAddr,
    dispatcher: Arc<ValueDispatcher>,
    requests: Arc<ConfRequests>,
    pool: RequestHandlerPool,
    response_handler: ResponseHandler,
    acceptor: JoinHandle<()>,
    stop_accepting: CancellationToken,
    connections: Arc<ConnectionTable>,
}

/// Configuration server: accepts connections and multiplexes store changes to
/// every watching session.
pub struct ConfServer {
    config: ServerConfig,
    store: Arc<dyn ValueStore>,
    running: Option<Running>,
}

impl ConfServer {
    pub fn new(
        config: ServerConfig,
        store: Arc<dyn ValueStore>,
    ) -> Self {
        Self {
            config,
            store,
            running: None,
        }
    }

    /// Binds the listener and starts the dispatcher, the response writer, the
    /// handler pool and the accept loop.
    pub async fn start(&mut self) -> Result<()> {
        if self.running.is_some() {
            return Err(Error::Fatal("server already started".into()));
        }

        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| NetworkError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        let dispatcher = Arc::new(ValueDispatcher::new(self.store.clone()));
        let channel = Arc::new(RequestResponseChannel::new(
            self.config.request_handler_threads,
            self.config.request_queue_capacity,
            self.config.response_queue_capacity,
        ));
        let requests = Arc::new(ConfRequests::new(dispatcher.clone(), channel.clone()));
        let response_handler = ResponseHandler::start(&channel)?;
        let pool = RequestHandlerPool::start(channel.clone(), requests.clone())?;

        let stop_accepting = CancellationToken::new();
        let connections: Arc<ConnectionTable> = Arc::new(DashMap::new());
        let acceptor = tokio::spawn(accept_loop(
            listener,
            self.config.clone(),
            channel,
            connections.clone(),
            stop_accepting.clone(),
        ));

        info!(%local_addr, workers = pool.size(), "Config server started");
        self.running = Some(Running {
            local_addr,
            dispatcher,
            requests,
            pool,
            response_handler,
            acceptor,
            stop_accepting,
            connections,
        });
        Ok(())
    }

    /// Address the listener is bound to, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|r| r.local_addr)
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn connection_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.connections.len())
    }

    pub fn session_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.requests.session_count())
    }

    /// Keys with a live store subscription
    pub fn watcher_count(&self) -> usize {
        self.running.as_ref().map_or(0, |r| r.dispatcher.watcher_count())
    }

    /// Stops accepting, closes every connection, stops the workers and the
    /// response writer, then cancels all store subscriptions.
    pub async fn shutdown(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };

        running.stop_accepting.cancel();
        running.acceptor.await.map_err(SystemError::TaskFailed)?;

        for connection in running.connections.iter() {
            connection.value().close();
        }

        running.pool.shutdown().await?;
        running.requests.clear_all_sessions().await;
        running.response_handler.shutdown().await?;
        running.dispatcher.shutdown().await;

        info!(local_addr = %running.local_addr, "Config server stopped");
        Ok(())
    }
}

impl Drop for ConfServer {
    fn drop(&mut self) {
        if let Some(running) = &self.running {
            running.stop_accepting.cancel();
            for connection in running.connections.iter() {
                connection.value().close();
            }
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: ServerConfig,
    channel: Arc<RequestResponseChannel>,
    connections: Arc<ConnectionTable>,
    stop_accepting: CancellationToken,
) {
    let next_connection_id = AtomicU64::new(1);
    let idle_timeout = config.idle_timeout();

    loop {
        let accepted = tokio::select! {
            _ = stop_accepting.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        if let Err(e) = stream.set_nodelay(config.tcp_nodelay) {
            warn!(%peer, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (handle, outbound) = ConnectionHandle::new(id, peer);
        connections.insert(id, handle.clone());
        ACTIVE_CONNECTIONS.inc();
        debug!(conn_id = id, %peer, "Connection accepted");

        let channel = channel.clone();
        let connections = connections.clone();
        let max_frame_length = config.max_frame_length;
        tokio::spawn(async move {
            serve_connection(stream, handle, outbound, channel, idle_timeout, max_frame_length).await;
            connections.remove(&id);
            ACTIVE_CONNECTIONS.dec();
            debug!(conn_id = id, "Connection finished");
        });
    }
    debug!("Accept loop stopped");
}
